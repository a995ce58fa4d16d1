use crate::catalog::Catalog;
use crate::location::{DistrictResolver, PlatformProvider};

/// Shared, read-only server state.
pub struct AppState {
    pub resolver: DistrictResolver<PlatformProvider>,
    pub catalog: Catalog,
}
