//! Location subsystem for JiranLink.
//!
//! Acquires the device position from gpsd, IP geolocation, or a caller-reported
//! fix, and maps it to the nearest registered district by great-circle distance.

pub mod distance;
pub mod providers;
pub mod registry;
pub mod resolver;
pub mod types;

pub use distance::distance_km;
pub use providers::{GpsdProvider, IpProvider, LocationProvider, ManualProvider, PlatformProvider, ProviderKind, ProviderSettings};
pub use registry::{DistrictEntry, DistrictInfo, DistrictRegistry, RegistryError};
pub use resolver::DistrictResolver;
pub use types::{Coordinate, DistrictMatch, LocationError, LocationReading, LocationSource, ResolveError};
