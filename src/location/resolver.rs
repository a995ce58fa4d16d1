//! Nearest-district resolver: one provider call, then a linear scan of the registry.

use super::providers::LocationProvider;
use super::registry::DistrictRegistry;
use super::types::{DistrictMatch, LocationReading, ResolveError};

/// Maps the device's current position to the closest registered district.
pub struct DistrictResolver<P> {
    provider: P,
    registry: DistrictRegistry,
    max_accuracy_m: Option<f64>,
}

impl<P: LocationProvider> DistrictResolver<P> {
    pub fn new(provider: P, registry: DistrictRegistry) -> Self {
        Self {
            provider,
            registry,
            max_accuracy_m: None,
        }
    }

    /// Reject readings whose error radius exceeds `limit_m`.
    pub fn with_max_accuracy(mut self, limit_m: Option<f64>) -> Self {
        self.max_accuracy_m = limit_m;
        self
    }

    pub fn registry(&self) -> &DistrictRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Acquire a fix and resolve it. Provider failures are passed through untouched.
    pub async fn find_nearest_district(&self) -> Result<DistrictMatch, ResolveError> {
        let reading = self.provider.current_location().await?;
        self.resolve_reading(reading)
    }

    /// Like [`find_nearest_district`](Self::find_nearest_district), but every failure becomes `None`.
    pub async fn find_nearest_district_name(&self) -> Option<String> {
        match self.find_nearest_district().await {
            Ok(m) => Some(m.district),
            Err(e) => {
                tracing::warn!(reason = e.reason(), "error finding nearest district: {}", e);
                None
            }
        }
    }

    /// Resolve an already-obtained reading without touching the provider.
    pub fn resolve_reading(&self, reading: LocationReading) -> Result<DistrictMatch, ResolveError> {
        if self.registry.is_empty() {
            return Err(ResolveError::EmptyRegistry);
        }
        if let Some(limit_m) = self.max_accuracy_m {
            if reading.accuracy_m > limit_m {
                return Err(ResolveError::InaccurateReading {
                    accuracy_m: reading.accuracy_m,
                    limit_m,
                });
            }
        }

        let (entry, distance_km) = self
            .registry
            .nearest(reading.coordinate)
            .ok_or(ResolveError::EmptyRegistry)?;

        tracing::debug!(
            district = %entry.name,
            distance_km,
            source = %reading.source,
            "resolved nearest district"
        );

        Ok(DistrictMatch {
            district: entry.name.clone(),
            district_coordinate: entry.coordinate,
            distance_km,
            reading,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::providers::ManualProvider;
    use crate::location::registry::DistrictEntry;
    use crate::location::types::{Coordinate, LocationError, LocationSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Provider returning a canned result and counting calls.
    struct FakeProvider {
        result: Result<LocationReading, LocationError>,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn at(lat: f64, lon: f64) -> Self {
            let reading = LocationReading::now(Coordinate::new(lat, lon).unwrap(), 10.0, LocationSource::Manual);
            Self { result: Ok(reading), calls: AtomicUsize::new(0) }
        }

        fn failing(err: LocationError) -> Self {
            Self { result: Err(err), calls: AtomicUsize::new(0) }
        }
    }

    impl LocationProvider for FakeProvider {
        async fn current_location(&self) -> Result<LocationReading, LocationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn builtin_at(lat: f64, lon: f64) -> DistrictResolver<FakeProvider> {
        DistrictResolver::new(FakeProvider::at(lat, lon), DistrictRegistry::builtin())
    }

    fn entry(name: &str, lat: f64, lon: f64) -> DistrictEntry {
        DistrictEntry { name: name.into(), coordinate: Coordinate::new(lat, lon).unwrap() }
    }

    #[tokio::test]
    async fn test_kuala_lumpur_exact() {
        let m = builtin_at(3.139, 101.6869).find_nearest_district().await.unwrap();
        assert_eq!(m.district, "Kuala Lumpur");
        assert_eq!(m.distance_km, 0.0);
    }

    #[tokio::test]
    async fn test_near_johor_bahru() {
        let resolver = builtin_at(1.50, 103.75);
        assert_eq!(resolver.find_nearest_district_name().await.as_deref(), Some("Johor Bahru"));
    }

    #[tokio::test]
    async fn test_every_district_resolves_to_itself() {
        for e in DistrictRegistry::builtin().entries() {
            let resolver = builtin_at(e.coordinate.lat(), e.coordinate.lon());
            assert_eq!(resolver.find_nearest_district().await.unwrap().district, e.name);
        }
    }

    #[tokio::test]
    async fn test_tie_break_is_stable() {
        let registry = DistrictRegistry::from_entries(vec![entry("North", 1.0, 0.0), entry("South", -1.0, 0.0)]).unwrap();
        let resolver = DistrictResolver::new(FakeProvider::at(0.0, 0.0), registry);
        for _ in 0..5 {
            assert_eq!(resolver.find_nearest_district_name().await.as_deref(), Some("North"));
        }
    }

    #[tokio::test]
    async fn test_provider_failure_becomes_none() {
        let resolver = DistrictResolver::new(
            FakeProvider::failing(LocationError::PermissionDenied("user declined".into())),
            DistrictRegistry::builtin(),
        );
        assert_eq!(resolver.find_nearest_district_name().await, None);
    }

    #[tokio::test]
    async fn test_failure_reason_is_kept() {
        let resolver = DistrictResolver::new(
            FakeProvider::failing(LocationError::Timeout(Duration::from_secs(10))),
            DistrictRegistry::builtin(),
        );
        let err = resolver.find_nearest_district().await.unwrap_err();
        assert_eq!(err, ResolveError::NoLocationAvailable(LocationError::Timeout(Duration::from_secs(10))));
        assert_eq!(err.reason(), "timeout");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let resolver = DistrictResolver::new(FakeProvider::at(3.0, 101.0), DistrictRegistry::from_entries(vec![]).unwrap());
        assert_eq!(resolver.find_nearest_district().await.unwrap_err(), ResolveError::EmptyRegistry);
        assert_eq!(resolver.find_nearest_district_name().await, None);
    }

    #[tokio::test]
    async fn test_provider_called_once_per_resolution() {
        let resolver = builtin_at(4.6, 101.1);
        resolver.find_nearest_district().await.unwrap();
        resolver.find_nearest_district().await.unwrap();
        assert_eq!(resolver.provider().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_accuracy_limit() {
        let resolver = DistrictResolver::new(ManualProvider::new(3.139, 101.6869, 800.0).unwrap(), DistrictRegistry::builtin())
            .with_max_accuracy(Some(500.0));
        let err = resolver.find_nearest_district().await.unwrap_err();
        assert_eq!(err.reason(), "inaccurate");

        let resolver = resolver.with_max_accuracy(Some(1000.0));
        assert_eq!(resolver.find_nearest_district().await.unwrap().district, "Kuala Lumpur");
    }

    #[test]
    fn test_resolve_reading_without_provider() {
        let resolver = builtin_at(0.0, 0.0);
        let reading = LocationReading::now(Coordinate::new(5.98, 116.07).unwrap(), 5.0, LocationSource::Manual);
        let m = resolver.resolve_reading(reading).unwrap();
        assert_eq!(m.district, "Kota Kinabalu");
        assert!(m.distance_km < 1.0);
        assert_eq!(resolver.provider().calls.load(Ordering::SeqCst), 0);
    }
}
