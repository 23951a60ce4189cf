//! Geolocation and postal-code geocoding
//!
//! ## Table of Contents
//! - **GeoPoint**: WGS84 longitude/latitude pair with haversine distance
//! - **Geocoder**: Trait resolving a postal code to coordinates
//! - **NominatimGeocoder**: OpenStreetMap search API client
//! - **StaticGeocoder**: Table-driven geocoder for development and tests

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::GeocoderConfig;
use crate::error::{BridgeError, Result};

/// Earth radius in kilometres (WGS84 mean)
const EARTH_MEAN_RADIUS_KM: f64 = 6_371.0;

/// A point on the globe
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Longitude in degrees, -180..=180
    pub longitude: f64,
    /// Latitude in degrees, -90..=90
    pub latitude: f64,
}

impl GeoPoint {
    /// Create a validated point
    pub fn new(longitude: f64, latitude: f64) -> Result<Self> {
        if !(-180.0..=180.0).contains(&longitude) || !(-90.0..=90.0).contains(&latitude) {
            return Err(BridgeError::validation(
                "location",
                format!("invalid coordinates [{}, {}]", longitude, latitude),
            ));
        }
        Ok(Self { longitude, latitude })
    }

    /// Great-circle distance in kilometres
    pub fn distance_km(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().asin();

        EARTH_MEAN_RADIUS_KM * c
    }
}

/// Resolves postal codes to coordinates
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a postal code within a country.
    ///
    /// Any failure, including transport errors, is reported as
    /// [`BridgeError::InvalidPostalCode`].
    async fn resolve(&self, postal_code: &str, country: &str) -> Result<GeoPoint>;
}

/// Type alias for a shared geocoder
pub type BoxedGeocoder = Arc<dyn Geocoder>;

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// OpenStreetMap Nominatim client
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl NominatimGeocoder {
    /// Create a client from configuration
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    async fn search(&self, postal_code: &str, country: &str) -> std::result::Result<Vec<NominatimPlace>, reqwest::Error> {
        self.client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("postalcode", postal_code),
                ("country", country),
                ("format", "json"),
                ("limit", "1"),
            ])
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn resolve(&self, postal_code: &str, country: &str) -> Result<GeoPoint> {
        let places = self.search(postal_code, country).await.map_err(|e| {
            warn!(postal_code = %postal_code, error = %e, "Geocoder request failed");
            BridgeError::InvalidPostalCode(postal_code.to_string())
        })?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::InvalidPostalCode(postal_code.to_string()))?;

        let (lon, lat) = match (place.lon.parse::<f64>(), place.lat.parse::<f64>()) {
            (Ok(lon), Ok(lat)) => (lon, lat),
            _ => return Err(BridgeError::InvalidPostalCode(postal_code.to_string())),
        };

        debug!(postal_code = %postal_code, lon, lat, "Postal code resolved");
        GeoPoint::new(lon, lat).map_err(|_| BridgeError::InvalidPostalCode(postal_code.to_string()))
    }
}

/// Table-driven geocoder
#[derive(Debug, Default)]
pub struct StaticGeocoder {
    entries: HashMap<(String, String), GeoPoint>,
}

impl StaticGeocoder {
    /// Create an empty geocoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a postal code
    pub fn with_entry(mut self, postal_code: &str, country: &str, point: GeoPoint) -> Self {
        self.entries
            .insert((postal_code.trim().to_string(), country.trim().to_uppercase()), point);
        self
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, postal_code: &str, country: &str) -> Result<GeoPoint> {
        self.entries
            .get(&(postal_code.trim().to_string(), country.trim().to_uppercase()))
            .copied()
            .ok_or_else(|| BridgeError::InvalidPostalCode(postal_code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_bounds() {
        assert!(GeoPoint::new(77.59, 12.97).is_ok());
        assert!(GeoPoint::new(181.0, 0.0).is_err());
        assert!(GeoPoint::new(0.0, -90.5).is_err());
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.19 km on the mean sphere.
        let a = GeoPoint::new(0.0, 0.0).unwrap();
        let b = GeoPoint::new(0.0, 1.0).unwrap();
        let d = a.distance_km(&b);
        assert!((d - 111.19).abs() < 0.05, "got {}", d);
        assert_eq!(a.distance_km(&a), 0.0);
    }

    #[tokio::test]
    async fn test_static_geocoder() {
        let point = GeoPoint::new(77.59, 12.97).unwrap();
        let geocoder = StaticGeocoder::new().with_entry("560001", "India", point);

        assert_eq!(geocoder.resolve("560001", "INDIA").await.unwrap(), point);
        let err = geocoder.resolve("999999", "India").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidPostalCode(code) if code == "999999"));
    }
}
