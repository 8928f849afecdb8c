use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::watch, time::Instant};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_m: Option<f64>,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_m: None,
        }
    }

    /// Great-circle distance in metres (haversine).
    pub fn distance_m(&self, other: &GeoPoint) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LocationError {
    #[error("location permission denied")]
    PermissionDenied,
    #[error("location unavailable: {0}")]
    Unavailable(String),
    #[error("timed out waiting for a location fix")]
    Timeout,
}

impl LocationError {
    /// Maps a `GeolocationPositionError.code` reported by the webview.
    pub fn from_position_code(code: u16, message: &str) -> Self {
        match code {
            1 => LocationError::PermissionDenied,
            3 => LocationError::Timeout,
            _ => LocationError::Unavailable(message.to_string()),
        }
    }
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<GeoPoint, LocationError>;
}

/// Circular work-site boundary. When configured, a submission must carry a
/// position inside it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: f64,
}

impl Geofence {
    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    pub fn distance_to(&self, point: &GeoPoint) -> f64 {
        self.center().distance_m(point)
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        self.distance_to(point) <= self.radius_m
    }
}

pub const DEFAULT_MAX_FIX_AGE: Duration = Duration::from_secs(60);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
struct PositionReport {
    fix: Result<GeoPoint, LocationError>,
    received_at: Instant,
}

/// Location fed by the front-end, which owns the platform geolocation API.
/// A successful fix younger than `max_age` is reused. Otherwise the notifier
/// asks the front-end for a new one and `current_position` waits for the next
/// `report`, giving up after `request_timeout`.
pub struct BridgeLocator {
    notifier: Box<dyn Fn() + Send + Sync>,
    reports: watch::Sender<Option<PositionReport>>,
    max_age: Duration,
    request_timeout: Duration,
}

impl BridgeLocator {
    pub fn new(notifier: impl Fn() + Send + Sync + 'static) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            notifier: Box::new(notifier),
            reports,
            max_age: DEFAULT_MAX_FIX_AGE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timing(mut self, max_age: Duration, request_timeout: Duration) -> Self {
        self.max_age = max_age;
        self.request_timeout = request_timeout;
        self
    }

    pub fn report(&self, fix: Result<GeoPoint, LocationError>) {
        self.reports.send_replace(Some(PositionReport {
            fix,
            received_at: Instant::now(),
        }));
    }

    fn recent_fix(&self) -> Option<GeoPoint> {
        match self.reports.borrow().as_ref() {
            Some(PositionReport {
                fix: Ok(position),
                received_at,
            }) if received_at.elapsed() <= self.max_age => Some(*position),
            _ => None,
        }
    }
}

#[async_trait]
impl Geolocator for BridgeLocator {
    async fn current_position(&self) -> Result<GeoPoint, LocationError> {
        if let Some(position) = self.recent_fix() {
            return Ok(position);
        }

        let mut reports = self.reports.subscribe();
        debug!("requesting a fresh location fix");
        (self.notifier)();

        let answered = tokio::time::timeout(self.request_timeout, reports.changed()).await;
        match answered {
            Ok(Ok(())) => {
                let latest = reports.borrow_and_update().clone();
                latest.map(|report| report.fix).unwrap_or_else(|| {
                    Err(LocationError::Unavailable("no position reported".into()))
                })
            }
            Ok(Err(_)) => Err(LocationError::Unavailable("location bridge closed".into())),
            Err(_) => Err(LocationError::Timeout),
        }
    }
}

/// Always answers with the same fix; used when a kiosk is bolted to one spot.
pub struct StaticLocator(pub Result<GeoPoint, LocationError>);

#[async_trait]
impl Geolocator for StaticLocator {
    async fn current_position(&self) -> Result<GeoPoint, LocationError> {
        self.0.clone()
    }
}
