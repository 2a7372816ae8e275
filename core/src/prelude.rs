use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every async capability so implementations can sit
/// behind `Arc<dyn Trait>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// How an SOS run was started.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMethod {
    Button,
    Shake,
}

/// Where a [`LocationFix`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FixSource {
    #[default]
    Device,
    Fallback,
}

/// A single geolocation reading. Always replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: FixSource,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            address: None,
            accuracy: None,
            timestamp,
            source: FixSource::Device,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Fills a missing address with the coordinates at six decimals.
    pub fn with_coordinate_address(mut self) -> Self {
        if self.address.is_none() {
            self.address = Some(format!("{:.6}, {:.6}", self.latitude, self.longitude));
        }
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.source == FixSource::Fallback
    }
}

/// One raw accelerometer event including gravity. Axes the platform failed to
/// report are `None` and count as zero.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct MotionSample {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub timestamp_ms: u64,
}

impl MotionSample {
    pub fn new(x: f64, y: f64, z: f64, timestamp_ms: u64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
            timestamp_ms,
        }
    }

    pub fn axes(&self) -> [f64; 3] {
        [
            self.x.unwrap_or(0.0),
            self.y.unwrap_or(0.0),
            self.z.unwrap_or(0.0),
        ]
    }
}

/// Contact record owned by the backend; read-only on the device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrustedContact {
    #[serde(default, alias = "_id")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub is_trusted: bool,
    #[serde(default = "default_notifications_enabled")]
    pub notifications_enabled: bool,
}

fn default_notifications_enabled() -> bool {
    true
}

impl TrustedContact {
    /// Non-blank email, if any.
    pub fn usable_email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }

    /// Trusted, opted in to notifications, and reachable by email.
    pub fn is_recipient(&self) -> bool {
        self.is_trusted && self.notifications_enabled && self.usable_email().is_some()
    }
}

/// Error taxonomy shared by every component of the core.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SafetyError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("no recipients with a usable address")]
    NoRecipients,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type SafetyResult<T> = Result<T, SafetyError>;
