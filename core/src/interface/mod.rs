//! Boundary contracts for every platform and network collaborator.
//!
//! The core never touches a platform API directly; it is handed a
//! [`SafetyServices`] bundle at start-up and talks only to these traits.

pub mod file_store;
pub mod memory;
pub mod rest;
pub mod types;

use crate::clock::Clock;
use crate::prelude::{BoxFuture, LocationFix, MotionSample, SafetyResult, TrustedContact};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use file_store::JsonFileStore;
pub use memory::{MemoryStore, RecordingBackend, ScriptedGeolocation, ScriptedMotion};
pub use rest::{RestBackend, RestConfig};
pub use types::{
    AlertReceipt, AlertRequest, FixOptions, MotionPermission, PushReceipt, PushRequest,
    ShareReceipt, ShareRequest,
};

/// Identifier of an active platform position watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Live position feed. The watch stays registered until `clear_watch`.
pub struct WatchSubscription {
    pub id: WatchId,
    pub fixes: mpsc::Receiver<LocationFix>,
}

pub trait GeolocationProvider: Send + Sync {
    fn current_fix(&self, options: FixOptions) -> BoxFuture<'_, SafetyResult<LocationFix>>;
    fn watch(&self) -> SafetyResult<WatchSubscription>;
    fn clear_watch(&self, id: WatchId);
}

/// Accelerometer feed. Dropping the receiver detaches the listener.
pub trait MotionSource: Send + Sync {
    fn request_permission(&self) -> BoxFuture<'_, MotionPermission>;
    fn subscribe(&self) -> SafetyResult<mpsc::Receiver<MotionSample>>;
}

pub trait AlertDispatcher: Send + Sync {
    fn send_alert(&self, request: AlertRequest) -> BoxFuture<'_, SafetyResult<AlertReceipt>>;
}

pub trait LocationPublisher: Send + Sync {
    fn update_location(&self, fix: LocationFix) -> BoxFuture<'_, SafetyResult<()>>;
    fn share_location(&self, request: ShareRequest) -> BoxFuture<'_, SafetyResult<ShareReceipt>>;
}

pub trait PushNotifier: Send + Sync {
    fn send_emergency_push(&self, request: PushRequest)
        -> BoxFuture<'_, SafetyResult<PushReceipt>>;
}

pub trait ContactDirectory: Send + Sync {
    fn contacts(&self) -> BoxFuture<'_, SafetyResult<Vec<TrustedContact>>>;
}

/// Durable string key-value storage (browser local storage or a file).
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> SafetyResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> SafetyResult<()>;
    fn remove(&self, key: &str) -> SafetyResult<()>;
}

/// Every external capability, constructed once at application start.
#[derive(Clone)]
pub struct SafetyServices {
    pub geolocation: Arc<dyn GeolocationProvider>,
    pub alerts: Arc<dyn AlertDispatcher>,
    pub locations: Arc<dyn LocationPublisher>,
    pub push: Arc<dyn PushNotifier>,
    pub contacts: Arc<dyn ContactDirectory>,
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
}

impl SafetyServices {
    /// Wires a single backend object into every network-facing slot.
    pub fn from_backend<B>(
        backend: Arc<B>,
        geolocation: Arc<dyn GeolocationProvider>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self
    where
        B: AlertDispatcher + LocationPublisher + PushNotifier + ContactDirectory + 'static,
    {
        Self {
            geolocation,
            alerts: backend.clone(),
            locations: backend.clone(),
            push: backend.clone(),
            contacts: backend,
            store,
            clock,
        }
    }
}
