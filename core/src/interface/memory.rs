//! In-process implementations of the capability traits.
//!
//! They record every call and can be told to fail, which is what the unit
//! tests and the scenario simulator drive the core with.

use super::types::{
    AlertReceipt, AlertRequest, FixOptions, MotionPermission, PushReceipt, PushRequest,
    ShareReceipt, ShareRequest,
};
use super::{
    AlertDispatcher, ContactDirectory, GeolocationProvider, KeyValueStore, LocationPublisher,
    MotionSource, PushNotifier, WatchId, WatchSubscription,
};
use crate::prelude::{
    BoxFuture, LocationFix, MotionSample, SafetyError, SafetyResult, TrustedContact,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

const FEED_CAPACITY: usize = 256;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> SafetyResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> SafetyResult<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> SafetyResult<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

/// How the scripted device answers a one-shot position request.
#[derive(Debug, Clone)]
pub enum FixBehavior {
    Respond(LocationFix),
    Fail(SafetyError),
    Hang,
}

/// Geolocation driven by the caller: one-shot answers are configured up front
/// and watch updates are pushed with [`ScriptedGeolocation::push_fix`].
pub struct ScriptedGeolocation {
    behavior: Mutex<FixBehavior>,
    watchers: Mutex<HashMap<u64, mpsc::Sender<LocationFix>>>,
    next_id: AtomicU64,
    watch_calls: AtomicU64,
    fix_requests: AtomicU64,
}

impl ScriptedGeolocation {
    pub fn new(behavior: FixBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            watchers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            watch_calls: AtomicU64::new(0),
            fix_requests: AtomicU64::new(0),
        }
    }

    pub fn responding(fix: LocationFix) -> Self {
        Self::new(FixBehavior::Respond(fix))
    }

    pub fn set_behavior(&self, behavior: FixBehavior) {
        *lock(&self.behavior) = behavior;
    }

    /// Delivers a fix to every open watch. Returns how many received it.
    pub fn push_fix(&self, fix: LocationFix) -> usize {
        let watchers = lock(&self.watchers);
        watchers
            .values()
            .filter(|tx| tx.try_send(fix.clone()).is_ok())
            .count()
    }

    pub fn active_watches(&self) -> usize {
        lock(&self.watchers).len()
    }

    pub fn watch_calls(&self) -> u64 {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub fn fix_requests(&self) -> u64 {
        self.fix_requests.load(Ordering::SeqCst)
    }
}

impl GeolocationProvider for ScriptedGeolocation {
    fn current_fix(&self, _options: FixOptions) -> BoxFuture<'_, SafetyResult<LocationFix>> {
        self.fix_requests.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.behavior).clone();
        Box::pin(async move {
            match behavior {
                FixBehavior::Respond(fix) => Ok(fix),
                FixBehavior::Fail(err) => Err(err),
                FixBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn watch(&self) -> SafetyResult<WatchSubscription> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        lock(&self.watchers).insert(id, tx);
        Ok(WatchSubscription {
            id: WatchId(id),
            fixes: rx,
        })
    }

    fn clear_watch(&self, id: WatchId) {
        lock(&self.watchers).remove(&id.0);
    }
}

/// Accelerometer driven by the caller through [`ScriptedMotion::emit`].
pub struct ScriptedMotion {
    permission: MotionPermission,
    sink: Mutex<Option<mpsc::Sender<MotionSample>>>,
    subscriptions: AtomicU64,
}

impl ScriptedMotion {
    pub fn new(permission: MotionPermission) -> Self {
        Self {
            permission,
            sink: Mutex::new(None),
            subscriptions: AtomicU64::new(0),
        }
    }

    /// Returns false when nobody is listening.
    pub fn emit(&self, sample: MotionSample) -> bool {
        match lock(&self.sink).as_ref() {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.sink)
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn subscriptions(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

impl MotionSource for ScriptedMotion {
    fn request_permission(&self) -> BoxFuture<'_, MotionPermission> {
        let permission = self.permission;
        Box::pin(async move { permission })
    }

    fn subscribe(&self) -> SafetyResult<mpsc::Receiver<MotionSample>> {
        if self.permission == MotionPermission::Unsupported {
            return Err(SafetyError::Unsupported("no motion sensor".into()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        *lock(&self.sink) = Some(tx);
        Ok(rx)
    }
}

/// Which backend calls should reject.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePlan {
    pub alert: bool,
    pub update_location: bool,
    pub share: bool,
    pub push: bool,
    pub contacts: bool,
}

#[derive(Debug, Default)]
struct Calls {
    alerts: Vec<AlertRequest>,
    updates: Vec<LocationFix>,
    shares: Vec<ShareRequest>,
    pushes: Vec<PushRequest>,
}

/// Backend stand-in covering alert, location, push and contact endpoints.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    contacts: Mutex<Vec<TrustedContact>>,
    failures: Mutex<FailurePlan>,
    alert_delay: Mutex<Option<Duration>>,
    share_delay: Mutex<Option<Duration>>,
    calls: Mutex<Calls>,
}

impl RecordingBackend {
    pub fn new(contacts: Vec<TrustedContact>) -> Self {
        Self {
            contacts: Mutex::new(contacts),
            ..Default::default()
        }
    }

    pub fn set_failures(&self, plan: FailurePlan) {
        *lock(&self.failures) = plan;
    }

    pub fn set_alert_delay(&self, delay: Option<Duration>) {
        *lock(&self.alert_delay) = delay;
    }

    pub fn set_share_delay(&self, delay: Option<Duration>) {
        *lock(&self.share_delay) = delay;
    }

    pub fn set_contacts(&self, contacts: Vec<TrustedContact>) {
        *lock(&self.contacts) = contacts;
    }

    pub fn alerts(&self) -> Vec<AlertRequest> {
        lock(&self.calls).alerts.clone()
    }

    pub fn location_updates(&self) -> Vec<LocationFix> {
        lock(&self.calls).updates.clone()
    }

    pub fn shares(&self) -> Vec<ShareRequest> {
        lock(&self.calls).shares.clone()
    }

    pub fn pushes(&self) -> Vec<PushRequest> {
        lock(&self.calls).pushes.clone()
    }

    fn failures(&self) -> FailurePlan {
        *lock(&self.failures)
    }
}

impl AlertDispatcher for RecordingBackend {
    fn send_alert(&self, request: AlertRequest) -> BoxFuture<'_, SafetyResult<AlertReceipt>> {
        Box::pin(async move {
            let delay = *lock(&self.alert_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let count = {
                let mut calls = lock(&self.calls);
                calls.alerts.push(request);
                calls.alerts.len()
            };
            if self.failures().alert {
                return Err(SafetyError::Transport("alert endpoint unavailable".into()));
            }
            let contacts = lock(&self.contacts);
            let trusted = contacts.iter().filter(|c| c.is_trusted).count();
            let reachable = contacts.iter().filter(|c| c.is_recipient()).count();
            Ok(AlertReceipt {
                alert_id: format!("alert-{count}"),
                contacts_notified: u32::try_from(trusted).unwrap_or(u32::MAX),
                notifications_sent: u32::try_from(reachable).unwrap_or(u32::MAX),
            })
        })
    }
}

impl LocationPublisher for RecordingBackend {
    fn update_location(&self, fix: LocationFix) -> BoxFuture<'_, SafetyResult<()>> {
        Box::pin(async move {
            lock(&self.calls).updates.push(fix);
            if self.failures().update_location {
                return Err(SafetyError::Transport("location update rejected".into()));
            }
            Ok(())
        })
    }

    fn share_location(&self, request: ShareRequest) -> BoxFuture<'_, SafetyResult<ShareReceipt>> {
        Box::pin(async move {
            let delay = *lock(&self.share_delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let sent = u32::try_from(request.contact_ids.len()).unwrap_or(u32::MAX);
            lock(&self.calls).shares.push(request);
            if self.failures().share {
                return Err(SafetyError::Transport("share endpoint unavailable".into()));
            }
            Ok(ShareReceipt {
                notifications_sent: sent,
            })
        })
    }
}

impl PushNotifier for RecordingBackend {
    fn send_emergency_push(
        &self,
        request: PushRequest,
    ) -> BoxFuture<'_, SafetyResult<PushReceipt>> {
        Box::pin(async move {
            let sent = u32::try_from(request.contact_emails.len()).unwrap_or(u32::MAX);
            lock(&self.calls).pushes.push(request);
            if self.failures().push {
                return Err(SafetyError::Transport("push service not initialized".into()));
            }
            Ok(PushReceipt {
                notifications_sent: sent,
                notifications_failed: 0,
            })
        })
    }
}

impl ContactDirectory for RecordingBackend {
    fn contacts(&self) -> BoxFuture<'_, SafetyResult<Vec<TrustedContact>>> {
        Box::pin(async move {
            if self.failures().contacts {
                return Err(SafetyError::Transport("contacts unavailable".into()));
            }
            Ok(lock(&self.contacts).clone())
        })
    }
}
