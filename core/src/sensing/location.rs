//! Position acquisition and the live-sharing publish loop.

use crate::clock::Clock;
use crate::interface::{FixOptions, GeolocationProvider, LocationPublisher, ShareRequest, WatchId};
use crate::math::GeoHelper;
use crate::prelude::{FixSource, LocationFix, SafetyError, SafetyResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::timer::PendingTimer;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FallbackLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
}

impl Default for FallbackLocation {
    fn default() -> Self {
        Self {
            latitude: 28.6139,
            longitude: 77.2090,
            address: "New Delhi, India".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub fix_timeout_ms: u64,
    pub max_fix_age_ms: u64,
    pub min_displacement_m: f64,
    pub publish_debounce_ms: u64,
    pub share_duration_hours: u32,
    pub fallback: FallbackLocation,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            fix_timeout_ms: 10_000,
            max_fix_age_ms: 60_000,
            min_displacement_m: 10.0,
            publish_debounce_ms: 5_000,
            share_duration_hours: 24,
            fallback: FallbackLocation::default(),
        }
    }
}

impl WatchConfig {
    pub fn fix_options(&self) -> FixOptions {
        FixOptions {
            high_accuracy: true,
            timeout: Duration::from_millis(self.fix_timeout_ms),
            maximum_age: Duration::from_millis(self.max_fix_age_ms),
        }
    }
}

/// One-shot fix that always yields a coordinate.
///
/// Permission errors, platform errors and timeouts all resolve to the
/// configured fallback location.
pub struct FixAcquirer {
    geolocation: Arc<dyn GeolocationProvider>,
    clock: Arc<dyn Clock>,
    config: WatchConfig,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl FixAcquirer {
    pub fn new(
        geolocation: Arc<dyn GeolocationProvider>,
        clock: Arc<dyn Clock>,
        config: WatchConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            geolocation,
            clock,
            config,
            metrics,
            logger: LogManager::new("location"),
        }
    }

    pub async fn current_fix(&self) -> LocationFix {
        let options = self.config.fix_options();
        let request = self.geolocation.current_fix(options);
        let result = tokio::time::timeout(options.timeout, request)
            .await
            .unwrap_or_else(|_| Err(SafetyError::Timeout("position request".into())));

        match result {
            Ok(fix) => fix.with_coordinate_address(),
            Err(err) => {
                self.logger.warn(&format!("using fallback location: {err}"));
                self.metrics.record_fallback();
                self.fallback_fix()
            }
        }
    }

    pub fn fallback_fix(&self) -> LocationFix {
        let fallback = &self.config.fallback;
        LocationFix {
            latitude: fallback.latitude,
            longitude: fallback.longitude,
            address: Some(fallback.address.clone()),
            accuracy: None,
            timestamp: self.clock.now(),
            source: FixSource::Fallback,
        }
    }
}

/// Who receives live updates and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShareTarget {
    pub contact_ids: Vec<String>,
    pub duration_hours: u32,
}

pub type FixHandler = Arc<dyn Fn(&LocationFix) + Send + Sync>;

struct WatchState {
    current: Option<LocationFix>,
    last_transmitted: Option<LocationFix>,
    /// Bumped by `stop_watch`; a publish started under an older value is stale.
    session: u64,
}

struct Inner {
    config: WatchConfig,
    publisher: Arc<dyn LocationPublisher>,
    state: Mutex<WatchState>,
    debounce: PendingTimer,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, WatchState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_significant(&self, fix: &LocationFix) -> bool {
        match &self.state().last_transmitted {
            Some(last) => {
                GeoHelper::haversine_m(last.latitude, last.longitude, fix.latitude, fix.longitude)
                    >= self.config.min_displacement_m
            }
            None => true,
        }
    }

    fn on_fix(
        self: &Arc<Self>,
        fix: LocationFix,
        target: &ShareTarget,
        handler: &Option<FixHandler>,
    ) {
        let fix = fix.with_coordinate_address();
        self.metrics.record_fix();
        self.state().current = Some(fix.clone());
        if let Some(handler) = handler {
            handler(&fix);
        }

        if !self.is_significant(&fix) {
            self.metrics.record_suppressed();
            return;
        }

        let inner = self.clone();
        let target = target.clone();
        let session = self.state().session;
        self.debounce.schedule(
            Duration::from_millis(self.config.publish_debounce_ms),
            async move { inner.publish(fix, target, session).await },
        );
    }

    async fn publish(&self, fix: LocationFix, target: ShareTarget, session: u64) {
        if target.contact_ids.is_empty() {
            self.logger
                .record("no recipients with email; skipping live update");
            return;
        }
        // Re-checked here: an earlier publish may have landed during the window.
        if !self.is_significant(&fix) {
            self.metrics.record_suppressed();
            return;
        }

        let request = ShareRequest {
            fix: fix.clone(),
            contact_ids: target.contact_ids,
            duration_hours: target.duration_hours,
            is_live_sharing: true,
        };
        match self.publisher.share_location(request).await {
            Ok(_) => {
                self.metrics.record_publish(true);
                let mut state = self.state();
                if state.session == session {
                    state.last_transmitted = Some(fix);
                }
            }
            Err(err) => {
                self.metrics.record_publish(false);
                self.logger
                    .warn(&format!("live location update failed: {err}"));
            }
        }
    }
}

struct ActiveWatch {
    id: WatchId,
    reader: JoinHandle<()>,
}

/// Continuous position feed with a minimum-displacement filter and a
/// debounced publish to the current share target.
pub struct LocationWatcher {
    geolocation: Arc<dyn GeolocationProvider>,
    acquirer: FixAcquirer,
    inner: Arc<Inner>,
    active: Mutex<Option<ActiveWatch>>,
}

impl LocationWatcher {
    pub fn new(
        geolocation: Arc<dyn GeolocationProvider>,
        publisher: Arc<dyn LocationPublisher>,
        clock: Arc<dyn Clock>,
        config: WatchConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let acquirer = FixAcquirer::new(
            geolocation.clone(),
            clock,
            config.clone(),
            metrics.clone(),
        );
        Self {
            geolocation,
            acquirer,
            inner: Arc::new(Inner {
                config,
                publisher,
                state: Mutex::new(WatchState {
                    current: None,
                    last_transmitted: None,
                    session: 0,
                }),
                debounce: PendingTimer::new(),
                metrics,
                logger: LogManager::new("location"),
            }),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.inner.config
    }

    pub async fn current_fix(&self) -> LocationFix {
        let fix = self.acquirer.current_fix().await;
        self.inner.state().current = Some(fix.clone());
        fix
    }

    /// Latest fix received from any source.
    pub fn latest(&self) -> Option<LocationFix> {
        self.inner.state().current.clone()
    }

    pub fn last_transmitted(&self) -> Option<LocationFix> {
        self.inner.state().last_transmitted.clone()
    }

    /// Marks a fix as already delivered, e.g. by an initial share.
    pub fn mark_transmitted(&self, fix: LocationFix) {
        self.inner.state().last_transmitted = Some(fix);
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveWatch>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_watching(&self) -> bool {
        self.active().is_some()
    }

    /// Starts the platform watch. Returns `false` when already watching.
    pub fn watch(&self, target: ShareTarget, on_update: Option<FixHandler>) -> SafetyResult<bool> {
        let mut active = self.active();
        if active.is_some() {
            return Ok(false);
        }
        let subscription = self.geolocation.watch()?;
        let mut fixes = subscription.fixes;
        let inner = self.inner.clone();
        let reader = tokio::spawn(async move {
            while let Some(fix) = fixes.recv().await {
                inner.on_fix(fix, &target, &on_update);
            }
        });
        *active = Some(ActiveWatch {
            id: subscription.id,
            reader,
        });
        self.inner.logger.record("location watch started");
        Ok(true)
    }

    /// Releases the platform watch and drops any pending publish.
    pub fn stop_watch(&self) {
        let watch = self.active().take();
        self.inner.debounce.cancel();
        if let Some(watch) = watch {
            watch.reader.abort();
            self.geolocation.clear_watch(watch.id);
            {
                let mut state = self.inner.state();
                state.last_transmitted = None;
                state.session += 1;
            }
            self.inner.logger.record("location watch stopped");
        }
    }
}

impl Drop for LocationWatcher {
    fn drop(&mut self) {
        self.stop_watch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::interface::memory::{FailurePlan, FixBehavior};
    use crate::interface::{RecordingBackend, ScriptedGeolocation};
    use chrono::Utc;

    const BASE: (f64, f64) = (17.3850, 78.4867);

    fn fix_at(north_m: f64) -> LocationFix {
        let (lat, lng) = GeoHelper::offset_m(BASE.0, BASE.1, north_m, 0.0);
        LocationFix::new(lat, lng, Utc::now())
    }

    fn target() -> ShareTarget {
        ShareTarget {
            contact_ids: vec!["c1".into()],
            duration_hours: 24,
        }
    }

    fn watcher(
        geo: &Arc<ScriptedGeolocation>,
        backend: &Arc<RecordingBackend>,
    ) -> LocationWatcher {
        LocationWatcher::new(
            geo.clone(),
            backend.clone(),
            Arc::new(SystemClock),
            WatchConfig::default(),
            Arc::new(MetricsRecorder::new()),
        )
    }

    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_resolves_to_fallback() {
        let geo = Arc::new(ScriptedGeolocation::new(FixBehavior::Hang));
        let backend = Arc::new(RecordingBackend::default());
        let fix = watcher(&geo, &backend).current_fix().await;
        assert!(fix.is_fallback());
        assert_eq!(fix.latitude, 28.6139);
        assert_eq!(fix.address.as_deref(), Some("New Delhi, India"));
    }

    #[tokio::test]
    async fn permission_error_resolves_to_fallback() {
        let geo = Arc::new(ScriptedGeolocation::new(FixBehavior::Fail(
            SafetyError::PermissionDenied("user blocked location".into()),
        )));
        let backend = Arc::new(RecordingBackend::default());
        assert!(watcher(&geo, &backend).current_fix().await.is_fallback());
    }

    #[tokio::test]
    async fn device_fix_gets_coordinate_address() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        let fix = watcher(&geo, &backend).current_fix().await;
        assert!(!fix.is_fallback());
        assert_eq!(fix.address.as_deref(), Some("17.385000, 78.486700"));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_inside_window_publishes_only_last_fix() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&geo, &backend);
        assert!(watcher.watch(target(), None).unwrap());

        for step in 1..=4 {
            geo.push_fix(fix_at(step as f64 * 50.0));
            settle(500).await;
        }
        settle(6_000).await;

        let shares = backend.shares();
        assert_eq!(shares.len(), 1);
        let expected = fix_at(200.0);
        assert_eq!(shares[0].fix.latitude, expected.latitude);
        assert!(shares[0].is_live_sharing);
        assert_eq!(shares[0].duration_hours, 24);
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_within_radius_of_transmitted_fix_is_suppressed() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&geo, &backend);
        watcher.watch(target(), None).unwrap();

        geo.push_fix(fix_at(0.0));
        settle(6_000).await;
        assert_eq!(backend.shares().len(), 1);

        geo.push_fix(fix_at(4.0));
        settle(6_000).await;
        geo.push_fix(fix_at(9.0));
        settle(6_000).await;
        assert_eq!(backend.shares().len(), 1);

        geo.push_fix(fix_at(25.0));
        settle(6_000).await;
        let shares = backend.shares();
        assert_eq!(shares.len(), 2);
        for pair in shares.windows(2) {
            let d = GeoHelper::haversine_m(
                pair[0].fix.latitude,
                pair[0].fix.longitude,
                pair[1].fix.latitude,
                pair[1].fix.longitude,
            );
            assert!(d >= 10.0);
        }
        assert_eq!(watcher.latest().unwrap().latitude, fix_at(25.0).latitude);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_publish_does_not_stop_watching() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        backend.set_failures(FailurePlan {
            share: true,
            ..Default::default()
        });
        let watcher = watcher(&geo, &backend);
        watcher.watch(target(), None).unwrap();

        geo.push_fix(fix_at(0.0));
        settle(6_000).await;
        backend.set_failures(FailurePlan::default());
        geo.push_fix(fix_at(3.0));
        settle(6_000).await;

        assert_eq!(backend.shares().len(), 2);
        assert!(watcher.is_watching());
        assert!(watcher.last_transmitted().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn watch_is_single_and_stop_is_idempotent() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&geo, &backend);

        watcher.stop_watch();
        assert!(watcher.watch(target(), None).unwrap());
        assert!(!watcher.watch(target(), None).unwrap());
        assert_eq!(geo.watch_calls(), 1);

        geo.push_fix(fix_at(100.0));
        watcher.stop_watch();
        watcher.stop_watch();
        settle(6_000).await;
        assert_eq!(geo.active_watches(), 0);
        assert!(backend.shares().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn publish_in_flight_at_stop_does_not_carry_into_next_watch() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        backend.set_share_delay(Some(Duration::from_secs(3)));
        let watcher = watcher(&geo, &backend);
        watcher.watch(target(), None).unwrap();

        geo.push_fix(fix_at(100.0));
        settle(5_500).await;
        watcher.stop_watch();
        settle(5_000).await;
        assert_eq!(backend.shares().len(), 1);
        assert!(watcher.last_transmitted().is_none());

        watcher.watch(target(), None).unwrap();
        geo.push_fix(fix_at(100.0));
        settle(9_000).await;
        assert_eq!(backend.shares().len(), 2);
        assert_eq!(
            watcher.last_transmitted().unwrap().latitude,
            fix_at(100.0).latitude
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_skips_publishing_but_reports_fixes() {
        let geo = Arc::new(ScriptedGeolocation::responding(fix_at(0.0)));
        let backend = Arc::new(RecordingBackend::default());
        let watcher = watcher(&geo, &backend);
        let seen = Arc::new(Mutex::new(0usize));
        let counter = seen.clone();
        watcher
            .watch(
                ShareTarget::default(),
                Some(Arc::new(move |_: &LocationFix| *counter.lock().unwrap() += 1)),
            )
            .unwrap();

        geo.push_fix(fix_at(0.0));
        geo.push_fix(fix_at(40.0));
        settle(6_000).await;
        assert_eq!(*seen.lock().unwrap(), 2);
        assert!(backend.shares().is_empty());
    }
}
