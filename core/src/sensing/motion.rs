//! Shake detection over raw accelerometer samples.
//!
//! A shake fires when the magnitude of a sample (gravity included) exceeds the
//! threshold and the previous detected shake is more than `timeout_ms` old.
//! Each shake raises a short `is_shaking` pulse that clears on its own.

use crate::clock::Clock;
use crate::interface::{MotionPermission, MotionSource};
use crate::math::StatsHelper;
use crate::prelude::MotionSample;
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::timer::PendingTimer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ShakeConfig {
    /// Minimum magnitude (m/s², gravity included) that counts as a shake.
    pub threshold: f64,
    /// Minimum spacing between two detected shakes.
    pub timeout_ms: u64,
    pub pulse_ms: u64,
    pub window_ms: u64,
    pub enabled: bool,
}

impl Default for ShakeConfig {
    fn default() -> Self {
        Self {
            threshold: 15.0,
            timeout_ms: 1000,
            pulse_ms: 500,
            window_ms: 100,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShakeEvent {
    pub timestamp_ms: u64,
    pub magnitude: f64,
    /// Largest magnitude seen in the sample window at detection time.
    pub peak_magnitude: f64,
    pub shake_count: u64,
    pub simulated: bool,
}

pub type ShakeHandler = Arc<dyn Fn(ShakeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionStart {
    Listening,
    AlreadyActive,
    Disabled,
    PermissionDenied,
    Unsupported,
}

#[derive(Default)]
struct Detector {
    last_shake_ms: Option<u64>,
    window: VecDeque<MotionSample>,
}

struct Shared {
    config: ShakeConfig,
    detector: Mutex<Detector>,
    shake_count: AtomicU64,
    is_shaking: Arc<AtomicBool>,
    pulse: PendingTimer,
    on_shake: Option<ShakeHandler>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

impl Shared {
    fn ingest(&self, sample: MotionSample) -> Option<ShakeEvent> {
        let magnitude = StatsHelper::magnitude(sample.axes());
        let now = sample.timestamp_ms;

        let peak = {
            let mut detector = self
                .detector
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            detector.window.push_back(sample);
            let window_ms = self.config.window_ms;
            detector
                .window
                .retain(|s| now.saturating_sub(s.timestamp_ms) < window_ms);

            if magnitude <= self.config.threshold {
                return None;
            }
            if let Some(last) = detector.last_shake_ms {
                if now.saturating_sub(last) <= self.config.timeout_ms {
                    return None;
                }
            }
            detector.last_shake_ms = Some(now);
            StatsHelper::peak(
                detector
                    .window
                    .iter()
                    .map(|s| StatsHelper::magnitude(s.axes())),
            )
        };

        Some(self.emit(now, magnitude, peak, false))
    }

    fn emit(
        &self,
        timestamp_ms: u64,
        magnitude: f64,
        peak_magnitude: f64,
        simulated: bool,
    ) -> ShakeEvent {
        let shake_count = self.shake_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.metrics.record_shake();
        self.is_shaking.store(true, Ordering::SeqCst);

        let flag = self.is_shaking.clone();
        self.pulse
            .schedule(Duration::from_millis(self.config.pulse_ms), async move {
                flag.store(false, Ordering::SeqCst);
            });

        let event = ShakeEvent {
            timestamp_ms,
            magnitude,
            peak_magnitude,
            shake_count,
            simulated,
        };
        self.logger.record(&format!(
            "shake #{} detected (magnitude {:.2}, simulated {})",
            shake_count, magnitude, simulated
        ));

        if let Some(handler) = &self.on_shake {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                self.logger.error("shake handler panicked; event dropped");
            }
        }
        event
    }
}

/// Turns a motion feed into shake events, with a manual trigger path that
/// works whether or not a sensor is available.
pub struct MotionSampler {
    shared: Arc<Shared>,
    listener: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    listening: AtomicBool,
}

impl MotionSampler {
    pub fn new(config: ShakeConfig, clock: Arc<dyn Clock>, metrics: Arc<MetricsRecorder>) -> Self {
        Self::build(config, None, clock, metrics)
    }

    pub fn with_handler(
        config: ShakeConfig,
        on_shake: ShakeHandler,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self::build(config, Some(on_shake), clock, metrics)
    }

    fn build(
        config: ShakeConfig,
        on_shake: Option<ShakeHandler>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                detector: Mutex::new(Detector::default()),
                shake_count: AtomicU64::new(0),
                is_shaking: Arc::new(AtomicBool::new(false)),
                pulse: PendingTimer::new(),
                on_shake,
                clock,
                metrics,
                logger: LogManager::new("motion"),
            }),
            listener: tokio::sync::Mutex::new(None),
            listening: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ShakeConfig {
        &self.shared.config
    }

    /// Asks for motion permission and starts listening. Calling it while a
    /// listener is already attached does nothing.
    pub async fn start(&self, source: Arc<dyn MotionSource>) -> MotionStart {
        if !self.shared.config.enabled {
            return MotionStart::Disabled;
        }
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return MotionStart::AlreadyActive;
        }

        match source.request_permission().await {
            MotionPermission::Granted => {}
            MotionPermission::Denied => {
                self.shared
                    .logger
                    .warn("motion permission denied; manual trigger remains available");
                return MotionStart::PermissionDenied;
            }
            MotionPermission::Unsupported => {
                self.shared
                    .logger
                    .warn("no motion sensor; manual trigger remains available");
                return MotionStart::Unsupported;
            }
        }

        let mut samples = match source.subscribe() {
            Ok(samples) => samples,
            Err(err) => {
                self.shared
                    .logger
                    .warn(&format!("motion subscription failed: {err}"));
                return MotionStart::Unsupported;
            }
        };

        let shared = self.shared.clone();
        *listener = Some(tokio::spawn(async move {
            while let Some(sample) = samples.recv().await {
                shared.ingest(sample);
            }
        }));
        self.listening.store(true, Ordering::SeqCst);
        self.shared.logger.record("listening for shakes");
        MotionStart::Listening
    }

    /// Detaches the listener. Safe to call repeatedly or before `start`.
    pub async fn stop(&self) {
        let handle = self.listener.lock().await.take();
        self.listening.store(false, Ordering::SeqCst);
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            self.shared.logger.record("stopped listening for shakes");
        }
    }

    /// Runs one sample through the detector.
    pub fn ingest(&self, sample: MotionSample) -> Option<ShakeEvent> {
        self.shared.ingest(sample)
    }

    /// Fires the shake path without sensor data. Does not touch the detection
    /// debounce, so it always produces exactly one event.
    pub fn simulate_shake(&self) -> ShakeEvent {
        let now = self.shared.clock.now_ms();
        self.shared.emit(now, 0.0, 0.0, true)
    }

    pub fn shake_count(&self) -> u64 {
        self.shared.shake_count.load(Ordering::SeqCst)
    }

    pub fn is_shaking(&self) -> bool {
        self.shared.is_shaking.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

pub fn magnitude(sample: &MotionSample) -> f64 {
    StatsHelper::magnitude(sample.axes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::interface::ScriptedMotion;

    fn sampler_with_counter(timeout_ms: u64) -> (MotionSampler, Arc<AtomicU64>) {
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        let sampler = MotionSampler::with_handler(
            ShakeConfig {
                timeout_ms,
                ..Default::default()
            },
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Arc::new(SystemClock),
            Arc::new(MetricsRecorder::new()),
        );
        (sampler, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn shake_requires_threshold_and_elapsed_timeout() {
        let (sampler, seen) = sampler_with_counter(1000);

        assert!(sampler.ingest(MotionSample::new(0.0, 0.0, 9.8, 0)).is_none());
        assert!(sampler.ingest(MotionSample::new(15.0, 0.0, 0.0, 10)).is_none());
        let first = sampler.ingest(MotionSample::new(12.0, 12.0, 9.8, 20)).unwrap();
        assert_eq!(first.shake_count, 1);
        assert!(sampler.ingest(MotionSample::new(20.0, 0.0, 0.0, 1020)).is_none());
        assert!(sampler.ingest(MotionSample::new(20.0, 0.0, 0.0, 1021)).is_some());

        assert_eq!(sampler.shake_count(), 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_axes_count_as_zero() {
        let (sampler, _) = sampler_with_counter(1000);
        let sample = MotionSample {
            x: None,
            y: Some(16.0),
            z: None,
            timestamp_ms: 5,
        };
        assert_eq!(magnitude(&sample), 16.0);
        assert!(sampler.ingest(sample).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn peak_covers_samples_suppressed_by_debounce() {
        let (sampler, _) = sampler_with_counter(1000);
        assert!(sampler.ingest(MotionSample::new(0.0, 16.0, 0.0, 0)).is_some());
        assert!(sampler.ingest(MotionSample::new(0.0, 40.0, 0.0, 500)).is_none());
        assert!(sampler.ingest(MotionSample::new(0.0, 30.0, 0.0, 1000)).is_none());
        let event = sampler.ingest(MotionSample::new(0.0, 18.0, 0.0, 1050)).unwrap();
        assert_eq!(event.magnitude, 18.0);
        assert_eq!(event.peak_magnitude, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn is_shaking_pulse_clears_after_delay() {
        let (sampler, _) = sampler_with_counter(1000);
        sampler.ingest(MotionSample::new(30.0, 0.0, 0.0, 100));
        assert!(sampler.is_shaking());
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(sampler.is_shaking());
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!sampler.is_shaking());
    }

    #[tokio::test(start_paused = true)]
    async fn simulate_shake_works_without_sensor() {
        let (sampler, seen) = sampler_with_counter(1000);
        let motion = Arc::new(ScriptedMotion::new(MotionPermission::Denied));
        assert_eq!(sampler.start(motion.clone()).await, MotionStart::PermissionDenied);
        assert!(!motion.is_listening());

        let first = sampler.simulate_shake();
        let second = sampler.simulate_shake();
        assert!(first.simulated);
        assert_eq!(second.shake_count, 2);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent_and_stop_detaches() {
        let (sampler, seen) = sampler_with_counter(1000);
        let motion = Arc::new(ScriptedMotion::new(MotionPermission::Granted));

        assert_eq!(sampler.start(motion.clone()).await, MotionStart::Listening);
        assert_eq!(sampler.start(motion.clone()).await, MotionStart::AlreadyActive);
        assert_eq!(motion.subscriptions(), 1);

        assert!(motion.emit(MotionSample::new(25.0, 0.0, 0.0, 10)));
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        sampler.stop().await;
        sampler.stop().await;
        assert!(!sampler.is_listening());
        assert!(!motion.is_listening());
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_escape() {
        let sampler = MotionSampler::with_handler(
            ShakeConfig::default(),
            Arc::new(|_| panic!("ui gone")),
            Arc::new(SystemClock),
            Arc::new(MetricsRecorder::new()),
        );
        assert!(sampler.ingest(MotionSample::new(30.0, 0.0, 0.0, 0)).is_some());
        assert_eq!(sampler.shake_count(), 1);
    }

    #[tokio::test]
    async fn disabled_sampler_never_subscribes() {
        let sampler = MotionSampler::new(
            ShakeConfig {
                enabled: false,
                ..Default::default()
            },
            Arc::new(SystemClock),
            Arc::new(MetricsRecorder::new()),
        );
        let motion = Arc::new(ScriptedMotion::new(MotionPermission::Granted));
        assert_eq!(sampler.start(motion.clone()).await, MotionStart::Disabled);
        assert_eq!(motion.subscriptions(), 0);
    }
}
