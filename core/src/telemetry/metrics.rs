use serde::Serialize;
use std::sync::Mutex;

/// Process-lifetime counters shared by the safety components.
pub struct MetricsRecorder {
    inner: Mutex<MetricsSnapshot>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub shakes: u64,
    pub fixes_received: u64,
    pub fixes_suppressed: u64,
    pub fallback_fixes: u64,
    pub publishes_sent: u64,
    pub publish_failures: u64,
    pub alerts_sent: u64,
    pub alerts_failed: u64,
    pub pushes_sent: u64,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot::default()),
        }
    }

    fn bump(&self, update: impl FnOnce(&mut MetricsSnapshot)) {
        if let Ok(mut metrics) = self.inner.lock() {
            update(&mut metrics);
        }
    }

    pub fn record_shake(&self) {
        self.bump(|m| m.shakes += 1);
    }

    pub fn record_fix(&self) {
        self.bump(|m| m.fixes_received += 1);
    }

    pub fn record_suppressed(&self) {
        self.bump(|m| m.fixes_suppressed += 1);
    }

    pub fn record_fallback(&self) {
        self.bump(|m| m.fallback_fixes += 1);
    }

    pub fn record_publish(&self, ok: bool) {
        self.bump(|m| {
            if ok {
                m.publishes_sent += 1;
            } else {
                m.publish_failures += 1;
            }
        });
    }

    pub fn record_alert(&self, ok: bool) {
        self.bump(|m| {
            if ok {
                m.alerts_sent += 1;
            } else {
                m.alerts_failed += 1;
            }
        });
    }

    pub fn record_pushes(&self, sent: u32) {
        self.bump(|m| m.pushes_sent += u64::from(sent));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        if let Ok(metrics) = self.inner.lock() {
            *metrics
        } else {
            MetricsSnapshot::default()
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
