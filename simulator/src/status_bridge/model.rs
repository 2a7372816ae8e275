use crate::workflow::runner::SafetyApp;
use serde::Serialize;
use surakshacore::emergency::EmergencyStatus;
use surakshacore::prelude::LocationFix;
use surakshacore::session::SharingState;
use surakshacore::telemetry::MetricsSnapshot;

/// Point-in-time view of the app served on `GET /status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusModel {
    pub emergency: EmergencyStatus,
    pub transitions: Vec<&'static str>,
    pub sharing: SharingState,
    pub watching: bool,
    pub last_fix: Option<LocationFix>,
    pub shake_count: u64,
    pub metrics: MetricsSnapshot,
}

impl StatusModel {
    pub fn capture(app: &SafetyApp) -> Self {
        Self {
            emergency: app.orchestrator.status(),
            transitions: app.orchestrator.transitions(),
            sharing: app.sharing.state(),
            watching: app.sharing.watcher().is_watching(),
            last_fix: app.sharing.watcher().latest(),
            shake_count: app.sampler.shake_count(),
            metrics: app.metrics.snapshot(),
        }
    }
}
