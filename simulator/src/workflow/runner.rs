use crate::generator::profile::{build_motion_trace, build_track};
use crate::workflow::config::ScenarioConfig;
use anyhow::Context;
use chrono::Utc;
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use surakshacore::clock::{Clock, SystemClock};
use surakshacore::emergency::{
    DeliverySummary, EmergencyOrchestrator, EmergencyStatus, TriggerOutcome,
};
use surakshacore::interface::{
    JsonFileStore, KeyValueStore, MemoryStore, MotionPermission, RecordingBackend, RestBackend,
    RestConfig, SafetyServices, ScriptedGeolocation, ScriptedMotion,
};
use surakshacore::prelude::{LocationFix, TriggerMethod};
use surakshacore::sensing::MotionSampler;
use surakshacore::session::{LiveSharing, SharingOutcome};
use surakshacore::telemetry::{MetricsRecorder, MetricsSnapshot};

/// Where network calls go.
#[derive(Debug, Clone)]
pub enum BackendMode {
    Offline,
    Rest(RestConfig),
}

/// Every core component wired once, with scripted device sensors.
pub struct SafetyApp {
    pub services: SafetyServices,
    pub geolocation: Arc<ScriptedGeolocation>,
    pub motion: Arc<ScriptedMotion>,
    pub recording: Option<Arc<RecordingBackend>>,
    pub orchestrator: EmergencyOrchestrator,
    pub sampler: MotionSampler,
    pub sharing: LiveSharing,
    pub metrics: Arc<MetricsRecorder>,
}

impl SafetyApp {
    pub fn build(config: &ScenarioConfig, mode: BackendMode) -> anyhow::Result<Self> {
        let start = LocationFix::new(
            config.track.start_latitude,
            config.track.start_longitude,
            Utc::now(),
        )
        .with_accuracy(config.track.accuracy_m);
        let geolocation = Arc::new(ScriptedGeolocation::responding(start));
        let motion = Arc::new(ScriptedMotion::new(MotionPermission::Granted));
        let store: Arc<dyn KeyValueStore> = match &config.store_path {
            Some(path) => Arc::new(JsonFileStore::new(path)),
            None => Arc::new(MemoryStore::new()),
        };
        let clock = Arc::new(SystemClock);

        let (services, recording) = match mode {
            BackendMode::Offline => {
                let backend = Arc::new(RecordingBackend::new(config.contacts.clone()));
                backend.set_failures(config.failures);
                let services = SafetyServices::from_backend(
                    backend.clone(),
                    geolocation.clone(),
                    store,
                    clock,
                );
                (services, Some(backend))
            }
            BackendMode::Rest(rest) => {
                if config.failures != Default::default() {
                    warn!("failure injection only applies to offline runs; ignoring");
                }
                info!("using backend at {}", rest.base_url);
                let backend = Arc::new(RestBackend::new(rest).context("building REST backend")?);
                let services =
                    SafetyServices::from_backend(backend, geolocation.clone(), store, clock);
                (services, None)
            }
        };

        let metrics = Arc::new(MetricsRecorder::new());
        let orchestrator = EmergencyOrchestrator::new(
            services.clone(),
            config.emergency.clone(),
            config.watch.clone(),
            metrics.clone(),
        );
        let sampler = MotionSampler::with_handler(
            config.shake.clone(),
            orchestrator.shake_handler(),
            services.clock.clone(),
            metrics.clone(),
        );
        let sharing = LiveSharing::new(services.clone(), config.watch.clone(), metrics.clone());

        Ok(Self {
            services,
            geolocation,
            motion,
            recording,
            orchestrator,
            sampler,
            sharing,
            metrics,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SosReport {
    pub trigger: TriggerMethod,
    pub status: EmergencyStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingReport {
    pub resumed: bool,
    pub initial: Option<DeliverySummary>,
    pub error: Option<String>,
    pub active_at_end: bool,
    pub last_transmitted: Option<LocationFix>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub motion: String,
    pub shakes: u64,
    pub sos: Vec<SosReport>,
    pub sharing: Option<SharingReport>,
    pub metrics: MetricsSnapshot,
}

impl ScenarioResult {
    pub fn summary_line(&self) -> String {
        let sos: Vec<&str> = self.sos.iter().map(|r| r.status.label()).collect();
        format!(
            "scenario={} motion={} shakes={} sos={:?} publishes={} alerts_sent={} pushes={}",
            self.scenario,
            self.motion,
            self.shakes,
            sos,
            self.metrics.publishes_sent,
            self.metrics.alerts_sent,
            self.metrics.pushes_sent
        )
    }
}

#[derive(Clone)]
pub struct Runner {
    config: ScenarioConfig,
    app: Arc<SafetyApp>,
}

impl Runner {
    pub fn new(config: ScenarioConfig, mode: BackendMode) -> anyhow::Result<Self> {
        let app = Arc::new(SafetyApp::build(&config, mode)?);
        Ok(Self { config, app })
    }

    pub fn app(&self) -> Arc<SafetyApp> {
        self.app.clone()
    }

    /// Motion trace → shake SOS, optional button SOS, then live sharing over
    /// the generated track.
    pub async fn execute(&self) -> anyhow::Result<ScenarioResult> {
        let app = &self.app;
        let motion = app.sampler.start(app.motion.clone()).await;
        info!("motion sampler: {motion:?}");

        let trace = build_motion_trace(&self.config.motion, app.services.clock.now_ms())
            .context("building motion trace")?;
        let interval = Duration::from_millis(self.config.motion.interval_ms());
        for sample in trace {
            app.motion.emit(sample);
            tokio::time::sleep(interval).await;
        }
        app.sampler.stop().await;

        let mut sos = Vec::new();
        if !app.orchestrator.status().is_idle() {
            sos.push(self.await_settled(TriggerMethod::Shake).await?);
        }
        if self.config.button_sos {
            self.await_idle().await?;
            if app.orchestrator.trigger_button() == TriggerOutcome::Started {
                sos.push(self.await_settled(TriggerMethod::Button).await?);
            }
        }

        let sharing = if self.config.live_sharing {
            Some(self.run_sharing().await)
        } else {
            None
        };

        Ok(ScenarioResult {
            scenario: self.config.name.clone(),
            motion: format!("{motion:?}"),
            shakes: app.sampler.shake_count(),
            sos,
            sharing,
            metrics: app.metrics.snapshot(),
        })
    }

    async fn await_settled(&self, trigger: TriggerMethod) -> anyhow::Result<SosReport> {
        let config = self.app.orchestrator.config();
        let budget = Duration::from_millis(config.shake_grace_ms + config.alert_timeout_ms)
            + Duration::from_secs(u64::from(config.countdown_secs) + 10);
        let mut updates = self.app.orchestrator.subscribe();
        let status = tokio::time::timeout(
            budget,
            updates.wait_for(|status| {
                matches!(
                    status,
                    EmergencyStatus::Sent {
                        delivery: Some(_),
                        ..
                    } | EmergencyStatus::Failed { .. }
                )
            }),
        )
        .await
        .context("SOS run did not settle in time")?
        .context("orchestrator status channel closed")?
        .clone();
        info!("{trigger:?} SOS settled as {}", status.label());
        Ok(SosReport { trigger, status })
    }

    async fn await_idle(&self) -> anyhow::Result<()> {
        let wait = Duration::from_millis(self.app.orchestrator.config().cooldown_ms)
            + Duration::from_secs(5);
        let mut updates = self.app.orchestrator.subscribe();
        tokio::time::timeout(wait, updates.wait_for(EmergencyStatus::is_idle))
            .await
            .context("SOS did not return to idle")?
            .context("orchestrator status channel closed")?;
        Ok(())
    }

    async fn run_sharing(&self) -> SharingReport {
        let sharing = &self.app.sharing;
        let mut report = SharingReport::default();

        match sharing.resume().await {
            Ok(resumed) => report.resumed = resumed,
            Err(err) => warn!("could not resume sharing: {err}"),
        }
        if !report.resumed {
            match sharing.enable().await {
                Ok(SharingOutcome::Started(summary)) => report.initial = Some(summary),
                Ok(SharingOutcome::AlreadyActive) => {}
                Err(err) => {
                    warn!("live sharing did not start: {err}");
                    report.error = Some(err.to_string());
                    return report;
                }
            }
        }

        let mut elapsed = 0;
        for point in build_track(&self.config.track, Utc::now()) {
            tokio::time::sleep(Duration::from_millis(point.offset_ms - elapsed)).await;
            elapsed = point.offset_ms;
            self.app.geolocation.push_fix(point.fix);
        }
        let flush = self.config.watch.publish_debounce_ms + 500;
        tokio::time::sleep(Duration::from_millis(flush)).await;

        report.active_at_end = sharing.state().active;
        report.last_transmitted = sharing.watcher().last_transmitted();
        if self.config.stop_sharing {
            sharing.disable();
        }
        report
    }
}
