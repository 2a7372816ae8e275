//! The SOS sequence.
//!
//! `Idle → Countdown(n) | Pending → Sending → Sent | Failed → Idle`.
//! Location is always acquired before the alert is dispatched, and the
//! location update and push fan-out only start after the backend accepted the
//! alert. Only one run is active at a time.

use super::bridge::{Channel, ChannelOutcome, Delivery, DeliverySummary, NotificationBridge};
use crate::interface::{AlertReceipt, AlertRequest, PushRequest, SafetyServices};
use crate::prelude::{LocationFix, SafetyError, SafetyResult, TriggerMethod};
use crate::sensing::location::{FixAcquirer, WatchConfig};
use crate::sensing::motion::ShakeHandler;
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::timer::PendingTimer;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

pub const FAILED_MESSAGE: &str =
    "Could not send alert to contacts. Please try calling directly.";
const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmergencyConfig {
    pub countdown_secs: u32,
    pub shake_grace_ms: u64,
    pub cooldown_ms: u64,
    pub alert_timeout_ms: u64,
    pub user_name: String,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 5,
            shake_grace_ms: 5_000,
            cooldown_ms: 30_000,
            alert_timeout_ms: 20_000,
            user_name: "User".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum EmergencyStatus {
    Idle,
    Countdown {
        remaining: u32,
    },
    /// Shake detected; the alert goes out unless cancelled.
    Pending,
    Sending {
        attempt: u64,
        trigger: TriggerMethod,
    },
    Sent {
        attempt: u64,
        receipt: AlertReceipt,
        delivery: Option<DeliverySummary>,
    },
    Failed {
        attempt: u64,
        message: String,
    },
}

impl EmergencyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            EmergencyStatus::Idle => "idle",
            EmergencyStatus::Countdown { .. } => "countdown",
            EmergencyStatus::Pending => "pending",
            EmergencyStatus::Sending { .. } => "sending",
            EmergencyStatus::Sent { .. } => "sent",
            EmergencyStatus::Failed { .. } => "failed",
        }
    }

    /// Whether the SOS control should accept a new activation.
    pub fn is_idle(&self) -> bool {
        matches!(self, EmergencyStatus::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Countdown,
    Sending,
    Sent,
    Failed,
}

/// In-memory record of one SOS activation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertAttempt {
    pub id: u64,
    pub trigger_method: TriggerMethod,
    pub location: Option<LocationFix>,
    pub status: AttemptStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerOutcome {
    Started,
    Busy,
}

struct Inner {
    services: SafetyServices,
    config: EmergencyConfig,
    acquirer: FixAcquirer,
    bridge: NotificationBridge,
    status: watch::Sender<EmergencyStatus>,
    history: Mutex<VecDeque<&'static str>>,
    attempt: Mutex<Option<AlertAttempt>>,
    shake_timer: PendingTimer,
    next_attempt: AtomicU64,
    metrics: Arc<MetricsRecorder>,
    logger: LogManager,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn set(&self, status: EmergencyStatus) {
        self.note(status.label());
        self.status.send_replace(status);
    }

    fn note(&self, label: &'static str) {
        let mut history = lock(&self.history);
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(label);
    }

    /// Atomically leaves `Idle`; false when a run is already active.
    fn claim(&self, next: EmergencyStatus) -> bool {
        let label = next.label();
        let claimed = self.status.send_if_modified(|current| {
            if current.is_idle() {
                *current = next;
                true
            } else {
                false
            }
        });
        if claimed {
            self.note(label);
        }
        claimed
    }

    fn update_attempt(&self, update: impl FnOnce(&mut AlertAttempt)) {
        if let Some(attempt) = lock(&self.attempt).as_mut() {
            update(attempt);
        }
    }

    async fn run_countdown(self: Arc<Self>, attempt: u64) {
        // The claim already published the first tick.
        let ticks = self.config.countdown_secs;
        for remaining in (1..ticks).rev() {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.set(EmergencyStatus::Countdown { remaining });
        }
        if ticks > 0 {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.send_sequence(attempt, TriggerMethod::Button).await;
    }

    async fn dispatch(&self, request: AlertRequest) -> SafetyResult<AlertReceipt> {
        let timeout = Duration::from_millis(self.config.alert_timeout_ms);
        match tokio::time::timeout(timeout, self.services.alerts.send_alert(request)).await {
            Ok(result) => result,
            Err(_) => Err(SafetyError::Timeout("alert dispatch".into())),
        }
    }

    /// Opens a new attempt record in the countdown stage.
    fn open_attempt(&self, trigger: TriggerMethod) -> u64 {
        let attempt = self.next_attempt.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.attempt) = Some(AlertAttempt {
            id: attempt,
            trigger_method: trigger,
            location: None,
            status: AttemptStatus::Countdown,
        });
        attempt
    }

    async fn send_sequence(self: Arc<Self>, attempt: u64, trigger: TriggerMethod) {
        self.update_attempt(|a| a.status = AttemptStatus::Sending);
        self.set(EmergencyStatus::Sending { attempt, trigger });
        self.logger
            .record(&format!("SOS #{attempt} ({trigger:?}) acquiring location"));

        let fix = self.acquirer.current_fix().await;
        self.update_attempt(|a| a.location = Some(fix.clone()));

        let request = AlertRequest {
            trigger_method: trigger,
            location: Some(fix.clone()),
        };
        match self.dispatch(request).await {
            Ok(receipt) => {
                self.metrics.record_alert(true);
                self.logger.record(&format!(
                    "SOS #{attempt} accepted as {} ({} contacts notified)",
                    receipt.alert_id, receipt.contacts_notified
                ));
                self.update_attempt(|a| a.status = AttemptStatus::Sent);
                self.set(EmergencyStatus::Sent {
                    attempt,
                    receipt: receipt.clone(),
                    delivery: None,
                });
                tokio::spawn(self.clone().fan_out(attempt, receipt, fix));
            }
            Err(err) => {
                self.metrics.record_alert(false);
                self.logger
                    .error(&format!("SOS #{attempt} alert dispatch failed: {err}"));
                self.update_attempt(|a| a.status = AttemptStatus::Failed);
                self.set(EmergencyStatus::Failed {
                    attempt,
                    message: FAILED_MESSAGE.to_string(),
                });
            }
        }

        tokio::time::sleep(Duration::from_millis(self.config.cooldown_ms)).await;
        self.set(EmergencyStatus::Idle);
    }

    /// Best-effort follow-up after the backend accepted the alert. Neither
    /// branch can change the run's terminal status.
    async fn fan_out(self: Arc<Self>, attempt: u64, receipt: AlertReceipt, fix: LocationFix) {
        let update = async {
            if let Err(err) = self.services.locations.update_location(fix.clone()).await {
                self.logger
                    .warn(&format!("SOS #{attempt} location update failed: {err}"));
            }
        };
        let push = self.bridge.observe(Channel::Push, self.push_to_contacts(&fix));
        let ((), push_outcome) = tokio::join!(update, push);

        self.metrics.record_pushes(push_outcome.sent());
        let backend_outcome = ChannelOutcome::delivered(
            Channel::Backend,
            Delivery {
                sent: receipt.notifications_sent,
                failed: 0,
            },
        );
        let summary = self.bridge.summarize(vec![backend_outcome, push_outcome]);
        self.logger
            .record(&format!("SOS #{attempt} delivery: {}", summary.message));

        self.status.send_if_modified(|status| match status {
            EmergencyStatus::Sent {
                attempt: current,
                delivery,
                ..
            } if *current == attempt => {
                *delivery = Some(summary);
                true
            }
            _ => false,
        });
    }

    async fn push_to_contacts(&self, fix: &LocationFix) -> SafetyResult<Delivery> {
        let contacts = self.services.contacts.contacts().await?;
        let contact_emails: Vec<String> = contacts
            .iter()
            .filter(|c| c.is_trusted)
            .filter_map(|c| c.usable_email().map(str::to_string))
            .collect();
        if contact_emails.is_empty() {
            return Err(SafetyError::NoRecipients);
        }
        let receipt = self
            .services
            .push
            .send_emergency_push(PushRequest {
                user_name: self.config.user_name.clone(),
                location: Some(fix.clone()),
                contact_emails,
            })
            .await?;
        Ok(Delivery {
            sent: receipt.notifications_sent,
            failed: receipt.notifications_failed,
        })
    }
}

/// Device-wide SOS state machine. Cheap to clone; clones share one run.
#[derive(Clone)]
pub struct EmergencyOrchestrator {
    inner: Arc<Inner>,
}

impl EmergencyOrchestrator {
    pub fn new(
        services: SafetyServices,
        config: EmergencyConfig,
        watch_config: WatchConfig,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        let acquirer = FixAcquirer::new(
            services.geolocation.clone(),
            services.clock.clone(),
            watch_config,
            metrics.clone(),
        );
        let (status, _) = watch::channel(EmergencyStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                services,
                config,
                acquirer,
                bridge: NotificationBridge::new(),
                status,
                history: Mutex::new(VecDeque::new()),
                attempt: Mutex::new(None),
                shake_timer: PendingTimer::new(),
                next_attempt: AtomicU64::new(0),
                metrics,
                logger: LogManager::new("emergency"),
            }),
        }
    }

    pub fn config(&self) -> &EmergencyConfig {
        &self.inner.config
    }

    pub fn status(&self) -> EmergencyStatus {
        self.inner.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<EmergencyStatus> {
        self.inner.status.subscribe()
    }

    /// Labels of recent status transitions, oldest first.
    pub fn transitions(&self) -> Vec<&'static str> {
        lock(&self.inner.history).iter().copied().collect()
    }

    pub fn last_attempt(&self) -> Option<AlertAttempt> {
        lock(&self.inner.attempt).clone()
    }

    /// SOS button: visible countdown, then send.
    pub fn trigger_button(&self) -> TriggerOutcome {
        let ticks = self.inner.config.countdown_secs;
        if !self.inner.claim(EmergencyStatus::Countdown { remaining: ticks }) {
            self.inner.logger.record("SOS already active; button ignored");
            return TriggerOutcome::Busy;
        }
        let attempt = self.inner.open_attempt(TriggerMethod::Button);
        tokio::spawn(self.inner.clone().run_countdown(attempt));
        TriggerOutcome::Started
    }

    /// Shake gesture: cancellable grace window, then send.
    pub fn trigger_shake(&self) -> TriggerOutcome {
        if !self.inner.claim(EmergencyStatus::Pending) {
            self.inner.logger.record("SOS already active; shake ignored");
            return TriggerOutcome::Busy;
        }
        let attempt = self.inner.open_attempt(TriggerMethod::Shake);
        let inner = self.inner.clone();
        self.inner.shake_timer.schedule(
            Duration::from_millis(self.inner.config.shake_grace_ms),
            async move { inner.send_sequence(attempt, TriggerMethod::Shake).await },
        );
        self.inner.logger.record(&format!(
            "shake detected; alert in {} ms unless cancelled",
            self.inner.config.shake_grace_ms
        ));
        TriggerOutcome::Started
    }

    /// Cancels a pending shake-triggered alert before it starts sending.
    pub fn cancel_pending(&self) -> bool {
        if !matches!(self.status(), EmergencyStatus::Pending) {
            return false;
        }
        if !self.inner.shake_timer.cancel() {
            return false;
        }
        *lock(&self.inner.attempt) = None;
        self.inner.set(EmergencyStatus::Idle);
        self.inner.logger.record("pending shake alert cancelled");
        true
    }

    /// Handler for a [`crate::sensing::MotionSampler`] that routes shakes here.
    pub fn shake_handler(&self) -> ShakeHandler {
        let orchestrator = self.clone();
        Arc::new(move |_| {
            orchestrator.trigger_shake();
        })
    }
}
