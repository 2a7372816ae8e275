use super::persistence::{SessionPersistence, SharingState};
use crate::emergency::bridge::{
    Channel, ChannelResult, Delivery, DeliverySummary, NotificationBridge,
};
use crate::interface::{SafetyServices, ShareRequest};
use crate::prelude::{LocationFix, SafetyError, SafetyResult, TrustedContact};
use crate::sensing::location::{LocationWatcher, ShareTarget, WatchConfig};
use crate::telemetry::{LogManager, MetricsRecorder};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharingOutcome {
    Started(DeliverySummary),
    AlreadyActive,
}

/// Ids of trusted, opted-in contacts that can receive email notifications.
pub fn recipient_ids(contacts: &[TrustedContact]) -> Vec<String> {
    contacts
        .iter()
        .filter(|c| c.is_recipient())
        .filter_map(|c| c.id.clone())
        .collect()
}

/// Live-sharing toggle: initial share, persisted session, continuous watch.
pub struct LiveSharing {
    services: SafetyServices,
    watcher: LocationWatcher,
    persistence: SessionPersistence,
    bridge: NotificationBridge,
    /// Held across `enable` and `resume` so only one can start the watch.
    starting: AsyncMutex<()>,
    logger: LogManager,
}

impl LiveSharing {
    pub fn new(services: SafetyServices, config: WatchConfig, metrics: Arc<MetricsRecorder>) -> Self {
        let watcher = LocationWatcher::new(
            services.geolocation.clone(),
            services.locations.clone(),
            services.clock.clone(),
            config,
            metrics,
        );
        let persistence = SessionPersistence::new(services.store.clone(), services.clock.clone());
        Self {
            services,
            watcher,
            persistence,
            bridge: NotificationBridge::new(),
            starting: AsyncMutex::new(()),
            logger: LogManager::new("session"),
        }
    }

    pub fn watcher(&self) -> &LocationWatcher {
        &self.watcher
    }

    async fn share_target(&self) -> ShareTarget {
        let contacts = match self.services.contacts.contacts().await {
            Ok(contacts) => contacts,
            Err(err) => {
                self.logger
                    .warn(&format!("could not load trusted contacts: {err}"));
                Vec::new()
            }
        };
        ShareTarget {
            contact_ids: recipient_ids(&contacts),
            duration_hours: self.watcher.config().share_duration_hours,
        }
    }

    async fn share_initial(
        &self,
        fix: &LocationFix,
        target: &ShareTarget,
    ) -> SafetyResult<Delivery> {
        let receipt = self
            .services
            .locations
            .share_location(ShareRequest {
                fix: fix.clone(),
                contact_ids: target.contact_ids.clone(),
                duration_hours: target.duration_hours,
                is_live_sharing: true,
            })
            .await?;
        let recipients = u32::try_from(target.contact_ids.len()).unwrap_or(u32::MAX);
        if recipients == 0 {
            return Err(SafetyError::NoRecipients);
        }
        let sent = if receipt.notifications_sent > 0 {
            receipt.notifications_sent
        } else {
            recipients
        };
        Ok(Delivery { sent, failed: 0 })
    }

    /// Shares the current fix with every recipient, then keeps sharing.
    /// On failure nothing is persisted and sharing stays off.
    pub async fn enable(&self) -> SafetyResult<SharingOutcome> {
        let _starting = self.starting.lock().await;
        if self.watcher.is_watching() {
            return Ok(SharingOutcome::AlreadyActive);
        }

        let fix = self.watcher.current_fix().await;
        let target = self.share_target().await;

        let outcome = self
            .bridge
            .observe(Channel::Share, self.share_initial(&fix, &target))
            .await;
        if matches!(outcome.result, ChannelResult::Failed { .. }) {
            return Err(SafetyError::Transport(
                "Could not share location with trusted contacts. Please try again.".into(),
            ));
        }
        let summary = self.bridge.summarize(vec![outcome]);

        if !self.watcher.watch(target, None)? {
            return Ok(SharingOutcome::AlreadyActive);
        }
        self.watcher.mark_transmitted(fix);
        if let Err(err) = self.persistence.save(true) {
            self.logger
                .warn(&format!("could not persist sharing session: {err}"));
        }
        self.logger
            .record(&format!("live sharing started: {}", summary.message));
        Ok(SharingOutcome::Started(summary))
    }

    pub fn disable(&self) {
        self.watcher.stop_watch();
        if let Err(err) = self.persistence.save(false) {
            self.logger
                .warn(&format!("could not clear sharing session: {err}"));
        }
        self.logger.record("live sharing stopped");
    }

    /// Restarts the watch for a session persisted before a restart.
    pub async fn resume(&self) -> SafetyResult<bool> {
        let _starting = self.starting.lock().await;
        if self.watcher.is_watching() || !self.persistence.load().active {
            return Ok(false);
        }
        let target = self.share_target().await;
        let started = self.watcher.watch(target, None)?;
        if started {
            self.logger.record("restored live sharing session");
        }
        Ok(started)
    }

    /// Persisted state; an expired session also stops the watch.
    pub fn state(&self) -> SharingState {
        let state = self.persistence.load();
        if !state.active && self.watcher.is_watching() {
            self.logger.record("sharing session expired; stopping watch");
            self.watcher.stop_watch();
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::emergency::bridge::DeliveryStatus;
    use crate::interface::memory::FailurePlan;
    use crate::interface::{KeyValueStore, MemoryStore, RecordingBackend, ScriptedGeolocation};
    use crate::math::GeoHelper;
    use crate::session::persistence::SESSION_KEY;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::time::Duration;

    fn contact(id: &str, email: Option<&str>, notifications_enabled: bool) -> TrustedContact {
        TrustedContact {
            id: Some(id.into()),
            name: id.to_uppercase(),
            phone: "1".into(),
            email: email.map(str::to_string),
            is_trusted: true,
            notifications_enabled,
        }
    }

    struct Fixture {
        backend: Arc<RecordingBackend>,
        geo: Arc<ScriptedGeolocation>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        sharing: LiveSharing,
    }

    fn fixture(contacts: Vec<TrustedContact>) -> Fixture {
        let backend = Arc::new(RecordingBackend::new(contacts));
        let geo = Arc::new(ScriptedGeolocation::responding(LocationFix::new(
            12.9716,
            77.5946,
            Utc::now(),
        )));
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let services = SafetyServices::from_backend(
            backend.clone(),
            geo.clone(),
            store.clone(),
            clock.clone(),
        );
        let sharing = LiveSharing::new(
            services,
            WatchConfig::default(),
            Arc::new(MetricsRecorder::new()),
        );
        Fixture {
            backend,
            geo,
            store,
            clock,
            sharing,
        }
    }

    #[test]
    fn recipients_need_email_and_opt_in() {
        let contacts = vec![
            contact("a", Some("a@example.com"), true),
            contact("b", Some("b@example.com"), false),
            contact("c", None, true),
        ];
        assert_eq!(recipient_ids(&contacts), vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn enable_shares_persists_and_watches() {
        let f = fixture(vec![contact("a", Some("a@example.com"), true)]);
        let outcome = f.sharing.enable().await.unwrap();
        let SharingOutcome::Started(summary) = outcome else {
            panic!("expected a fresh start");
        };
        assert_eq!(summary.status, DeliveryStatus::Success);
        assert_eq!(summary.notified, 1);
        assert_eq!(f.backend.shares().len(), 1);
        assert!(f.store.get(SESSION_KEY).unwrap().is_some());
        assert!(f.sharing.watcher().is_watching());
        assert!(f.sharing.state().active);
        assert_eq!(
            f.sharing.enable().await.unwrap(),
            SharingOutcome::AlreadyActive
        );

        // Same spot as the initial share: nothing new goes out.
        f.geo.push_fix(LocationFix::new(12.9716, 77.5946, Utc::now()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.backend.shares().len(), 1);

        let (lat, lng) = GeoHelper::offset_m(12.9716, 77.5946, 120.0, 0.0);
        f.geo.push_fix(LocationFix::new(lat, lng, Utc::now()));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(f.backend.shares().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_enables_share_once() {
        let f = fixture(vec![contact("a", Some("a@example.com"), true)]);
        f.backend.set_share_delay(Some(Duration::from_secs(2)));
        let (first, second) = tokio::join!(f.sharing.enable(), f.sharing.enable());
        let outcomes = [first.unwrap(), second.unwrap()];
        let started = outcomes
            .iter()
            .filter(|o| matches!(o, SharingOutcome::Started(_)))
            .count();
        assert_eq!(started, 1);
        assert!(outcomes.contains(&SharingOutcome::AlreadyActive));
        assert_eq!(f.backend.shares().len(), 1);
        assert_eq!(f.geo.watch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_recipients_still_starts_with_warning() {
        let f = fixture(vec![contact("a", None, true)]);
        let SharingOutcome::Started(summary) = f.sharing.enable().await.unwrap() else {
            panic!("expected a fresh start");
        };
        assert_eq!(summary.channels[0].result, ChannelResult::NoRecipients);
        assert_eq!(summary.status, DeliveryStatus::Partial);
        assert!(f.sharing.watcher().is_watching());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_share_leaves_sharing_off() {
        let f = fixture(vec![contact("a", Some("a@example.com"), true)]);
        f.backend.set_failures(FailurePlan {
            share: true,
            ..Default::default()
        });
        assert!(f.sharing.enable().await.is_err());
        assert!(!f.sharing.watcher().is_watching());
        assert!(f.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disable_stops_watch_and_clears_session() {
        let f = fixture(vec![contact("a", Some("a@example.com"), true)]);
        f.sharing.enable().await.unwrap();
        f.sharing.disable();
        f.sharing.disable();
        assert!(!f.sharing.watcher().is_watching());
        assert_eq!(f.geo.active_watches(), 0);
        assert!(f.store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_restores_unexpired_session_only() {
        let f = fixture(vec![contact("a", Some("a@example.com"), true)]);
        f.sharing.enable().await.unwrap();
        f.sharing.watcher().stop_watch();

        f.clock.advance(ChronoDuration::hours(2));
        assert!(f.sharing.resume().await.unwrap());
        assert!(!f.sharing.resume().await.unwrap());
        assert_eq!(f.backend.shares().len(), 1);

        f.clock.advance(ChronoDuration::hours(23));
        assert!(!f.sharing.state().active);
        assert!(!f.sharing.watcher().is_watching());
        assert!(!f.sharing.resume().await.unwrap());
    }
}
