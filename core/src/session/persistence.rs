use crate::clock::Clock;
use crate::interface::KeyValueStore;
use crate::prelude::{SafetyError, SafetyResult};
use crate::telemetry::LogManager;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const SESSION_KEY: &str = "suraksha_live_sharing";
pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    active: bool,
    started_at: DateTime<Utc>,
}

/// Whether live sharing should be showing as on, and since when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharingState {
    pub active: bool,
    pub started_at: Option<DateTime<Utc>>,
}

impl SharingState {
    pub fn inactive() -> Self {
        Self {
            active: false,
            started_at: None,
        }
    }

    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|start| now - start)
    }
}

/// Device-local "live sharing is on" flag that survives restarts and expires
/// on its own after [`SESSION_TTL_HOURS`]. UI state only; never an
/// authorization signal.
pub struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    logger: LogManager,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::hours(SESSION_TTL_HOURS),
            logger: LogManager::new("session"),
        }
    }

    /// `true` stamps a fresh record; `false` deletes it outright.
    pub fn save(&self, active: bool) -> SafetyResult<()> {
        if !active {
            return self.store.remove(SESSION_KEY);
        }
        let record = SessionRecord {
            active: true,
            started_at: self.clock.now(),
        };
        let body =
            serde_json::to_string(&record).map_err(|e| SafetyError::Storage(e.to_string()))?;
        self.store.set(SESSION_KEY, &body)
    }

    /// Reads the flag, deleting it when stale or unreadable.
    pub fn load(&self) -> SharingState {
        let raw = match self.store.get(SESSION_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return SharingState::inactive(),
            Err(err) => {
                self.logger
                    .warn(&format!("could not read sharing session: {err}"));
                return SharingState::inactive();
            }
        };

        let now = self.clock.now();
        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) if record.active && now - record.started_at < self.ttl => SharingState {
                active: true,
                started_at: Some(record.started_at),
            },
            Ok(_) => {
                self.logger.record("live sharing session expired, cleaned up");
                self.clear();
                SharingState::inactive()
            }
            Err(err) => {
                self.logger
                    .warn(&format!("discarding unreadable sharing session: {err}"));
                self.clear();
                SharingState::inactive()
            }
        }
    }

    fn clear(&self) {
        if let Err(err) = self.store.remove(SESSION_KEY) {
            self.logger
                .warn(&format!("could not clear sharing session: {err}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::interface::MemoryStore;

    fn fixture() -> (Arc<MemoryStore>, Arc<ManualClock>, SessionPersistence) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let persistence = SessionPersistence::new(store.clone(), clock.clone());
        (store, clock, persistence)
    }

    #[test]
    fn session_is_active_before_ttl() {
        let (_, clock, persistence) = fixture();
        let started = clock.now();
        persistence.save(true).unwrap();
        clock.advance(Duration::hours(23));

        let state = persistence.load();
        assert!(state.active);
        assert_eq!(state.started_at, Some(started));
        assert_eq!(state.elapsed(clock.now()), Some(Duration::hours(23)));
    }

    #[test]
    fn expired_session_is_inactive_and_cleared() {
        let (store, clock, persistence) = fixture();
        persistence.save(true).unwrap();
        clock.advance(Duration::hours(25));

        assert!(!persistence.load().active);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn exactly_ttl_counts_as_expired() {
        let (_, clock, persistence) = fixture();
        persistence.save(true).unwrap();
        clock.advance(Duration::hours(SESSION_TTL_HOURS));
        assert!(!persistence.load().active);
    }

    #[test]
    fn disabling_removes_record_without_tombstone() {
        let (store, _, persistence) = fixture();
        persistence.save(true).unwrap();
        persistence.save(false).unwrap();
        assert!(store.is_empty());
        assert_eq!(persistence.load(), SharingState::inactive());
    }

    #[test]
    fn unreadable_record_is_discarded() {
        let (store, _, persistence) = fixture();
        store.set(SESSION_KEY, "true").unwrap();
        assert!(!persistence.load().active);
        assert!(store.is_empty());
    }
}
