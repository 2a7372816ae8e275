pub mod live_sharing;
pub mod persistence;

pub use live_sharing::{recipient_ids, LiveSharing, SharingOutcome};
pub use persistence::{SessionPersistence, SharingState, SESSION_KEY, SESSION_TTL_HOURS};
