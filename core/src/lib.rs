//! Client-side safety core for SURAKSHA.
//!
//! Shake detection, location acquisition and live sharing, and the emergency
//! alert state machine. Every platform or network capability sits behind a
//! trait in [`interface`] and is injected once through [`SafetyServices`].

pub mod clock;
pub mod emergency;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod sensing;
pub mod session;
pub mod telemetry;
pub mod timer;

pub use emergency::{EmergencyConfig, EmergencyOrchestrator, EmergencyStatus, TriggerOutcome};
pub use interface::SafetyServices;
pub use prelude::{LocationFix, MotionSample, SafetyError, SafetyResult, TrustedContact};
pub use sensing::{LocationWatcher, MotionSampler, ShakeConfig, WatchConfig};
pub use session::{LiveSharing, SessionPersistence, SharingState};
