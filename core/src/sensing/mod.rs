pub mod location;
pub mod motion;

pub use location::{FixAcquirer, LocationWatcher, ShareTarget, WatchConfig};
pub use motion::{MotionSampler, MotionStart, ShakeConfig, ShakeEvent};
