pub mod bridge;
pub mod orchestrator;

pub use bridge::{
    Channel, ChannelOutcome, ChannelResult, Delivery, DeliveryStatus, DeliverySummary,
    NotificationBridge,
};
pub use orchestrator::{
    AlertAttempt, AttemptStatus, EmergencyConfig, EmergencyOrchestrator, EmergencyStatus,
    TriggerOutcome,
};
