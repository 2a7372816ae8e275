use crate::prelude::{SafetyError, SafetyResult};
use crate::telemetry::LogManager;
use serde::Serialize;
use std::future::Future;

/// External channel that can notify contacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// SMS/email fan-out performed by the backend alert endpoint.
    Backend,
    Push,
    Share,
}

impl Channel {
    fn failure_message(self) -> &'static str {
        match self {
            Channel::Backend => "SMS/email notifications could not be sent",
            Channel::Push => "push notifications are unavailable",
            Channel::Share => "location could not be shared",
        }
    }
}

/// Counts reported by a channel that answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Delivery {
    pub sent: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChannelResult {
    Delivered { sent: u32, failed: u32 },
    NoRecipients,
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelOutcome {
    pub channel: Channel,
    pub result: ChannelResult,
}

impl ChannelOutcome {
    pub fn delivered(channel: Channel, delivery: Delivery) -> Self {
        Self {
            channel,
            result: ChannelResult::Delivered {
                sent: delivery.sent,
                failed: delivery.failed,
            },
        }
    }

    pub fn sent(&self) -> u32 {
        match self.result {
            ChannelResult::Delivered { sent, .. } => sent,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub status: DeliveryStatus,
    pub notified: u32,
    pub message: String,
    pub channels: Vec<ChannelOutcome>,
}

/// Turns raw channel results into one user-facing status.
#[derive(Debug, Clone, Copy)]
pub struct NotificationBridge {
    logger: LogManager,
}

impl NotificationBridge {
    pub fn new() -> Self {
        Self {
            logger: LogManager::new("bridge"),
        }
    }

    /// Awaits one channel call and catches its failure.
    pub async fn observe<F>(&self, channel: Channel, call: F) -> ChannelOutcome
    where
        F: Future<Output = SafetyResult<Delivery>>,
    {
        let result = match call.await {
            Ok(delivery) => ChannelResult::Delivered {
                sent: delivery.sent,
                failed: delivery.failed,
            },
            Err(SafetyError::NoRecipients) => {
                self.logger
                    .warn(&format!("{channel:?}: no contacts with a usable address"));
                ChannelResult::NoRecipients
            }
            Err(err) => {
                self.logger.error(&format!("{channel:?} channel failed: {err}"));
                ChannelResult::Failed {
                    message: channel.failure_message().to_string(),
                }
            }
        };
        ChannelOutcome { channel, result }
    }

    /// Any delivered notification keeps the status above `Failure`. A channel
    /// with no recipients makes it `Partial`, as does an action that reached
    /// nobody only because no contact has an address.
    pub fn summarize(&self, channels: Vec<ChannelOutcome>) -> DeliverySummary {
        let notified: u32 = channels.iter().map(ChannelOutcome::sent).sum();
        let missing_recipients = channels
            .iter()
            .any(|c| c.result == ChannelResult::NoRecipients);
        let any_failed = channels
            .iter()
            .any(|c| matches!(c.result, ChannelResult::Failed { .. }));

        let (status, message) = if notified == 0 && missing_recipients && !any_failed {
            (
                DeliveryStatus::Partial,
                "No trusted contacts have email addresses. Add email addresses to your trusted contacts.".to_string(),
            )
        } else if notified == 0 {
            (
                DeliveryStatus::Failure,
                "Could not notify your contacts. Please try calling directly.".to_string(),
            )
        } else if missing_recipients {
            (
                DeliveryStatus::Partial,
                format!(
                    "Notified {notified} contact(s). Some trusted contacts have no email address for notifications."
                ),
            )
        } else {
            (
                DeliveryStatus::Success,
                format!("Notified {notified} trusted contact(s)."),
            )
        };

        DeliverySummary {
            status,
            notified,
            message,
            channels,
        }
    }
}

impl Default for NotificationBridge {
    fn default() -> Self {
        Self::new()
    }
}
