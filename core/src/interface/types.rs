use crate::prelude::{LocationFix, TriggerMethod};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for a one-shot position request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl Default for FixOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::from_secs(60),
        }
    }
}

/// Outcome of the platform motion-permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionPermission {
    Granted,
    Denied,
    Unsupported,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    pub trigger_method: TriggerMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertReceipt {
    #[serde(default)]
    pub alert_id: String,
    #[serde(default)]
    pub contacts_notified: u32,
    #[serde(default)]
    pub notifications_sent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    #[serde(flatten)]
    pub fix: LocationFix,
    pub contact_ids: Vec<String>,
    #[serde(rename = "duration")]
    pub duration_hours: u32,
    pub is_live_sharing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ShareReceipt {
    #[serde(default)]
    pub notifications_sent: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<LocationFix>,
    pub contact_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    #[serde(default)]
    pub notifications_sent: u32,
    #[serde(default)]
    pub notifications_failed: u32,
}
