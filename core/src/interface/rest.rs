use super::types::{
    AlertReceipt, AlertRequest, PushReceipt, PushRequest, ShareReceipt, ShareRequest,
};
use super::{AlertDispatcher, ContactDirectory, LocationPublisher, PushNotifier};
use crate::prelude::{BoxFuture, LocationFix, SafetyError, SafetyResult, TrustedContact};
use crate::telemetry::LogManager;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/api";
const DEFAULT_ACCURACY_M: f64 = 10.0;

/// Connection settings for the SURAKSHA backend API.
#[derive(Debug, Clone, PartialEq)]
pub struct RestConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(15),
        }
    }
}

impl RestConfig {
    /// Reads `SURAKSHA_API_BASE_URL` and `SURAKSHA_AUTH_TOKEN`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("SURAKSHA_API_BASE_URL") {
            if !url.trim().is_empty() {
                config.base_url = url;
            }
        }
        config.token = std::env::var("SURAKSHA_AUTH_TOKEN")
            .ok()
            .filter(|token| !token.trim().is_empty());
        config
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// REST client implementing every network capability the core consumes.
pub struct RestBackend {
    client: reqwest::Client,
    config: RestConfig,
    logger: LogManager,
}

#[derive(Deserialize)]
struct ContactsPayload {
    #[serde(default)]
    contacts: Vec<TrustedContact>,
}

#[derive(Deserialize)]
struct Ack {}

/// Unwraps the `{success, error?, ...payload}` envelope used by every endpoint.
pub fn decode_envelope<T: DeserializeOwned>(http_ok: bool, body: &str) -> SafetyResult<T> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| SafetyError::Transport(format!("malformed response: {e}")))?;
    let success = value
        .get("success")
        .and_then(Value::as_bool)
        .unwrap_or(http_ok);
    if !http_ok || !success {
        let message = value
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Request failed");
        return Err(SafetyError::Transport(message.to_string()));
    }
    serde_json::from_value(value)
        .map_err(|e| SafetyError::Transport(format!("unexpected response shape: {e}")))
}

impl RestBackend {
    pub fn new(config: RestConfig) -> SafetyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SafetyError::Transport(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            config,
            logger: LogManager::new("rest"),
        })
    }

    pub fn config(&self) -> &RestConfig {
        &self.config
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> SafetyResult<T> {
        let url = self.config.endpoint(path);
        let mut builder = self.client.request(method, &url);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }
        let response = builder.send().await.map_err(|e| {
            self.logger.warn(&format!("request to {url} failed: {e}"));
            if e.is_timeout() {
                SafetyError::Timeout(format!("{path} did not answer in time"))
            } else {
                SafetyError::Transport(e.to_string())
            }
        })?;
        let http_ok = response.status().is_success();
        let text = response
            .text()
            .await
            .map_err(|e| SafetyError::Transport(e.to_string()))?;
        decode_envelope(http_ok, &text)
    }
}

fn to_body<T: serde::Serialize>(value: &T) -> SafetyResult<Value> {
    serde_json::to_value(value).map_err(|e| SafetyError::InvalidInput(e.to_string()))
}

impl AlertDispatcher for RestBackend {
    fn send_alert(&self, request: AlertRequest) -> BoxFuture<'_, SafetyResult<AlertReceipt>> {
        Box::pin(async move {
            let body = to_body(&request)?;
            self.request(Method::POST, "/emergency/alert", Some(body))
                .await
        })
    }
}

impl LocationPublisher for RestBackend {
    fn update_location(&self, fix: LocationFix) -> BoxFuture<'_, SafetyResult<()>> {
        Box::pin(async move {
            let fix = LocationFix {
                accuracy: fix.accuracy.or(Some(DEFAULT_ACCURACY_M)),
                ..fix
            };
            let body = to_body(&fix)?;
            self.request::<Ack>(Method::POST, "/location/update", Some(body))
                .await
                .map(|_| ())
        })
    }

    fn share_location(&self, request: ShareRequest) -> BoxFuture<'_, SafetyResult<ShareReceipt>> {
        Box::pin(async move {
            let body = to_body(&request)?;
            self.request(Method::POST, "/location/share", Some(body))
                .await
        })
    }
}

impl PushNotifier for RestBackend {
    fn send_emergency_push(
        &self,
        request: PushRequest,
    ) -> BoxFuture<'_, SafetyResult<PushReceipt>> {
        Box::pin(async move {
            let body = to_body(&request)?;
            self.request(Method::POST, "/firebase/emergency", Some(body))
                .await
        })
    }
}

impl ContactDirectory for RestBackend {
    fn contacts(&self) -> BoxFuture<'_, SafetyResult<Vec<TrustedContact>>> {
        Box::pin(async move {
            let payload: ContactsPayload = self.request(Method::GET, "/contacts", None).await?;
            Ok(payload.contacts)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let config = RestConfig {
            base_url: "https://api.example.com/api/".into(),
            ..Default::default()
        };
        assert_eq!(
            config.endpoint("/emergency/alert"),
            "https://api.example.com/api/emergency/alert"
        );
    }

    #[test]
    fn envelope_failure_surfaces_server_message() {
        let err = decode_envelope::<AlertReceipt>(true, r#"{"success":false,"error":"No contacts"}"#)
            .unwrap_err();
        assert_eq!(err, SafetyError::Transport("No contacts".into()));
    }

    #[test]
    fn envelope_http_error_without_message_is_generic() {
        let err = decode_envelope::<AlertReceipt>(false, "{}").unwrap_err();
        assert_eq!(err, SafetyError::Transport("Request failed".into()));
    }

    #[test]
    fn envelope_success_decodes_payload_fields() {
        let receipt: AlertReceipt = decode_envelope(
            true,
            r#"{"success":true,"alertId":"a1","contactsNotified":2,"notificationsSent":3}"#,
        )
        .unwrap();
        assert_eq!(receipt.alert_id, "a1");
        assert_eq!(receipt.contacts_notified, 2);
        assert_eq!(receipt.notifications_sent, 3);
    }

    #[test]
    fn share_body_uses_backend_field_names() {
        let body = to_body(&ShareRequest {
            fix: LocationFix::new(12.9716, 77.5946, chrono::Utc::now()),
            contact_ids: vec!["c1".into()],
            duration_hours: 24,
            is_live_sharing: true,
        })
        .unwrap();
        assert_eq!(body["duration"], 24);
        assert!(body.get("durationHours").is_none());
        assert_eq!(body["contactIds"][0], "c1");
        assert_eq!(body["isLiveSharing"], true);
        assert_eq!(body["latitude"], 12.9716);
    }

    #[test]
    fn contacts_payload_tolerates_missing_list() {
        let payload: ContactsPayload = decode_envelope(true, r#"{"success":true}"#).unwrap();
        assert!(payload.contacts.is_empty());
    }
}
