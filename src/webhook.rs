//! Outbound webhook notifications for article changes.
//!
//! Each configured endpoint receives a JSON POST for the events it lists (or
//! for every event when it lists none). Delivery is best effort: failures are
//! logged and never retried.

use chrono::{SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::time::Duration;

use crate::config::{CmsConfig, WebhookConfig, WebhookEndpoint};
use crate::types::ContentKey;

pub const USER_AGENT: &str = "InKraft-CMS/1.0";
pub const SIGNATURE_HEADER: &str = "X-Inkraft-Signature-256";
const SOURCE: &str = "inkraft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmsEvent {
    Create,
    Update,
    Delete,
}

impl CmsEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmsEvent::Create => "create",
            CmsEvent::Update => "update",
            CmsEvent::Delete => "delete",
        }
    }
}

impl fmt::Display for CmsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CmsAction {
    pub slug: String,
    pub directory: String,
    pub action: CmsEvent,
}

/// Body of every webhook POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cms: Option<CmsAction>,
}

/// Payload for an article event, stamped with the current time.
pub fn create_payload(event: CmsEvent, repository: &str, key: &ContentKey) -> WebhookPayload {
    WebhookPayload {
        event_type: event.as_str().to_string(),
        repository: Some(repository.to_string()),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        source: SOURCE.to_string(),
        cms: Some(CmsAction {
            slug: key.slug.clone(),
            directory: key.directory.clone(),
            action: event,
        }),
    }
}

/// Whether `endpoint` subscribes to `event_type`. No filter means all events.
pub fn should_process_event(event_type: &str, endpoint: &WebhookEndpoint) -> bool {
    endpoint.events.is_empty() || endpoint.events.iter().any(|e| e == event_type)
}

/// Problems with a webhook configuration, one message each.
pub fn validate_webhook_config(config: &WebhookConfig) -> Vec<String> {
    let mut errors = Vec::new();

    if config.enabled && config.endpoints.is_empty() {
        errors.push("Webhooks enabled but no endpoints configured".to_string());
    }

    for (index, endpoint) in config.endpoints.iter().enumerate() {
        if endpoint.name.is_empty() {
            errors.push(format!("Endpoint {}: name is required", index));
        }
        if endpoint.url.is_empty() {
            errors.push(format!("Endpoint {}: url is required", index));
        }
    }

    errors
}

/// `sha256=<hex>` HMAC of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Sends article events to the configured endpoints.
pub struct Notifier {
    agent: ureq::Agent,
    webhooks: Option<WebhookConfig>,
    repository: String,
}

impl Notifier {
    pub fn new(config: &CmsConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build();

        Self {
            agent,
            webhooks: config.webhooks.clone(),
            repository: config.target_repository.to_string(),
        }
    }

    /// Endpoints that should receive `event`; empty when webhooks are off.
    pub fn targets(&self, event: CmsEvent) -> Vec<&WebhookEndpoint> {
        match &self.webhooks {
            Some(webhooks) if webhooks.enabled => webhooks
                .endpoints
                .iter()
                .filter(|e| !e.url.is_empty() && should_process_event(event.as_str(), e))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// POST `event` for `key` to every subscribed endpoint.
    pub fn notify(&self, event: CmsEvent, key: &ContentKey) {
        let targets = self.targets(event);
        if targets.is_empty() {
            return;
        }

        let payload = create_payload(event, &self.repository, key);
        let body = match serde_json::to_vec(&payload) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Cannot encode webhook payload for {}: {}", key, e);
                return;
            }
        };
        let signature = self
            .webhooks
            .as_ref()
            .and_then(|w| w.secret.as_deref())
            .map(|secret| sign(secret, &body));

        for endpoint in targets {
            let mut request = self
                .agent
                .post(&endpoint.url)
                .set("Content-Type", "application/json")
                .set("User-Agent", USER_AGENT);
            if let Some(signature) = &signature {
                request = request.set(SIGNATURE_HEADER, signature);
            }

            match request.send_bytes(&body) {
                Ok(_) => log::debug!("Webhook {} notified of {} {}", endpoint.name, event, key),
                Err(e) => log::warn!("Webhook {} failed for {} {}: {}", endpoint.name, event, key, e),
            }
        }
    }
}
