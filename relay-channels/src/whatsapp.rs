use crate::traits::ChannelAdapter;
use crate::types::{InboundMessage, MessageId, OutboundMessage, SenderId};
use anyhow::{Result, anyhow};
use chrono::Utc;
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::mpsc;

const GRAPH_API_VERSION: &str = "v20.0";

/// WhatsApp Cloud API adapter. Outbound sends go straight to the Graph
/// API; inbound events arrive via the webhook route in the app, which
/// feeds parsed payloads to the ingress adapter.
#[derive(Clone)]
pub struct WhatsAppCloudAdapter {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppCloudAdapter {
    pub fn new(access_token: &str, phone_number_id: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("whatsapp access token is required"));
        }
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(anyhow!("whatsapp phone number id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
        })
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "https://graph.facebook.com/{GRAPH_API_VERSION}/{}/messages",
            self.phone_number_id
        ))
        .map_err(|e| anyhow!("invalid whatsapp graph API URL: {e}"))
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for WhatsAppCloudAdapter {
    fn channel_id(&self) -> &str {
        "whatsapp"
    }

    async fn start(&self, _tx: mpsc::Sender<InboundMessage>) -> Result<()> {
        // Inbound events are delivered via the webhook route in the app.
        Ok(())
    }

    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<()> {
        let to = recipient_id.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient_id (E.164 phone number) is required"));
        }
        let text = message.content.trim();
        if text.is_empty() {
            return Err(anyhow!("message content is empty"));
        }

        let url = self.messages_url()?;
        let payload = serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": {
                "preview_url": false,
                "body": text,
            }
        });

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "whatsapp send failed: status={} body={}",
                status,
                body
            ));
        }

        tracing::debug!(recipient = %to, reply_len = text.len(), "whatsapp message sent");
        Ok(())
    }
}

/// Webhook subscription handshake: echoes the challenge when the mode
/// and verify token match, `None` otherwise (the route answers 403).
pub fn verify_webhook(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    if mode == Some("subscribe") && token == Some(expected_token) {
        challenge.map(str::to_string)
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
struct WebhookEntry {
    #[serde(default)]
    changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
struct WebhookChange {
    value: WebhookValue,
}

#[derive(Debug, Deserialize)]
struct WebhookValue {
    #[serde(default)]
    messages: Vec<WebhookMessage>,
}

#[derive(Debug, Deserialize)]
struct WebhookMessage {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(rename = "type")]
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
struct WebhookText {
    body: String,
}

/// Extracts individual inbound text messages from a webhook delivery.
///
/// Status updates (which carry no `messages` array), non-text message
/// types, and events without an individual sender are all dropped here,
/// before the ingress adapter ever sees them.
pub fn parse_webhook_payload(payload: &serde_json::Value) -> Vec<InboundMessage> {
    let parsed: WebhookPayload = match serde_json::from_value(payload.clone()) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "unparseable whatsapp webhook payload");
            return Vec::new();
        }
    };

    let mut inbound = Vec::new();
    for entry in parsed.entry {
        for change in entry.changes {
            for message in change.value.messages {
                let Some(from) = message.from.filter(|f| !f.trim().is_empty()) else {
                    tracing::debug!("ignoring webhook message without an individual sender");
                    continue;
                };
                if message.kind.as_deref() != Some("text") {
                    tracing::debug!(
                        kind = message.kind.as_deref().unwrap_or("unknown"),
                        "ignoring non-text webhook message"
                    );
                    continue;
                }
                let Some(text) = message.text else {
                    continue;
                };
                let message_id = message
                    .id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                inbound.push(InboundMessage {
                    message_id: MessageId::new(message_id),
                    sender_id: SenderId::new(from),
                    is_group: false,
                    content: text.body,
                    received_at: Utc::now(),
                });
            }
        }
    }
    inbound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_requires_credentials() {
        assert!(WhatsAppCloudAdapter::new("", "123").is_err());
        assert!(WhatsAppCloudAdapter::new("token", "  ").is_err());
        assert!(WhatsAppCloudAdapter::new("token", "123").is_ok());
    }

    #[test]
    fn verify_webhook_echoes_challenge_on_match() {
        let challenge = verify_webhook(
            Some("subscribe"),
            Some("secret"),
            Some("1158201444"),
            "secret",
        );
        assert_eq!(challenge.as_deref(), Some("1158201444"));
    }

    #[test]
    fn verify_webhook_rejects_bad_token_or_mode() {
        assert!(verify_webhook(Some("subscribe"), Some("wrong"), Some("c"), "secret").is_none());
        assert!(verify_webhook(Some("unsubscribe"), Some("secret"), Some("c"), "secret").is_none());
        assert!(verify_webhook(None, None, Some("c"), "secret").is_none());
    }

    #[test]
    fn parse_extracts_individual_text_messages() {
        let payload = serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "entry-1",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "messages": [{
                            "id": "wamid.A1",
                            "from": "911234567890",
                            "timestamp": "1725000000",
                            "type": "text",
                            "text": { "body": "hi there" }
                        }]
                    }
                }]
            }]
        });
        let inbound = parse_webhook_payload(&payload);
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].sender_id.as_str(), "911234567890");
        assert_eq!(inbound[0].content, "hi there");
        assert!(!inbound[0].is_group);
        assert_eq!(inbound[0].message_id.as_str(), "wamid.A1");
    }

    #[test]
    fn parse_drops_status_only_deliveries() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "field": "messages",
                    "value": {
                        "messaging_product": "whatsapp",
                        "statuses": [{ "id": "wamid.A1", "status": "delivered" }]
                    }
                }]
            }]
        });
        assert!(parse_webhook_payload(&payload).is_empty());
    }

    #[test]
    fn parse_drops_non_text_and_senderless_messages() {
        let payload = serde_json::json!({
            "entry": [{
                "changes": [{
                    "value": {
                        "messages": [
                            {
                                "id": "wamid.B1",
                                "from": "911234567890",
                                "type": "image"
                            },
                            {
                                "id": "wamid.B2",
                                "type": "text",
                                "text": { "body": "no sender" }
                            }
                        ]
                    }
                }]
            }]
        });
        assert!(parse_webhook_payload(&payload).is_empty());
    }

    #[test]
    fn parse_tolerates_garbage_payload() {
        assert!(parse_webhook_payload(&serde_json::json!("not an object")).is_empty());
        assert!(parse_webhook_payload(&serde_json::json!({})).is_empty());
    }
}
