//! WhatsApp over an HTTP bridge (WAHA-compatible API).
//!
//! Outbound messages go through `POST /api/sendText` and `/api/sendFile`;
//! inbound messages arrive as webhook bodies and are classified by
//! [`classify_webhook`].

mod inbound;

pub use inbound::{InboundDecision, ProviderMessage, WebhookBody, classify_webhook};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parley_core::{ChannelHealth, MessageGateway, MessageReceipt, OutboundContent};
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

const MAX_RETRIES: u32 = 2;

pub struct WahaGateway {
    id: String,
    client: Client,
    base_url: String,
    session: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for WahaGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WahaGateway")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl WahaGateway {
    pub fn new(
        id: impl Into<String>,
        base_url: &str,
        session: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self {
            id: id.into(),
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            session: session.into(),
            api_key,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .request(method, format!("{}{path}", self.base_url));
        match &self.api_key {
            Some(key) => req.header("X-Api-Key", key),
            None => req,
        }
    }

    /// POST with retry on 429/5xx. Client errors fail immediately.
    async fn post_with_retry(&self, path: &str, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            let response = self
                .request(reqwest::Method::POST, path)
                .json(body)
                .send()
                .await
                .with_context(|| format!("failed to reach bridge at {path}"))?;

            let status = response.status();
            debug!(status = %status, attempt = attempt + 1, path, "bridge response");

            if status.is_success() {
                // Some bridge versions answer 201 with an empty body.
                let text = response.text().await.unwrap_or_default();
                return Ok(serde_json::from_str(&text).unwrap_or(Value::Null));
            }

            let error_text = response.text().await.unwrap_or_default();
            let retryable = status.as_u16() == 429 || status.is_server_error();
            if !retryable || attempt == MAX_RETRIES {
                anyhow::bail!("bridge error: {status} - {error_text}");
            }

            let backoff_ms = 500u64 * 2u64.pow(attempt);
            warn!(attempt = attempt + 1, status = %status, backoff_ms, "retryable bridge error");
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            attempt += 1;
        }
    }

    fn send_body(&self, chat_id: &str, content: &OutboundContent) -> (&'static str, Value) {
        match content {
            OutboundContent::Text(text) => (
                "/api/sendText",
                json!({ "session": self.session, "chatId": chat_id, "text": text }),
            ),
            OutboundContent::Media(media) => (
                "/api/sendFile",
                json!({
                    "session": self.session,
                    "chatId": chat_id,
                    "file": {
                        "mimetype": media.mimetype,
                        "filename": media.filename,
                        "data": media.data,
                    },
                    "caption": media.caption,
                }),
            ),
        }
    }
}

#[async_trait]
impl MessageGateway for WahaGateway {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<MessageReceipt> {
        let (path, body) = self.send_body(chat_id, &content);
        let span = info_span!("whatsapp_send", gateway = %self.id, chat = %chat_id, path);
        let response = self.post_with_retry(path, &body).instrument(span).await?;
        Ok(receipt_from_response(&response))
    }

    async fn probe(&self) -> ChannelHealth {
        let path = format!("/api/sessions/{}", self.session);
        let response = match self.request(reqwest::Method::GET, &path).send().await {
            Ok(response) => response,
            Err(e) => return ChannelHealth::Unhealthy(e.to_string()),
        };
        if !response.status().is_success() {
            return ChannelHealth::Unhealthy(format!("bridge returned {}", response.status()));
        }
        let body: Value = response.json().await.unwrap_or(Value::Null);
        match body.get("status").and_then(Value::as_str) {
            Some("WORKING") | None => ChannelHealth::Healthy,
            Some(other) => ChannelHealth::Degraded(format!("session status {other}")),
        }
    }
}

/// Bridges report the id either as a string or as `{ "_serialized": .. }`,
/// sometimes nested under `key`. A missing id gets a local one so the
/// outbound message can still be recorded.
fn receipt_from_response(response: &Value) -> MessageReceipt {
    let id = [
        response.get("id"),
        response.get("key").and_then(|k| k.get("id")),
    ]
    .into_iter()
    .flatten()
    .find_map(|v| {
        v.as_str()
            .or_else(|| v.get("_serialized").and_then(Value::as_str))
            .map(str::to_owned)
    })
    .unwrap_or_else(|| format!("local-{}", uuid::Uuid::new_v4()));

    let timestamp = response
        .get("timestamp")
        .and_then(Value::as_i64)
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
        .unwrap_or_else(Utc::now);

    let ack = response
        .get("ack")
        .and_then(Value::as_i64)
        .and_then(|a| i32::try_from(a).ok())
        .unwrap_or(0);

    MessageReceipt { id, timestamp, ack }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MediaAttachment;

    fn gateway() -> WahaGateway {
        WahaGateway::new("wa", "http://localhost:3000/", "default", None).unwrap()
    }

    #[test]
    fn text_goes_to_send_text() {
        let (path, body) = gateway().send_body("601@c.us", &OutboundContent::text("hi"));
        assert_eq!(path, "/api/sendText");
        assert_eq!(body["chatId"], "601@c.us");
        assert_eq!(body["session"], "default");
        assert_eq!(body["text"], "hi");
    }

    #[test]
    fn media_goes_to_send_file() {
        let content = OutboundContent::Media(MediaAttachment {
            mimetype: "image/png".to_owned(),
            data: "aGk=".to_owned(),
            filename: Some("a.png".to_owned()),
            caption: Some("menu".to_owned()),
        });
        let (path, body) = gateway().send_body("601@c.us", &content);
        assert_eq!(path, "/api/sendFile");
        assert_eq!(body["file"]["mimetype"], "image/png");
        assert_eq!(body["caption"], "menu");
    }

    #[test]
    fn base_url_is_trimmed() {
        assert_eq!(gateway().base_url, "http://localhost:3000");
    }

    #[test]
    fn receipt_reads_serialized_id() {
        let receipt = receipt_from_response(&json!({
            "id": { "fromMe": true, "_serialized": "true_601@c.us_ABC" },
            "timestamp": 1_700_000_000,
            "ack": 1
        }));
        assert_eq!(receipt.id, "true_601@c.us_ABC");
        assert_eq!(receipt.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(receipt.ack, 1);
    }

    #[test]
    fn receipt_reads_nested_key_id() {
        let receipt = receipt_from_response(&json!({ "key": { "id": "XYZ" } }));
        assert_eq!(receipt.id, "XYZ");
    }

    #[test]
    fn receipt_without_id_gets_local_id() {
        let receipt = receipt_from_response(&Value::Null);
        assert!(receipt.id.starts_with("local-"));
        assert_eq!(receipt.ack, 0);
    }
}
