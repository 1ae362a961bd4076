//! HTTP surface: provider webhook intake and a liveness probe.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use parley_channels::{InboundDecision, WebhookBody, classify_webhook};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, info_span, warn};

use crate::config::SharedConfig;
use crate::coordinator::Coordinator;

#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub(crate) struct WebhookState {
    pub config: SharedConfig,
    pub coordinator: Arc<Coordinator>,
}

pub(crate) fn build_router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/{bot_id}", post(receive))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Acknowledge immediately; ingestion runs on its own task so the bridge
/// never waits on the store.
async fn receive(
    State(state): State<WebhookState>,
    Path(bot_id): Path<String>,
    Json(body): Json<WebhookBody>,
) -> Result<Json<Value>, StatusCode> {
    let default_channel = match state.config.load().bot(&bot_id) {
        Some(bot) => bot.primary_channel,
        None => {
            warn!(bot = %bot_id, "webhook for unknown bot");
            return Err(StatusCode::NOT_FOUND);
        }
    };

    match classify_webhook(body, default_channel) {
        InboundDecision::Filtered(reason) => {
            debug!(bot = %bot_id, reason, "webhook ignored");
            Ok(Json(json!({ "status": "ignored", "reason": reason })))
        }
        InboundDecision::Accept(event) => {
            let span = info_span!("ingest", bot = %bot_id, message = %event.id);
            let coordinator = Arc::clone(&state.coordinator);
            tokio::spawn(
                async move {
                    match coordinator.ingest(&bot_id, *event).await {
                        Ok(outcome) => debug!(?outcome, "message ingested"),
                        Err(e) => warn!(error = %format!("{e:#}"), "ingest failed"),
                    }
                }
                .instrument(span),
            );
            Ok(Json(json!({ "status": "accepted" })))
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::RoundRobin;
    use crate::config::{Config, shared_config};
    use crate::coordinator::Services;
    use crate::followup::FollowupScheduler;
    use crate::test_support::bot;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use parley_core::fakes::{FakeGateway, MemoryConversationStore, ScriptedAssistant};
    use parley_core::tools::ToolRegistry;
    use parley_core::{ContactKey, ConversationStore, MessageGateway};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<MemoryConversationStore>) {
        let store = Arc::new(MemoryConversationStore::new());
        let gateway = Arc::new(FakeGateway::new()) as Arc<dyn MessageGateway>;
        let shutdown = CancellationToken::new();
        let followups = FollowupScheduler::new(
            Arc::clone(&store) as Arc<dyn ConversationStore>,
            Arc::clone(&gateway),
            shutdown.clone(),
        );
        let config = shared_config(Config {
            bots: vec![bot("sales")],
            ..Config::default()
        });
        let services = Services {
            store: Arc::clone(&store) as Arc<dyn ConversationStore>,
            gateway,
            assistant: Arc::new(ScriptedAssistant::new("hi")),
            tools: Arc::new(ToolRegistry::new()),
            followups,
            assignment: Arc::new(RoundRobin::new()),
        };
        let (coordinator, _turns) = Coordinator::new(Arc::clone(&config), services, shutdown);
        let router = build_router(WebhookState {
            config,
            coordinator,
        });
        (router, store)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    const MESSAGE: &str = r#"{
        "id": "wamid-1",
        "from": "60123456789@c.us",
        "to": "60100000000@c.us",
        "body": "hello",
        "type": "chat",
        "fromMe": false,
        "timestamp": 1700000000,
        "notifyName": "Aina"
    }"#;

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "ok"}));
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_message_is_ingested() {
        let (app, store) = app();
        let response = app
            .oneshot(post_json("/webhook/sales", MESSAGE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "accepted"}));

        tokio::time::sleep(Duration::from_millis(10)).await;
        let key = ContactKey::new("acme", "+60123456789");
        assert_eq!(store.contact(&key).unwrap().contact_name, "Aina");
        assert_eq!(store.messages(&key).len(), 1);
    }

    #[tokio::test]
    async fn envelope_with_other_event_is_ignored() {
        let (app, _) = app();
        let body = format!(r#"{{"event":"session.status","payload":{MESSAGE}}}"#);
        let response = app
            .oneshot(post_json("/webhook/sales", &body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ignored");
    }

    #[tokio::test]
    async fn status_broadcast_is_ignored() {
        let (app, _) = app();
        let body = MESSAGE.replace("60123456789@c.us", "status@broadcast");
        let response = app
            .oneshot(post_json("/webhook/sales", &body))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"status": "ignored", "reason": "status broadcast"})
        );
    }

    #[tokio::test]
    async fn unknown_bot_is_not_found() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/webhook/support", MESSAGE))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json("/webhook/sales", "{not json"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
