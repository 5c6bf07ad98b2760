//! HTTP route handlers for the trigger listener.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::scheduler::TriggerQueue;

/// Shared state for the listener routes.
#[derive(Clone)]
pub struct ListenerState {
    pub queue: Arc<TriggerQueue>,
}

/// Build the listener router.
pub fn router(queue: Arc<TriggerQueue>) -> Router {
    Router::new()
        .route("/webhook/:agent", post(trigger_agent))
        .route("/health", get(health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(ListenerState { queue })
}

/// Queue a run and return immediately; the caller never waits for it.
async fn trigger_agent(
    State(state): State<ListenerState>,
    Path(agent): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.queue.enqueue(&agent) {
        tracing::info!(agent = %agent, pending = state.queue.len(), "Webhook trigger accepted");
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "accepted", "agent": agent})),
        )
    } else {
        tracing::warn!(agent = %agent, "Webhook trigger for unknown agent");
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "unknown agent"})),
        )
    }
}

async fn health(State(state): State<ListenerState>) -> Json<Value> {
    Json(json!({"status": "ok", "agents": state.queue.known_agents()}))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "not found"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    fn queue() -> Arc<TriggerQueue> {
        Arc::new(TriggerQueue::new(["ops", "chat"]))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_post_known_agent_is_accepted() {
        let queue = queue();
        let resp = router(queue.clone())
            .oneshot(request(Method::POST, "/webhook/chat"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(resp).await, json!({"status": "accepted", "agent": "chat"}));
        assert_eq!(queue.drain(), vec!["chat"]);
    }

    #[tokio::test]
    async fn test_post_unknown_agent_is_not_found() {
        let queue = queue();
        let resp = router(queue.clone())
            .oneshot(request(Method::POST, "/webhook/ghost"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await, json!({"error": "unknown agent"}));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_get_on_webhook_is_method_not_allowed() {
        let queue = queue();
        let resp = router(queue.clone())
            .oneshot(request(Method::GET, "/webhook/chat"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        for uri in ["/", "/webhook", "/webhook/chat/extra", "/trigger/chat"] {
            let resp = router(queue())
                .oneshot(request(Method::POST, uri))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_health_lists_agents() {
        let resp = router(queue())
            .oneshot(request(Method::GET, "/health"))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({"status": "ok", "agents": ["chat", "ops"]})
        );
    }
}
