//! HTTP 接口（web feature）
//!
//! - POST /chat    {message, user_id, thread_id?} -> {thread_id, response}
//! - GET  /health

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::{get, post}, Json, Router};

use crate::core::BotError;
use crate::dialogue::{ChatRequest, ChatResponse, Orchestrator};

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/health", get(|| async { "OK" }))
        .with_state(orchestrator)
}

async fn chat(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if req.message.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message is required".to_string()));
    }
    if req.user_id.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "user_id is required".to_string()));
    }

    match orchestrator.process(req).await {
        Ok(resp) => Ok(Json(resp)),
        Err(e) => {
            tracing::error!("chat request failed: {}", e);
            let status = match e {
                BotError::UnroutableIntent(_) => StatusCode::UNPROCESSABLE_ENTITY,
                BotError::Classification(_) => StatusCode::BAD_GATEWAY,
                BotError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((status, e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::config::DialogueSection;
    use crate::dialogue::OrchestratorDeps;
    use crate::llm::{MockEmbedder, ScriptedLlmClient};
    use crate::retrieval::InMemoryRetriever;
    use crate::store::MemoryStore;

    fn app(responses: &[&str]) -> Router {
        let orch = Orchestrator::new(OrchestratorDeps {
            llm: Arc::new(ScriptedLlmClient::new(responses.iter().copied())),
            embedder: Arc::new(MockEmbedder::default()),
            retriever: Arc::new(InMemoryRetriever::new()),
            store: Arc::new(MemoryStore::new()),
            dialogue: DialogueSection::default(),
            retrieval_top_k: 1,
        });
        router(Arc::new(orch))
    }

    fn post_chat(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_thread_and_reply() {
        let resp = app(&["general_chat", "Hello!"])
            .oneshot(post_chat(serde_json::json!({"message": "hi", "user_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: ChatResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.response, "Hello!");
        assert!(!body.thread_id.is_empty());
    }

    #[tokio::test]
    async fn test_unroutable_intent_is_422() {
        let resp = app(&["xyz"])
            .oneshot(post_chat(serde_json::json!({"message": "hi", "user_id": "u1", "thread_id": null})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_empty_message_is_rejected() {
        let resp = app(&[])
            .oneshot(post_chat(serde_json::json!({"message": "  ", "user_id": "u1"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health() {
        let resp = app(&[])
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
