//! HTTP surface. Every API route lives under `/api`.

pub mod chat;
pub mod error;
pub mod knowledge;

use crate::rag::Orchestrator;
use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Body limit for upload routes; slightly above the file limit so oversized
/// files reach the explicit size check and get a clear error.
const UPLOAD_BODY_LIMIT: usize = crate::doc_processor::MAX_UPLOAD_BYTES + 1024 * 1024;

/// Body limit for chat routes, whose JSON may carry base64 images.
const JSON_BODY_LIMIT: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub rag: Orchestrator,
    pub chunk_words: usize,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Streaming chat
        .route(
            "/chat/stream",
            post(chat::stream_chat).layer(DefaultBodyLimit::max(JSON_BODY_LIMIT)),
        )
        .route(
            "/chat/vision",
            post(chat::stream_vision).layer(DefaultBodyLimit::max(JSON_BODY_LIMIT)),
        )
        .route(
            "/rag/chat",
            post(chat::rag_chat).layer(DefaultBodyLimit::max(JSON_BODY_LIMIT)),
        )
        // Embeddings and parsing
        .route("/embedding/generate", post(knowledge::generate_embeddings))
        .route(
            "/file/parse",
            post(knowledge::parse_file).layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        // Vector memory
        .route(
            "/documents",
            get(knowledge::list_documents)
                .post(knowledge::upload_document)
                .delete(knowledge::clear_documents)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/documents/{id}", delete(knowledge::delete_document))
        .route("/search", post(knowledge::search_knowledge_base));

    Router::new()
        .nest("/api", api_routes)
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::db::Database;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_check() {
        let app = build_router(state("http://127.0.0.1:9", Arc::new(Database::open_in_memory().unwrap())));
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = build_router(state("http://127.0.0.1:9", Arc::new(Database::open_in_memory().unwrap())));
        let resp = app
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
