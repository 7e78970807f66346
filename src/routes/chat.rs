//! Streaming chat endpoints.
//!
//! Every response is `text/event-stream`. Each text increment is sent as
//! `data: {"choices":[{"delta":{"content":"..."}}]}`, followed by
//! `data: [DONE]`, or by a single `data: {"error":"..."}` on failure.

use super::error::AppError;
use super::AppState;
use crate::db::models::RetrievedContext;
use crate::llm::openai::{delta_payload, error_payload, DONE_SENTINEL};
use crate::llm::relay::RelayStream;
use crate::llm::{ChatMessage, ImageSource, RelayEvent};
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ChatStreamRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Vec<RetrievedContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionRequest {
    pub image_base64: Option<String>,
    pub image_url: Option<String>,
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RagChatRequest {
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub query: String,
    pub image: Option<String>,
}

fn to_sse_event(event: RelayEvent) -> Event {
    match event {
        RelayEvent::Delta(text) => Event::default().data(delta_payload(&text)),
        RelayEvent::Done => Event::default().data(DONE_SENTINEL),
        RelayEvent::Error(message) => Event::default().data(error_payload(&message)),
    }
}

fn into_sse(stream: RelayStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(stream.map(|event| Ok(to_sse_event(event))))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

/// POST /api/chat/stream
pub async fn stream_chat(
    State(state): State<AppState>,
    Json(body): Json<ChatStreamRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    into_sse(state.rag.relay().stream_chat(&body.messages, &body.context))
}

/// POST /api/chat/vision
pub async fn stream_vision(
    State(state): State<AppState>,
    Json(body): Json<VisionRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let image = match (body.image_base64, body.image_url) {
        (Some(data), _) if !data.is_empty() => ImageSource::Base64(data),
        (_, Some(url)) if !url.is_empty() => ImageSource::Url(url),
        _ => {
            return Err(AppError::Validation(
                "imageBase64 or imageUrl is required".into(),
            ))
        }
    };
    Ok(into_sse(state.rag.relay().stream_vision(image, body.prompt)))
}

/// POST /api/rag/chat: retrieve context for `query`, then stream the answer.
///
/// Retrieval failures are returned as plain HTTP errors since no event has
/// been sent yet.
pub async fn rag_chat(
    State(state): State<AppState>,
    Json(body): Json<RagChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let stream = state
        .rag
        .stream_turn(&body.messages, &body.query, body.image)
        .await?;
    Ok(into_sse(stream))
}
