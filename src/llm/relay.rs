//! Streaming relay between a caller and the upstream completion endpoint.
//!
//! The relay augments the conversation with one system message, posts it
//! with `stream: true` and turns the upstream event stream into
//! [`RelayEvent`]s. Streams are lazy and own their upstream response, so
//! dropping one closes the upstream connection.

use super::openai::{parse_frame, Frame, LineBuffer, OpenAiConfig, OpenAiRequest};
use super::{ChatMessage, ImageSource, LlmError, RelayEvent, Role};
use crate::db::models::RetrievedContext;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;

pub type RelayStream = Pin<Box<dyn Stream<Item = RelayEvent> + Send>>;

pub const BASE_SYSTEM_PROMPT: &str = "You are a knowledgeable study assistant.

FORMATTING GUIDELINES:
1. Use markdown consistently
2. Use ## for main headings and ### for subheadings
3. Use **text** for emphasis
4. Use - for bullet points and 1. 2. 3. for numbered lists
5. Leave a blank line between sections
6. Format tables with | separators
7. Use > for quotations

CONTENT GUIDELINES:
- Give accurate, well-structured explanations
- Include examples where they help
- Keep a clear, professional tone";

pub const DEFAULT_VISION_PROMPT: &str = "Describe this image in detail.";

/// Build the single system instruction, appending retrieved excerpts when
/// there are any.
pub fn system_prompt(context: &[RetrievedContext]) -> String {
    if context.is_empty() {
        return BASE_SYSTEM_PROMPT.to_string();
    }
    let context_text = context
        .iter()
        .map(|c| c.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "{}\n\nCONTEXT FROM UPLOADED DOCUMENTS:\n{}\n\nUse this context to answer the user's question if relevant.",
        BASE_SYSTEM_PROMPT, context_text
    )
}

/// The conversation as sent upstream: system instruction first, then the
/// caller's turns unchanged.
pub fn augment_messages(
    conversation: &[ChatMessage],
    context: &[RetrievedContext],
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(ChatMessage::new(Role::System, system_prompt(context)));
    messages.extend_from_slice(conversation);
    messages
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Requesting,
    Streaming,
    Completed,
    Failed,
}

/// Tracks the relay state for one stream and notices when the stream is
/// dropped before reaching a terminal state.
struct StateGuard {
    state: RelayState,
}

impl StateGuard {
    fn new(state: RelayState) -> Self {
        Self { state }
    }

    fn enter(&mut self, next: RelayState) {
        tracing::debug!(from = ?self.state, to = ?next, "relay state");
        self.state = next;
    }
}

impl Drop for StateGuard {
    fn drop(&mut self) {
        if matches!(self.state, RelayState::Requesting | RelayState::Streaming) {
            tracing::info!(state = ?self.state, "caller disconnected, closing upstream stream");
        }
    }
}

/// Decode one raw line of the upstream event stream.
///
/// Lines that are not `data:` payloads, or whose payload carries no text,
/// yield nothing. Malformed payloads are logged and skipped.
fn classify(line: &str) -> Option<RelayEvent> {
    let data = line.strip_prefix("data:")?.trim_start();
    match parse_frame(data) {
        Ok(Frame::Delta(text)) => Some(RelayEvent::Delta(text)),
        Ok(Frame::Done) => Some(RelayEvent::Done),
        Ok(Frame::Error(message)) => Some(RelayEvent::Error(message)),
        Ok(Frame::Empty) => None,
        Err(e) => {
            tracing::warn!(error = %e, frame = data, "skipping malformed stream frame");
            None
        }
    }
}

/// Relay an upstream byte stream that is already in the `Streaming` state.
pub fn relay_frames<S, B, E>(upstream: S) -> impl Stream<Item = RelayEvent> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    pump(upstream, StateGuard::new(RelayState::Streaming))
}

fn pump<S, B, E>(upstream: S, guard: StateGuard) -> impl Stream<Item = RelayEvent> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    async_stream::stream! {
        let mut guard = guard;
        let mut lines = LineBuffer::default();
        let mut upstream = Box::pin(upstream);

        loop {
            let (pending, ended) = match upstream.next().await {
                Some(Ok(chunk)) => (lines.push(chunk.as_ref()), false),
                Some(Err(e)) => {
                    guard.enter(RelayState::Failed);
                    yield RelayEvent::Error(LlmError::Stream(e.to_string()).to_string());
                    return;
                }
                None => (lines.flush(), true),
            };

            for line in pending {
                match classify(&line) {
                    Some(RelayEvent::Done) => {
                        guard.enter(RelayState::Completed);
                        yield RelayEvent::Done;
                        return;
                    }
                    Some(RelayEvent::Error(message)) => {
                        guard.enter(RelayState::Failed);
                        yield RelayEvent::Error(message);
                        return;
                    }
                    Some(delta) => {
                        yield delta;
                    }
                    None => {}
                }
            }

            if ended {
                break;
            }
        }

        // Without the sentinel the reply may be cut short, so no Done is sent.
        tracing::warn!("upstream closed without sentinel");
        guard.enter(RelayState::Failed);
    }
}

#[derive(Clone)]
pub struct ChatRelay {
    client: Client,
    config: OpenAiConfig,
}

impl ChatRelay {
    pub fn new(client: Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    /// Stream a reply to `conversation`, grounding it in `context`.
    pub fn stream_chat(
        &self,
        conversation: &[ChatMessage],
        context: &[RetrievedContext],
    ) -> RelayStream {
        let messages = augment_messages(conversation, context);
        tracing::info!(
            turns = conversation.len(),
            context = context.len(),
            "relaying chat request"
        );
        self.stream_request(OpenAiRequest::chat(&self.config, &messages))
    }

    /// Stream a one-shot description of an image.
    pub fn stream_vision(&self, image: ImageSource, prompt: Option<String>) -> RelayStream {
        let prompt = prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_VISION_PROMPT.to_string());
        tracing::info!("relaying vision request");
        self.stream_request(OpenAiRequest::vision(&self.config, image.into_url(), prompt))
    }

    fn stream_request(&self, body: OpenAiRequest) -> RelayStream {
        let mut req = self
            .client
            .post(&self.config.endpoint)
            .header("Content-Type", "application/json")
            .json(&body);

        if !self.config.api_key.is_empty() {
            req = req.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        Box::pin(async_stream::stream! {
            let mut guard = StateGuard::new(RelayState::Idle);
            guard.enter(RelayState::Requesting);

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    guard.enter(RelayState::Failed);
                    yield RelayEvent::Error(LlmError::Http(e).to_string());
                    return;
                }
            };

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                tracing::warn!(status, "completion request rejected");
                guard.enter(RelayState::Failed);
                yield RelayEvent::Error(LlmError::Api { status, message: text }.to_string());
                return;
            }

            guard.enter(RelayState::Streaming);
            let mut frames = Box::pin(pump(resp.bytes_stream(), guard));
            while let Some(event) = frames.next().await {
                yield event;
            }
        })
    }
}
