//! Wire format of an OpenAI-compatible chat completion endpoint.

use super::{ChatMessage, Role};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Full URL of the chat completions endpoint.
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub vision_max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub stream: bool,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OpenAiMessage {
    pub role: Role,
    pub content: OpenAiContent,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(m: &ChatMessage) -> Self {
        let content = match &m.image {
            None => OpenAiContent::Text(m.content.clone()),
            Some(url) => {
                let mut parts = Vec::with_capacity(2);
                if !m.content.is_empty() {
                    parts.push(ContentPart::Text {
                        text: m.content.clone(),
                    });
                }
                parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                });
                OpenAiContent::Parts(parts)
            }
        };
        OpenAiMessage {
            role: m.role,
            content,
        }
    }
}

impl OpenAiRequest {
    pub fn chat(config: &OpenAiConfig, messages: &[ChatMessage]) -> Self {
        Self {
            model: config.model.clone(),
            messages: messages.iter().map(OpenAiMessage::from).collect(),
            stream: true,
            max_tokens: config.max_tokens,
        }
    }

    pub fn vision(config: &OpenAiConfig, image_url: String, prompt: String) -> Self {
        Self {
            model: config.model.clone(),
            messages: vec![OpenAiMessage {
                role: Role::User,
                content: OpenAiContent::Parts(vec![
                    ContentPart::Text { text: prompt },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: image_url },
                    },
                ]),
            }],
            stream: true,
            max_tokens: config.vision_max_tokens,
        }
    }
}

#[derive(Deserialize)]
struct OpenAiStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: Option<OpenAiDelta>,
}

#[derive(Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

/// One decoded `data:` payload from the upstream event stream.
#[derive(Debug, PartialEq)]
pub enum Frame {
    Delta(String),
    Done,
    Error(String),
    /// Valid chunk carrying no text (role announcements, finish reasons).
    Empty,
}

pub const DONE_SENTINEL: &str = "[DONE]";

pub fn parse_frame(data: &str) -> Result<Frame, serde_json::Error> {
    if data == DONE_SENTINEL {
        return Ok(Frame::Done);
    }

    let parsed: OpenAiStreamResponse = serde_json::from_str(data)?;
    if let Some(error) = parsed.error {
        let message = match &error {
            serde_json::Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        };
        return Ok(Frame::Error(message));
    }

    let delta = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta)
        .and_then(|d| d.content)
        .filter(|text| !text.is_empty());
    Ok(delta.map(Frame::Delta).unwrap_or(Frame::Empty))
}

/// Payload the relay sends its own caller for one text increment.
pub fn delta_payload(text: &str) -> String {
    serde_json::json!({ "choices": [{ "delta": { "content": text } }] }).to_string()
}

pub fn error_payload(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Reassembles newline-terminated lines from arbitrarily split network chunks.
#[derive(Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    /// Append `bytes` and return every line completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }

    /// Take whatever unterminated line is left once the stream has ended.
    pub fn flush(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        vec![String::from_utf8_lossy(&rest).trim().to_string()]
    }
}
