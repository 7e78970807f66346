pub mod openai;
pub mod relay;

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One turn of a conversation as received from the caller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Attached image as a URL or `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }
}

/// Image handed to the vision endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Raw base64 JPEG data, without a `data:` prefix.
    Base64(String),
    Url(String),
}

impl ImageSource {
    pub fn into_url(self) -> String {
        match self {
            ImageSource::Base64(data) => format!("data:image/jpeg;base64,{}", data),
            ImageSource::Url(url) => url,
        }
    }
}

/// What the relay pushes to its caller, in upstream arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    Delta(String),
    Done,
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Stream error: {0}")]
    Stream(String),
}
