use crate::embedding::{AuthStyle, EmbeddingConfig};
use crate::llm::openai::OpenAiConfig;
use clap::Parser;
use std::path::PathBuf;

/// Server configuration, read from flags or the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "ragbox", version, about = "Retrieval-augmented chat server")]
pub struct Config {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3001)]
    pub port: u16,

    /// SQLite file backing the vector memory.
    #[arg(long, env = "DATABASE_PATH", default_value = "ragbox.db")]
    pub database_path: PathBuf,

    /// Chat completions URL of an OpenAI-compatible service.
    #[arg(long, env = "CHAT_API_ENDPOINT")]
    pub chat_endpoint: String,

    #[arg(long, env = "CHAT_API_KEY", default_value = "", hide_env_values = true)]
    pub chat_api_key: String,

    #[arg(long, env = "CHAT_MODEL", default_value = "gpt-4")]
    pub chat_model: String,

    #[arg(long, default_value_t = 4000)]
    pub chat_max_tokens: u32,

    #[arg(long, default_value_t = 2000)]
    pub vision_max_tokens: u32,

    /// Embeddings URL, including any deployment path and api-version query.
    #[arg(long, env = "EMBEDDING_API_ENDPOINT")]
    pub embedding_endpoint: String,

    #[arg(long, env = "EMBEDDING_API_KEY", default_value = "", hide_env_values = true)]
    pub embedding_api_key: String,

    #[arg(long, env = "EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    #[arg(long, env = "EMBEDDING_AUTH", value_enum, default_value_t = AuthStyle::ApiKey)]
    pub embedding_auth: AuthStyle,

    #[arg(long, default_value_t = crate::doc_processor::DEFAULT_WORDS_PER_CHUNK)]
    pub chunk_words: usize,

    #[arg(long, default_value_t = crate::rag::DEFAULT_TOP_K)]
    pub top_k: usize,
}

impl Config {
    pub fn completion(&self) -> OpenAiConfig {
        OpenAiConfig {
            endpoint: self.chat_endpoint.clone(),
            api_key: self.chat_api_key.clone(),
            model: self.chat_model.clone(),
            max_tokens: self.chat_max_tokens,
            vision_max_tokens: self.vision_max_tokens,
        }
    }

    pub fn embedding(&self) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint: self.embedding_endpoint.clone(),
            api_key: self.embedding_api_key.clone(),
            model: self.embedding_model.clone(),
            auth: self.embedding_auth,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
