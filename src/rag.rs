//! Retrieval-augmented chat: embed the query, pull matching chunks from the
//! vector memory and hand both to the streaming relay.

use crate::db::models::{Document, RetrievedContext};
use crate::db::{Database, DbError};
use crate::doc_processor::{self, DocError};
use crate::embedding::EmbeddingClient;
use crate::llm::relay::{ChatRelay, RelayStream};
use crate::llm::{ChatMessage, LlmError, Role};
use std::sync::Arc;

/// Number of chunks retrieved for each chat turn.
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error(transparent)]
    Store(#[from] DbError),
    #[error(transparent)]
    Upstream(#[from] LlmError),
    #[error(transparent)]
    Document(#[from] DocError),
}

#[derive(Clone)]
pub struct Orchestrator {
    db: Arc<Database>,
    embedder: EmbeddingClient,
    relay: ChatRelay,
    top_k: usize,
}

impl Orchestrator {
    pub fn new(db: Arc<Database>, embedder: EmbeddingClient, relay: ChatRelay, top_k: usize) -> Self {
        Self {
            db,
            embedder,
            relay,
            top_k,
        }
    }

    pub fn relay(&self) -> &ChatRelay {
        &self.relay
    }

    pub fn embedder(&self) -> &EmbeddingClient {
        &self.embedder
    }

    /// Run store work on the blocking pool. Every statement takes the
    /// connection mutex and the search scans every embedding, neither of
    /// which belongs on an async worker.
    pub async fn with_store<T, F>(&self, work: F) -> Result<T, RagError>
    where
        F: FnOnce(&Database) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        let result = tokio::task::spawn_blocking(move || work(db.as_ref()))
            .await
            .map_err(|e| DbError::Task(e.to_string()))?;
        Ok(result?)
    }

    /// Chunks relevant to `query`, or nothing when the query is blank or no
    /// document has been ingested yet.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedContext>, RagError> {
        if query.trim().is_empty() || self.with_store(|db| db.document_count()).await? == 0 {
            return Ok(Vec::new());
        }

        let mut vectors = self.embedder.embed(&[query.to_string()]).await?;
        let Some(vector) = vectors.pop() else {
            return Err(LlmError::Parse("Embedding API returned no vector for query".into()).into());
        };
        let context = self
            .with_store(move |db| db.search_similar_chunks(&vector, top_k))
            .await?;
        tracing::debug!(matches = context.len(), "retrieved context");
        Ok(context)
    }

    /// Answer `query` as the next user turn after `history`.
    ///
    /// Earlier turns carrying images are left out of the text history; the
    /// new turn keeps its image, if any.
    pub async fn stream_turn(
        &self,
        history: &[ChatMessage],
        query: &str,
        image: Option<String>,
    ) -> Result<RelayStream, RagError> {
        let context = self.retrieve(query, self.top_k).await?;

        let mut conversation: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.image.is_none())
            .cloned()
            .collect();
        conversation.push(ChatMessage {
            role: Role::User,
            content: query.to_string(),
            image,
        });

        Ok(self.relay.stream_chat(&conversation, &context))
    }

    /// Parse, embed and store an uploaded file as a new document.
    pub async fn ingest(
        &self,
        filename: &str,
        mime: Option<&str>,
        bytes: Vec<u8>,
        words_per_chunk: usize,
    ) -> Result<Document, RagError> {
        let parsed = doc_processor::parse_upload_blocking(
            filename.to_string(),
            mime.map(str::to_string),
            bytes,
            words_per_chunk,
        )
        .await?;
        if parsed.chunks.is_empty() {
            return Err(DocError::Empty.into());
        }

        let vectors = self.embedder.embed(&parsed.chunks).await?;
        self.with_store(move |db| {
            let id = db.add_document(&parsed.filename, &parsed.chunks, &vectors)?;
            db.get_document(&id)?.ok_or(DbError::NotFound(id))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{AuthStyle, EmbeddingConfig};
    use crate::llm::openai::OpenAiConfig;
    use crate::llm::RelayEvent;
    use axum::routing::post;
    use axum::{Json, Router};
    use futures::StreamExt;
    use std::sync::Mutex;

    /// Fake embedding and completion services sharing one listener.
    ///
    /// Texts containing "rust" embed to [1, 0], everything else to [0, 1].
    /// The completion endpoint echoes its system prompt back as one delta.
    struct Upstream {
        base: String,
        embed_calls: Arc<Mutex<usize>>,
        chat_requests: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn spawn_upstream() -> Upstream {
        let embed_calls = Arc::new(Mutex::new(0));
        let chat_requests = Arc::new(Mutex::new(Vec::new()));
        let calls = embed_calls.clone();
        let seen = chat_requests.clone();

        let app = Router::new()
            .route(
                "/embeddings",
                post(move |Json(body): Json<serde_json::Value>| {
                    let calls = calls.clone();
                    async move {
                        *calls.lock().unwrap() += 1;
                        let data: Vec<_> = body["input"]
                            .as_array()
                            .unwrap()
                            .iter()
                            .map(|t| {
                                let v = if t.as_str().unwrap().contains("rust") {
                                    [1.0, 0.0]
                                } else {
                                    [0.0, 1.0]
                                };
                                serde_json::json!({ "embedding": v })
                            })
                            .collect();
                        Json(serde_json::json!({ "data": data }))
                    }
                }),
            )
            .route(
                "/chat",
                post(move |Json(body): Json<serde_json::Value>| {
                    let seen = seen.clone();
                    async move {
                        seen.lock().unwrap().push(body);
                        "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\ndata: [DONE]\n\n"
                    }
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Upstream {
            base: format!("http://{addr}"),
            embed_calls,
            chat_requests,
        }
    }

    fn orchestrator(base: &str, db: Arc<Database>) -> Orchestrator {
        let client = reqwest::Client::new();
        Orchestrator::new(
            db,
            EmbeddingClient::new(
                client.clone(),
                EmbeddingConfig {
                    endpoint: format!("{base}/embeddings"),
                    api_key: String::new(),
                    model: None,
                    auth: AuthStyle::Bearer,
                },
            ),
            ChatRelay::new(
                client,
                OpenAiConfig {
                    endpoint: format!("{base}/chat"),
                    api_key: String::new(),
                    model: "gpt-4".into(),
                    max_tokens: 4000,
                    vision_max_tokens: 2000,
                },
            ),
            DEFAULT_TOP_K,
        )
    }

    #[tokio::test]
    async fn test_no_documents_skips_retrieval() {
        let upstream = spawn_upstream().await;
        let rag = orchestrator(&upstream.base, Arc::new(Database::open_in_memory().unwrap()));

        let events: Vec<_> = rag.stream_turn(&[], "tell me about rust", None).await.unwrap().collect().await;
        assert_eq!(events, vec![RelayEvent::Delta("ok".into()), RelayEvent::Done]);
        assert_eq!(*upstream.embed_calls.lock().unwrap(), 0);

        let requests = upstream.chat_requests.lock().unwrap();
        let system = requests[0]["messages"][0]["content"].as_str().unwrap();
        assert!(!system.contains("CONTEXT FROM UPLOADED DOCUMENTS"));
    }

    #[tokio::test]
    async fn test_ingest_then_chat_uses_context() {
        let upstream = spawn_upstream().await;
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rag = orchestrator(&upstream.base, db.clone());

        let doc = rag
            .ingest(
                "langs.txt",
                Some("text/plain"),
                b"rust is a systems language\n\npython is a scripting language".to_vec(),
                5,
            )
            .await
            .unwrap();
        assert_eq!(doc.filename, "langs.txt");
        assert_eq!(doc.chunk_count, 2);
        assert_eq!(db.get_chunks(&doc.id).unwrap().len(), 2);

        let history = vec![
            ChatMessage::new(Role::User, "hello"),
            ChatMessage {
                role: Role::User,
                content: "look at this".into(),
                image: Some("https://example.com/a.png".into()),
            },
            ChatMessage::new(Role::Assistant, "hi there"),
        ];
        let events: Vec<_> = rag
            .stream_turn(&history, "why rust?", None)
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(events.last(), Some(&RelayEvent::Done));

        let requests = upstream.chat_requests.lock().unwrap();
        let messages = requests[0]["messages"].as_array().unwrap();
        let system = messages[0]["content"].as_str().unwrap();
        assert!(system.contains("CONTEXT FROM UPLOADED DOCUMENTS:\nrust is a systems language"));
        assert!(!system.contains("python"));

        let contents: Vec<_> = messages[1..].iter().map(|m| m["content"].clone()).collect();
        assert_eq!(
            contents,
            vec![
                serde_json::json!("hello"),
                serde_json::json!("hi there"),
                serde_json::json!("why rust?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_blank_query_skips_retrieval() {
        let upstream = spawn_upstream().await;
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_document("d.txt", &["rust".to_string()], &[vec![1.0, 0.0]])
            .unwrap();
        let rag = orchestrator(&upstream.base, db);

        assert!(rag.retrieve("   ", DEFAULT_TOP_K).await.unwrap().is_empty());
        assert_eq!(*upstream.embed_calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_task_panic_is_an_error() {
        let rag = orchestrator("http://127.0.0.1:9", Arc::new(Database::open_in_memory().unwrap()));
        let err = rag
            .with_store(|_| -> Result<(), DbError> { panic!("store task died") })
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Store(DbError::Task(_))));

        assert_eq!(rag.with_store(|db| db.document_count()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_empty_document_is_rejected() {
        let upstream = spawn_upstream().await;
        let db = Arc::new(Database::open_in_memory().unwrap());
        let rag = orchestrator(&upstream.base, db.clone());

        let err = rag.ingest("blank.txt", Some("text/plain"), b"   \n ".to_vec(), 500).await.unwrap_err();
        assert!(matches!(err, RagError::Document(DocError::Empty)));
        assert_eq!(db.document_count().unwrap(), 0);
    }
}
