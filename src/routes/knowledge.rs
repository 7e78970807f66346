use super::error::AppError;
use super::AppState;
use crate::db::models::{Document, RetrievedContext};
use crate::doc_processor::{self, ParsedFile};
use axum::body::Bytes;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub query: String,
    pub top_k: Option<usize>,
}

struct Upload {
    filename: String,
    content_type: Option<String>,
    bytes: Bytes,
}

/// Pull the `file` field out of a multipart body.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        tracing::info!(filename = %filename, size = bytes.len(), "received upload");
        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }
    Err(AppError::Validation("No file uploaded".into()))
}

/// POST /api/embedding/generate
pub async fn generate_embeddings(
    State(state): State<AppState>,
    Json(body): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, AppError> {
    let texts = body
        .texts
        .ok_or_else(|| AppError::Validation("texts array is required".into()))?;
    let embeddings = state.rag.embedder().embed(&texts).await?;
    Ok(Json(EmbeddingResponse { embeddings }))
}

/// POST /api/file/parse: extract and chunk an upload without storing it.
pub async fn parse_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ParsedFile>, AppError> {
    let upload = read_upload(multipart).await?;
    let parsed = doc_processor::parse_upload_blocking(
        upload.filename,
        upload.content_type,
        upload.bytes.to_vec(),
        state.chunk_words,
    )
    .await?;
    Ok(Json(parsed))
}

/// GET /api/documents
pub async fn list_documents(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    let mut documents = state.rag.with_store(|db| db.list_documents()).await?;
    documents.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
    Ok(Json(documents))
}

/// POST /api/documents: parse, embed and store an upload.
pub async fn upload_document(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Document>), AppError> {
    let upload = read_upload(multipart).await?;
    let document = state
        .rag
        .ingest(
            &upload.filename,
            upload.content_type.as_deref(),
            upload.bytes.to_vec(),
            state.chunk_words,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(document)))
}

/// DELETE /api/documents/{id}
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state
        .rag
        .with_store(move |db| db.remove_document(&id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/documents
pub async fn clear_documents(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    state.rag.with_store(|db| db.clear_all()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/search: chunks most similar to a query.
pub async fn search_knowledge_base(
    State(state): State<AppState>,
    Json(body): Json<SearchRequest>,
) -> Result<Json<Vec<RetrievedContext>>, AppError> {
    let top_k = body.top_k.unwrap_or(crate::rag::DEFAULT_TOP_K);
    let results = state.rag.retrieve(&body.query, top_k).await?;
    Ok(Json(results))
}
