use serde::Serialize;
use std::path::Path;

/// Uploads above this size are rejected before extraction.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub const DEFAULT_WORDS_PER_CHUNK: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: usize, limit: usize },
    #[error("Text extraction failed: {0}")]
    Extraction(String),
    #[error("Document contains no text")]
    Empty,
}

/// The file formats text can be extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    PlainText,
    Pdf,
    Word,
}

impl FileKind {
    /// Pick an extractor from the declared MIME type, falling back to the
    /// file extension when the client sent none or a generic one.
    pub fn detect(filename: &str, mime: Option<&str>) -> Result<Self, DocError> {
        let mime = mime
            .map(|m| m.split(';').next().unwrap_or(m).trim().to_lowercase())
            .filter(|m| !m.is_empty() && m != "application/octet-stream");

        if let Some(mime) = mime {
            return match mime.as_str() {
                "text/plain" => Ok(FileKind::PlainText),
                "application/pdf" => Ok(FileKind::Pdf),
                "application/msword"
                | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                    Ok(FileKind::Word)
                }
                other => Err(DocError::UnsupportedFileType(other.to_string())),
            };
        }

        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match ext.as_str() {
            "txt" | "md" | "markdown" => Ok(FileKind::PlainText),
            "pdf" => Ok(FileKind::Pdf),
            "doc" | "docx" => Ok(FileKind::Word),
            _ => Err(DocError::UnsupportedFileType(format!(".{}", ext))),
        }
    }

    /// Raw text of the file, unnormalized.
    pub fn extract(self, bytes: &[u8]) -> Result<String, DocError> {
        match self {
            FileKind::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
            FileKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| DocError::Extraction(format!("PDF parse error: {}", e))),
            FileKind::Word => extract_docx(bytes),
        }
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, DocError> {
    let doc = docx_rs::read_docx(bytes)
        .map_err(|e| DocError::Extraction(format!("Word parse error: {}", e)))?;

    let mut text = String::new();
    for child in doc.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            for child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = child {
                    for child in run.children {
                        if let docx_rs::RunChild::Text(t) = child {
                            text.push_str(&t.text);
                        }
                    }
                }
            }
            text.push('\n');
        }
    }
    Ok(text)
}

/// Result of parsing one uploaded file.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub filename: String,
    pub chunks: Vec<String>,
    pub word_count: usize,
}

/// Validate, extract and chunk an uploaded file.
///
/// Size and type are checked before any extraction work happens.
pub fn parse_upload(
    filename: &str,
    mime: Option<&str>,
    bytes: &[u8],
    words_per_chunk: usize,
) -> Result<ParsedFile, DocError> {
    if bytes.len() > MAX_UPLOAD_BYTES {
        return Err(DocError::FileTooLarge {
            size: bytes.len(),
            limit: MAX_UPLOAD_BYTES,
        });
    }
    let kind = FileKind::detect(filename, mime)?;

    let raw = kind.extract(bytes)?;
    let text = normalize_whitespace(&raw);
    let chunks = chunk_text(&text, words_per_chunk);

    tracing::debug!(filename, kind = ?kind, chunks = chunks.len(), "parsed upload");
    Ok(ParsedFile {
        filename: filename.to_string(),
        word_count: word_count(&text),
        chunks,
    })
}

/// [`parse_upload`] on the blocking pool, keeping extraction off the async
/// workers. A panicking extractor surfaces as [`DocError::Extraction`].
pub async fn parse_upload_blocking(
    filename: String,
    mime: Option<String>,
    bytes: Vec<u8>,
    words_per_chunk: usize,
) -> Result<ParsedFile, DocError> {
    off_runtime(move || parse_upload(&filename, mime.as_deref(), &bytes, words_per_chunk)).await
}

async fn off_runtime<T, F>(work: F) -> Result<T, DocError>
where
    F: FnOnce() -> Result<T, DocError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DocError::Extraction(format!("extractor task failed: {}", e)))?
}

/// Collapse every whitespace run (line breaks included) to a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Split text into chunks of at most `max_words` whitespace-delimited words.
///
/// Words keep their original order and are joined by single spaces; only the
/// last chunk may be short.
pub fn chunk_text(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_words)
        .map(|group| group.join(" "))
        .collect()
}
