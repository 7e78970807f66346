pub mod models;

use crate::embedding::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};
use models::{Chunk, Document, Embedding, RetrievedContext};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Matches scoring at or below this value are dropped from search results.
pub const SIMILARITY_THRESHOLD: f32 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Store write failed: {0}")]
    Write(String),
    #[error("Store read failed: {0}")]
    Read(String),
    #[error("Document not found: {0}")]
    NotFound(String),
    #[error("Got {chunks} chunks but {vectors} vectors")]
    LengthMismatch { chunks: usize, vectors: usize },
    #[error("Database lock poisoned")]
    Poisoned,
    #[error("Store task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

fn write_err(e: rusqlite::Error) -> DbError {
    DbError::Write(e.to_string())
}

fn read_err(e: rusqlite::Error) -> DbError {
    DbError::Read(e.to_string())
}

/// Persistent vector memory: documents, their ordered chunks and one
/// embedding per chunk.
///
/// Every statement runs through a single connection guarded by a mutex, so
/// writes to the store are serialized process-wide.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DbError::Write(format!("cannot create {}: {}", dir.display(), e))
                })?;
            }
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Close the underlying connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        let conn = self.conn.into_inner().map_err(|_| DbError::Poisoned)?;
        conn.close().map_err(|(_, e)| DbError::Sqlite(e))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA foreign_keys=ON;

            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                upload_date TEXT NOT NULL,
                chunk_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                UNIQUE (document_id, chunk_index),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS embeddings (
                id TEXT PRIMARY KEY,
                chunk_id TEXT NOT NULL UNIQUE,
                vector BLOB NOT NULL,
                FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            ",
        )?;
        Ok(())
    }

    // ── Documents ──

    /// Store a document with its chunks and their embeddings.
    ///
    /// The document row, chunk rows and embedding rows are written in one
    /// transaction; if any insert fails nothing is kept.
    pub fn add_document(
        &self,
        filename: &str,
        chunks: &[String],
        vectors: &[Vec<f32>],
    ) -> Result<String> {
        if chunks.len() != vectors.len() {
            return Err(DbError::LengthMismatch {
                chunks: chunks.len(),
                vectors: vectors.len(),
            });
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;

        let doc_id = uuid::Uuid::new_v4().to_string();
        let upload_date = chrono::Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO documents (id, filename, upload_date, chunk_count) VALUES (?1, ?2, ?3, ?4)",
            params![doc_id, filename, upload_date, chunks.len() as i64],
        )
        .map_err(write_err)?;

        {
            let mut insert_chunk = tx
                .prepare(
                    "INSERT INTO chunks (id, document_id, chunk_index, content) VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(write_err)?;
            let mut insert_embedding = tx
                .prepare("INSERT INTO embeddings (id, chunk_id, vector) VALUES (?1, ?2, ?3)")
                .map_err(write_err)?;

            for (i, (content, vector)) in chunks.iter().zip(vectors).enumerate() {
                let chunk_id = uuid::Uuid::new_v4().to_string();
                insert_chunk
                    .execute(params![chunk_id, doc_id, i as i64, content])
                    .map_err(write_err)?;
                insert_embedding
                    .execute(params![
                        uuid::Uuid::new_v4().to_string(),
                        chunk_id,
                        embedding_to_bytes(vector)
                    ])
                    .map_err(write_err)?;
            }
        }

        tx.commit().map_err(write_err)?;
        tracing::info!(document_id = %doc_id, filename, chunks = chunks.len(), "document stored");
        Ok(doc_id)
    }

    /// Delete a document together with its chunks and embeddings.
    pub fn remove_document(&self, id: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;

        let exists: Option<String> = tx
            .query_row("SELECT id FROM documents WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()
            .map_err(read_err)?;
        if exists.is_none() {
            return Err(DbError::NotFound(id.to_string()));
        }

        tx.execute(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?1)",
            params![id],
        )
        .map_err(write_err)?;
        let removed = tx
            .execute("DELETE FROM chunks WHERE document_id = ?1", params![id])
            .map_err(write_err)?;
        tx.execute("DELETE FROM documents WHERE id = ?1", params![id])
            .map_err(write_err)?;
        tx.commit().map_err(write_err)?;

        tracing::info!(document_id = %id, chunks = removed, "document removed");
        Ok(())
    }

    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT id, filename, upload_date, chunk_count FROM documents")
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Document {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    upload_date: row.get(2)?,
                    chunk_count: row.get(3)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    pub fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, filename, upload_date, chunk_count FROM documents WHERE id = ?1",
            params![id],
            |row| {
                Ok(Document {
                    id: row.get(0)?,
                    filename: row.get(1)?,
                    upload_date: row.get(2)?,
                    chunk_count: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(read_err)
    }

    pub fn document_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(read_err)?;
        Ok(count as usize)
    }

    /// Chunks of a document in their original order.
    pub fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, chunk_index, content FROM chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    document_id: row.get(1)?,
                    chunk_index: row.get(2)?,
                    content: row.get(3)?,
                })
            })
            .map_err(read_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(read_err)
    }

    pub fn get_embedding(&self, chunk_id: &str) -> Result<Option<Embedding>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, chunk_id, vector FROM embeddings WHERE chunk_id = ?1",
            params![chunk_id],
            |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(Embedding {
                    id: row.get(0)?,
                    chunk_id: row.get(1)?,
                    vector: bytes_to_embedding(&bytes),
                })
            },
        )
        .optional()
        .map_err(read_err)
    }

    pub fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(write_err)?;
        tx.execute_batch(
            "DELETE FROM embeddings; DELETE FROM chunks; DELETE FROM documents;",
        )
        .map_err(write_err)?;
        tx.commit().map_err(write_err)?;
        tracing::info!("vector memory cleared");
        Ok(())
    }

    // ── Search ──

    /// Rank every stored chunk against `query` by cosine similarity.
    ///
    /// Returns at most `top_k` matches scoring above [`SIMILARITY_THRESHOLD`],
    /// best first. Equal scores keep insertion order.
    pub fn search_similar_chunks(
        &self,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedContext>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT e.vector, c.id, c.document_id, c.content
                 FROM embeddings e JOIN chunks c ON c.id = e.chunk_id
                 ORDER BY e.rowid ASC",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(0)?;
                Ok((
                    bytes_to_embedding(&bytes),
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(read_err)?;

        let mut scored = Vec::new();
        for row in rows {
            let (vector, chunk_id, document_id, content) = row.map_err(read_err)?;
            let similarity = cosine_similarity(query, &vector);
            if similarity > SIMILARITY_THRESHOLD {
                scored.push(RetrievedContext {
                    content,
                    similarity,
                    chunk_id,
                    document_id,
                });
            }
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}
