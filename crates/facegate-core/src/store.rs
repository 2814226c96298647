//! Single-slot registration store backed by SQLite.
//!
//! Holds at most one reference embedding under a fixed slot id. Writes are a
//! single upsert statement, so a reader sees either the previous embedding or
//! the new one, never a mix.

use crate::types::{Embedding, EmbeddingError, EMBEDDING_DIM};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use thiserror::Error;

/// Identifier of the one registration slot.
pub const REGISTRATION_SLOT: &str = "registered_face";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS registration (
    slot          TEXT PRIMARY KEY,
    dim           INTEGER NOT NULL,
    embedding     BLOB NOT NULL,
    registered_at TEXT NOT NULL
);";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("no face is registered")]
    NoRegistration,
    #[error("invalid embedding: {0}")]
    InvalidEmbedding(String),
    #[error("failed to create store directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl From<EmbeddingError> for StoreError {
    fn from(e: EmbeddingError) -> Self {
        StoreError::InvalidEmbedding(e.to_string())
    }
}

/// The stored reference embedding plus when it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub embedding: Embedding,
    pub registered_at: DateTime<Utc>,
}

pub struct RegistrationStore {
    conn: Connection,
}

impl RegistrationStore {
    /// Open (or create) the store at `path`, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "registration store opened");
        Self::init(conn)
    }

    /// Non-persistent store, mainly for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Overwrite the slot with `embedding`.
    pub fn save(&self, embedding: &Embedding) -> Result<Registration, StoreError> {
        let registered_at = Utc::now();
        self.conn.execute(
            "INSERT INTO registration (slot, dim, embedding, registered_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(slot) DO UPDATE SET
                 dim = excluded.dim,
                 embedding = excluded.embedding,
                 registered_at = excluded.registered_at",
            params![
                REGISTRATION_SLOT,
                embedding.values().len() as i64,
                encode_values(embedding.values()),
                registered_at.to_rfc3339(),
            ],
        )?;

        tracing::info!(slot = REGISTRATION_SLOT, "registration saved");
        Ok(Registration {
            embedding: embedding.clone(),
            registered_at,
        })
    }

    /// Save an embedding that may be missing, e.g. straight from detection.
    pub fn save_detected(&self, embedding: Option<&Embedding>) -> Result<Registration, StoreError> {
        let embedding = embedding
            .ok_or_else(|| StoreError::InvalidEmbedding("no embedding to register".into()))?;
        self.save(embedding)
    }

    /// Read the slot. `Ok(None)` means nothing has been registered yet.
    pub fn load(&self) -> Result<Option<Registration>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT dim, embedding, registered_at FROM registration WHERE slot = ?1",
                params![REGISTRATION_SLOT],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((dim, blob, registered_at)) = row else {
            return Ok(None);
        };

        if dim != EMBEDDING_DIM as i64 {
            return Err(StoreError::InvalidEmbedding(format!(
                "stored dimension {dim}, expected {EMBEDDING_DIM}"
            )));
        }
        let embedding = Embedding::from_values(decode_values(&blob)?)?;
        let registered_at = DateTime::parse_from_rfc3339(&registered_at)
            .map_err(|e| StoreError::InvalidEmbedding(format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);

        Ok(Some(Registration {
            embedding,
            registered_at,
        }))
    }

    /// Like [`load`](Self::load), but absence is an error.
    pub fn load_required(&self) -> Result<Registration, StoreError> {
        self.load()?.ok_or(StoreError::NoRegistration)
    }

    pub fn is_registered(&self) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM registration WHERE slot = ?1",
            params![REGISTRATION_SLOT],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Remove the registration. Returns whether one existed.
    pub fn clear(&self) -> Result<bool, StoreError> {
        let removed = self.conn.execute(
            "DELETE FROM registration WHERE slot = ?1",
            params![REGISTRATION_SLOT],
        )?;
        if removed > 0 {
            tracing::info!(slot = REGISTRATION_SLOT, "registration cleared");
        }
        Ok(removed > 0)
    }
}

fn encode_values(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_values(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidEmbedding(format!(
            "blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
