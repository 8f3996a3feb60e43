//! Evidence database module using SQLite
use rusqlite::{Connection, Result};
use std::path::Path;
use tracing::info;

pub mod documents;
pub mod matches;
pub mod models;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    content_hash TEXT NOT NULL UNIQUE,
    mime_type TEXT NOT NULL,
    storage_key TEXT NOT NULL,
    size_bytes INTEGER NOT NULL,
    evidence_type_hint TEXT,
    created_at DATETIME NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    char_start INTEGER NOT NULL,
    char_end INTEGER NOT NULL,
    section_heading TEXT,
    token_estimate INTEGER NOT NULL,
    UNIQUE(document_id, chunk_index),
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS matches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id INTEGER NOT NULL,
    control_id TEXT NOT NULL,
    question_id INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    content_relevance REAL NOT NULL,
    specificity REAL NOT NULL,
    evidence_type_match INTEGER NOT NULL,
    matched_passage TEXT NOT NULL,
    summary TEXT NOT NULL,
    suggested_response TEXT NOT NULL,
    confidence_notes TEXT NOT NULL,
    composite_score REAL NOT NULL,
    strength_label TEXT NOT NULL,
    review_status TEXT NOT NULL DEFAULT 'pending',
    created_at DATETIME NOT NULL,
    deleted_at DATETIME,
    FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_matches_doc_control ON matches(document_id, control_id);
CREATE INDEX IF NOT EXISTS idx_matches_control_active ON matches(control_id, deleted_at);
"#;

/// A wrapper around a SQLite connection initialized with the application schema.
pub struct Db {
    pub(crate) conn: Connection,
}

impl Db {
    /// Open a database connection at the given path and initialize the schema.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Initializing database: {}", path.display());

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA_SQL)?;

        info!("Database initialized successfully");

        Ok(Self { conn })
    }

    /// Open an in-memory database connection (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn })
    }
}
