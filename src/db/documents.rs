use super::{Db, models::*};
use crate::indexer::chunker::Chunk;
use chrono::Utc;
use rusqlite::{OptionalExtension, Result, Row, params};

const DOCUMENT_COLUMNS: &str =
    "id, filename, content_hash, mime_type, storage_key, size_bytes, evidence_type_hint, created_at";

fn document_from_row(row: &Row<'_>) -> Result<Document> {
    let size_bytes: i64 = row.get(5)?;
    Ok(Document {
        id: row.get(0)?,
        filename: row.get(1)?,
        content_hash: row.get(2)?,
        mime_type: row.get(3)?,
        storage_key: row.get(4)?,
        size_bytes: size_bytes as u64,
        evidence_type_hint: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Db {
    /// Looks up a stored document by the SHA-256 of its raw bytes
    pub fn get_document_by_hash(&self, content_hash: &str) -> Result<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE content_hash = ?"),
                params![content_hash],
                document_from_row,
            )
            .optional()
    }

    pub fn get_document(&self, id: i64) -> Result<Option<Document>> {
        self.conn
            .query_row(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"),
                params![id],
                document_from_row,
            )
            .optional()
    }

    /// Returns all documents, oldest first
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY id"))?;
        let rows = stmt.query_map([], document_from_row)?;
        rows.collect()
    }

    /// Records a document and returns its id
    pub fn create_document(&mut self, doc: &NewDocument<'_>) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO documents
                (filename, content_hash, mime_type, storage_key, size_bytes, evidence_type_hint, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                doc.filename,
                doc.content_hash,
                doc.mime_type,
                doc.storage_key,
                doc.size_bytes as i64,
                doc.evidence_type_hint,
                Utc::now(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Replaces the chunk rows of a document
    pub fn create_chunks(&mut self, document_id: i64, chunks: &[Chunk]) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute(
            "DELETE FROM chunks WHERE document_id = ?",
            params![document_id],
        )?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO chunks
                    (document_id, chunk_index, content, char_start, char_end, section_heading, token_estimate)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    document_id,
                    chunk.index as i64,
                    chunk.content,
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                    chunk.section_heading,
                    chunk.token_estimate as i64,
                ])?;
            }
        }

        tx.commit()
    }

    /// Chunks of a document in index order
    pub fn list_chunks(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT chunk_index, content, char_start, char_end, section_heading, token_estimate
            FROM chunks WHERE document_id = ? ORDER BY chunk_index
            "#,
        )?;
        let rows = stmt.query_map(params![document_id], |row| {
            let index: i64 = row.get(0)?;
            let char_start: i64 = row.get(2)?;
            let char_end: i64 = row.get(3)?;
            let token_estimate: i64 = row.get(5)?;
            Ok(Chunk {
                index: index as usize,
                content: row.get(1)?,
                char_start: char_start as usize,
                char_end: char_end as usize,
                section_heading: row.get(4)?,
                token_estimate: token_estimate as usize,
            })
        })?;
        rows.collect()
    }

    /// Deletes a document; chunks and matches cascade
    pub fn delete_document(&mut self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM documents WHERE id = ?", params![id])?;
        Ok(rows > 0)
    }
}
