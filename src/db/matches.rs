use super::{Db, models::StoredMatch};
use crate::matching::{FinalMatch, ReviewStatus, ReviewedMatch, StrengthLabel};
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{Connection, Error, Result, Row, params};

fn insert_match(
    conn: &Connection,
    document_id: i64,
    control_id: &str,
    m: &FinalMatch,
) -> Result<i64> {
    conn.execute(
        r#"
        INSERT INTO matches (
            document_id, control_id, question_id, chunk_index,
            content_relevance, specificity, evidence_type_match,
            matched_passage, summary, suggested_response, confidence_notes,
            composite_score, strength_label, review_status, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)
        "#,
        params![
            document_id,
            control_id,
            m.question_id,
            m.chunk_index as i64,
            m.content_relevance,
            m.specificity,
            m.evidence_type_match,
            m.matched_passage,
            m.summary,
            m.suggested_response,
            m.confidence_notes,
            m.composite_score,
            m.strength_label.as_str(),
            Utc::now(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn soft_delete(conn: &Connection, document_id: i64, control_id: &str) -> Result<usize> {
    conn.execute(
        "UPDATE matches SET deleted_at = ? WHERE document_id = ? AND control_id = ? AND deleted_at IS NULL",
        params![Utc::now(), document_id, control_id],
    )
}

fn parse_column<T>(idx: usize, value: String, parse: fn(&str) -> Option<T>) -> Result<T> {
    parse(&value).ok_or_else(|| {
        Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected value '{value}'").into(),
        )
    })
}

fn stored_match_from_row(row: &Row<'_>) -> Result<StoredMatch> {
    let chunk_index: i64 = row.get(4)?;
    Ok(StoredMatch {
        id: row.get(0)?,
        document_id: row.get(1)?,
        control_id: row.get(2)?,
        reviewed: ReviewedMatch {
            final_match: FinalMatch {
                question_id: row.get(3)?,
                chunk_index: chunk_index as usize,
                content_relevance: row.get(5)?,
                specificity: row.get(6)?,
                evidence_type_match: row.get(7)?,
                matched_passage: row.get(8)?,
                summary: row.get(9)?,
                suggested_response: row.get(10)?,
                confidence_notes: row.get(11)?,
                composite_score: row.get(12)?,
                strength_label: parse_column(13, row.get(13)?, StrengthLabel::parse)?,
            },
            review: parse_column(14, row.get(14)?, ReviewStatus::parse)?,
        },
        created_at: row.get(15)?,
    })
}

const MATCH_COLUMNS: &str = r#"
    id, document_id, control_id, question_id, chunk_index,
    content_relevance, specificity, evidence_type_match,
    matched_passage, summary, suggested_response, confidence_notes,
    composite_score, strength_label, review_status, created_at
"#;

impl Db {
    /// Marks every active match of a (document, control) pair as superseded
    pub fn soft_delete_matches(&mut self, document_id: i64, control_id: &str) -> Result<usize> {
        soft_delete(&self.conn, document_id, control_id)
    }

    pub fn create_match(
        &mut self,
        document_id: i64,
        control_id: &str,
        m: &FinalMatch,
    ) -> Result<i64> {
        insert_match(&self.conn, document_id, control_id, m)
    }

    /// Supersedes the pair's active matches with `matches` in one transaction,
    /// so readers never see a half-updated set. Returns the new row ids.
    pub fn replace_matches(
        &mut self,
        document_id: i64,
        control_id: &str,
        matches: &[FinalMatch],
    ) -> Result<Vec<i64>> {
        let tx = self.conn.transaction()?;

        soft_delete(&tx, document_id, control_id)?;
        let ids = matches
            .iter()
            .map(|m| insert_match(&tx, document_id, control_id, m))
            .collect::<Result<Vec<_>>>()?;

        tx.commit()?;
        Ok(ids)
    }

    /// Active matches for a control across all documents
    pub fn list_active_matches(&self, control_id: &str) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE control_id = ? AND deleted_at IS NULL ORDER BY question_id, composite_score DESC, id"
        ))?;
        let rows = stmt.query_map(params![control_id], stored_match_from_row)?;
        rows.collect()
    }

    /// Active matches of one document for a control
    pub fn list_document_matches(
        &self,
        document_id: i64,
        control_id: &str,
    ) -> Result<Vec<StoredMatch>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE document_id = ? AND control_id = ? AND deleted_at IS NULL ORDER BY question_id"
        ))?;
        let rows = stmt.query_map(params![document_id, control_id], stored_match_from_row)?;
        rows.collect()
    }

    /// Records a reviewer decision on an active match. Returns false when no
    /// active match has that id.
    pub fn set_review_status(&mut self, match_id: i64, status: ReviewStatus) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE matches SET review_status = ? WHERE id = ? AND deleted_at IS NULL",
            params![status.as_str(), match_id],
        )?;
        Ok(rows > 0)
    }
}
