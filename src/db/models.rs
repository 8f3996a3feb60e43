use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::matching::ReviewedMatch;

/// Fields needed to record a newly stored document.
#[derive(Debug, Clone)]
pub struct NewDocument<'a> {
    pub filename: &'a str,
    pub content_hash: &'a str,
    pub mime_type: &'a str,
    pub storage_key: &'a str,
    pub size_bytes: u64,
    pub evidence_type_hint: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub content_hash: String,
    pub mime_type: String,
    pub storage_key: String,
    pub size_bytes: u64,
    pub evidence_type_hint: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An active (not superseded) match row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMatch {
    pub id: i64,
    pub document_id: i64,
    pub control_id: String,
    #[serde(flatten)]
    pub reviewed: ReviewedMatch,
    pub created_at: DateTime<Utc>,
}
