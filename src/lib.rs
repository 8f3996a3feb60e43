//! # evidencemap: compliance evidence mapper
//!
//! Matches uploaded documents against the audit questions of a control,
//! scores how well each document answers each question, and drafts
//! reviewable answers. Coverage gaps are derived from the stored matches.
//!
//! ## Architecture
//!
//! - **[`config`]**: configuration loading, validation, and input expansion
//! - **[`indexer`]**: hashing, sanitising, and chunking extracted text
//! - **[`extractor`]**: the semantic extraction client (Anthropic Messages API)
//! - **[`matching`]**: per-chunk matching, scoring, fusion, and gap analysis
//! - **[`pipeline`]**: the per-document orchestrator, progress events, and batch service
//! - **[`db`]**: SQLite persistence for documents, chunks, and soft-deletable matches
//! - **[`storage`]**: object storage for raw bytes and text extraction
//! - **[`server`]**: HTTP transport streaming progress as server-sent events

pub mod config;
pub mod db;
pub mod extractor;
pub mod indexer;
pub mod matching;
pub mod pipeline;
pub mod server;
pub mod storage;
