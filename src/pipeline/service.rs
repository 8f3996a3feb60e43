/// Batch analysis service: dedup, object storage and persistence around the
/// per-document pipeline.
///
/// Documents in a batch run one after another on the same progress stream.
/// Nothing is written for a document until its pipeline run has finished or
/// been cancelled.
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::progress::{ProgressReporter, RunSummary};
use super::{BatchPosition, DocumentInput, DocumentRun, Pipeline, PipelineError};
use crate::db::Db;
use crate::db::models::{Document, NewDocument};
use crate::extractor::Usage;
use crate::indexer::hasher;
use crate::matching::gaps::{GapReport, analyse_gaps};
use crate::matching::{Control, ReviewStatus, ReviewedMatch};
use crate::storage::text::TextExtractor;
use crate::storage::{self, ObjectStore};

/// One uploaded file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
    pub evidence_type_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DocumentStatus {
    Completed,
    /// Partial results were kept.
    Cancelled,
    /// This document failed; the batch moved on.
    Failed { reason: String },
    /// The extractor is unusable; the rest of the batch was skipped.
    Aborted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentOutcome {
    pub filename: String,
    pub content_hash: String,
    pub document_id: Option<i64>,
    /// The bytes were already stored under this hash.
    pub reused: bool,
    #[serde(flatten)]
    pub status: DocumentStatus,
    pub summary: Option<RunSummary>,
    pub match_ids: Vec<i64>,
    pub usage: Usage,
}

impl DocumentOutcome {
    fn new(filename: &str, content_hash: String) -> Self {
        Self {
            filename: filename.to_string(),
            content_hash,
            document_id: None,
            reused: false,
            status: DocumentStatus::Completed,
            summary: None,
            match_ids: Vec::new(),
            usage: Usage::default(),
        }
    }

    fn failed(mut self, reporter: &ProgressReporter, reason: String) -> Self {
        warn!(document = %self.filename, %reason, "Document failed");
        reporter.error(format!("{}: {reason}", self.filename));
        self.status = DocumentStatus::Failed { reason };
        self
    }

    fn halts_batch(&self) -> bool {
        matches!(
            self.status,
            DocumentStatus::Cancelled | DocumentStatus::Aborted { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub documents: Vec<DocumentOutcome>,
    pub usage: Usage,
    pub cancelled: bool,
}

/// Shared application state for every transport.
#[derive(Clone)]
pub struct EvidenceService {
    pub db: Arc<TokioMutex<Db>>,
    store: Arc<dyn ObjectStore>,
    text: Arc<dyn TextExtractor>,
    pipeline: Arc<Pipeline>,
}

impl EvidenceService {
    pub fn new(
        db: Arc<TokioMutex<Db>>,
        store: Arc<dyn ObjectStore>,
        text: Arc<dyn TextExtractor>,
        pipeline: Pipeline,
    ) -> Self {
        Self {
            db,
            store,
            text,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Analyse `uploads` in order against `control`.
    pub async fn analyse_batch(
        &self,
        control: &Control,
        uploads: &[Upload],
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        info!(
            control = %control.id,
            documents = uploads.len(),
            questions = control.questions.len(),
            "Starting analysis batch"
        );
        let mut batch = BatchOutcome::default();

        for (i, upload) in uploads.iter().enumerate() {
            if cancel.is_cancelled() {
                batch.cancelled = true;
                break;
            }
            let position = BatchPosition {
                current: i + 1,
                total: uploads.len(),
            };

            let outcome = self
                .analyse_upload(control, upload, position, reporter, cancel)
                .await;
            batch.usage.add(outcome.usage);
            let halt = outcome.halts_batch();
            batch.cancelled |= outcome.status == DocumentStatus::Cancelled;
            batch.documents.push(outcome);
            if halt {
                break;
            }
        }

        info!(
            control = %control.id,
            analysed = batch.documents.len(),
            calls = batch.usage.calls,
            tokens = batch.usage.tokens_used,
            cancelled = batch.cancelled,
            "Analysis batch finished"
        );
        batch
    }

    /// Run a stored document again against `control`.
    pub async fn reanalyse_document(
        &self,
        document_id: i64,
        control: &Control,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DocumentOutcome> {
        let doc = self
            .db
            .lock()
            .await
            .get_document(document_id)?
            .with_context(|| format!("document {document_id} not found"))?;
        let bytes = self
            .store
            .download(&doc.storage_key)
            .await
            .with_context(|| format!("failed to load stored bytes of {}", doc.filename))?;

        let upload = Upload {
            filename: doc.filename,
            mime_type: doc.mime_type,
            bytes,
            evidence_type_hint: doc.evidence_type_hint,
        };
        Ok(self
            .analyse_upload(control, &upload, BatchPosition::SINGLE, reporter, cancel)
            .await)
    }

    /// Coverage of `control` by every document's active matches.
    pub async fn gap_report(&self, control: &Control) -> Result<GapReport> {
        let stored = self
            .db
            .lock()
            .await
            .list_active_matches(&control.id)
            .context("failed to load matches")?;
        let reviewed: Vec<ReviewedMatch> = stored.into_iter().map(|m| m.reviewed).collect();
        Ok(analyse_gaps(&control.questions, &reviewed))
    }

    pub async fn review(&self, match_id: i64, status: ReviewStatus) -> Result<()> {
        let updated = self
            .db
            .lock()
            .await
            .set_review_status(match_id, status)
            .context("failed to update review status")?;
        if !updated {
            bail!("no active match with id {match_id}");
        }
        info!(match_id, status = status.as_str(), "Recorded review");
        Ok(())
    }

    async fn analyse_upload(
        &self,
        control: &Control,
        upload: &Upload,
        position: BatchPosition,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> DocumentOutcome {
        let content_hash = hasher::content_hash(&upload.bytes);
        let mut outcome = DocumentOutcome::new(&upload.filename, content_hash.clone());

        let lookup = self.db.lock().await.get_document_by_hash(&content_hash);
        let existing = match lookup {
            Ok(existing) => existing,
            Err(e) => return outcome.failed(reporter, format!("document lookup failed: {e}")),
        };

        let text = match self.text.extract(&upload.bytes, &upload.mime_type) {
            Ok(text) => text,
            Err(e) => {
                let reason = PipelineError::from(e).to_string();
                return outcome.failed(reporter, reason);
            }
        };

        let input = DocumentInput {
            title: &upload.filename,
            text: &text,
            evidence_type_hint: upload.evidence_type_hint.as_deref(),
        };
        let run = match self
            .pipeline
            .run_document(&input, &control.questions, position, reporter, cancel)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                // The pipeline has already sent the terminal error event.
                outcome.status = DocumentStatus::Aborted {
                    reason: e.to_string(),
                };
                return outcome;
            }
        };
        outcome.usage = run.usage;

        match self
            .persist(&control.id, upload, &content_hash, existing, &run)
            .await
        {
            Ok((document_id, reused, match_ids)) => {
                outcome.document_id = Some(document_id);
                outcome.reused = reused;
                outcome.match_ids = match_ids;
                outcome.summary = Some(run.summary);
                if run.cancelled {
                    outcome.status = DocumentStatus::Cancelled;
                }
                outcome
            }
            Err(e) => outcome.failed(reporter, format!("results could not be saved: {e:#}")),
        }
    }

    /// Store a new document (bytes, row, chunks) or reuse the existing one,
    /// then supersede the control's matches for it.
    async fn persist(
        &self,
        control_id: &str,
        upload: &Upload,
        content_hash: &str,
        existing: Option<Document>,
        run: &DocumentRun,
    ) -> Result<(i64, bool, Vec<i64>)> {
        let (document_id, reused) = match existing {
            Some(doc) => {
                debug!(document_id = doc.id, hash = content_hash, "Reusing stored document");
                (doc.id, true)
            }
            None => self.store_document(upload, content_hash, run).await?,
        };

        let match_ids = self
            .db
            .lock()
            .await
            .replace_matches(document_id, control_id, &run.matches)
            .context("failed to replace matches")?;
        info!(
            document_id,
            control = control_id,
            matches = match_ids.len(),
            "Saved matches"
        );
        Ok((document_id, reused, match_ids))
    }

    async fn store_document(
        &self,
        upload: &Upload,
        content_hash: &str,
        run: &DocumentRun,
    ) -> Result<(i64, bool)> {
        let key = storage::key_for_hash(content_hash);
        self.store
            .upload(&upload.bytes, &key, &upload.mime_type)
            .await
            .with_context(|| format!("failed to store {}", upload.filename))?;

        let created = {
            let mut db = self.db.lock().await;
            // Another batch may have stored the same bytes meanwhile.
            if let Some(doc) = db.get_document_by_hash(content_hash)? {
                return Ok((doc.id, true));
            }
            db.create_document(&NewDocument {
                filename: &upload.filename,
                content_hash,
                mime_type: &upload.mime_type,
                storage_key: &key,
                size_bytes: upload.bytes.len() as u64,
                evidence_type_hint: upload.evidence_type_hint.as_deref(),
            })
            .and_then(|id| match db.create_chunks(id, &run.chunks) {
                Ok(()) => Ok(id),
                Err(e) => {
                    if let Err(cleanup) = db.delete_document(id) {
                        warn!(
                            document_id = id,
                            error = %cleanup,
                            "Failed to remove incomplete document row"
                        );
                    }
                    Err(e)
                }
            })
        };

        match created {
            Ok(id) => {
                info!(
                    document_id = id,
                    filename = %upload.filename,
                    chunks = run.chunks.len(),
                    "Stored document"
                );
                Ok((id, false))
            }
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&key).await {
                    warn!(key, error = %cleanup, "Failed to remove orphaned object");
                }
                Err(e).context("failed to record document")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::mock::ScriptedExtractor;
    use crate::extractor::{Completion, ExtractorError};
    use crate::indexer::chunker::ChunkOptions;
    use crate::matching::Question;
    use crate::pipeline::PipelineOptions;
    use crate::pipeline::progress::ProgressEvent;
    use crate::storage::FsObjectStore;
    use crate::storage::text::PlainTextExtractor;

    fn control() -> Control {
        Control {
            id: "AC-2".into(),
            title: "Access reviews".into(),
            questions: vec![
                Question {
                    id: 1,
                    text: "Are access rights reviewed?".into(),
                    evidence_type: "record".into(),
                    what_good_looks_like: String::new(),
                    red_flags: Vec::new(),
                },
                Question {
                    id: 2,
                    text: "Is MFA enforced?".into(),
                    evidence_type: "policy".into(),
                    what_good_looks_like: String::new(),
                    red_flags: Vec::new(),
                },
            ],
        }
    }

    fn upload(name: &str, mime: &str, body: &str) -> Upload {
        Upload {
            filename: name.into(),
            mime_type: mime.into(),
            bytes: body.as_bytes().to_vec(),
            evidence_type_hint: None,
        }
    }

    fn service(extractor: ScriptedExtractor, dir: &std::path::Path) -> EvidenceService {
        service_with(extractor, dir, PipelineOptions::default())
    }

    fn service_with(
        extractor: ScriptedExtractor,
        dir: &std::path::Path,
        options: PipelineOptions,
    ) -> EvidenceService {
        EvidenceService::new(
            Arc::new(TokioMutex::new(Db::open_in_memory().unwrap())),
            Arc::new(FsObjectStore::new(dir)),
            Arc::new(PlainTextExtractor),
            Pipeline::new(Arc::new(extractor), options),
        )
    }

    const ANSWER: &str =
        r#"[{"question_id": 1, "content_relevance": 0.9, "specificity": 0.8, "evidence_type_match": true}]"#;

    #[tokio::test]
    async fn test_duplicate_upload_reuses_document() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(ScriptedExtractor::constant(ANSWER), dir.path());
        let doc = upload("review.txt", "text/plain", "Quarterly access review log.");

        let first = svc
            .analyse_batch(
                &control(),
                &[doc.clone()],
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await;
        let second = svc
            .analyse_batch(
                &control(),
                &[doc],
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await;

        let (a, b) = (&first.documents[0], &second.documents[0]);
        assert_eq!(a.status, DocumentStatus::Completed);
        assert!(!a.reused);
        assert!(b.reused);
        assert_eq!(a.document_id, b.document_id);
        assert_ne!(a.match_ids, b.match_ids);

        let db = svc.db.lock().await;
        assert_eq!(db.list_documents().unwrap().len(), 1);
        let active = db.list_active_matches("AC-2").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.match_ids[0]);
    }

    #[tokio::test]
    async fn test_extraction_failure_continues_batch() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(ScriptedExtractor::constant(ANSWER), dir.path());
        let (reporter, mut rx) = ProgressReporter::channel();

        let batch = svc
            .analyse_batch(
                &control(),
                &[
                    upload("scan.pdf", "application/pdf", "%PDF-1.7"),
                    upload("policy.md", "text/markdown", "# MFA\n\nMFA is enforced."),
                ],
                &reporter,
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(batch.documents.len(), 2);
        assert!(matches!(batch.documents[0].status, DocumentStatus::Failed { .. }));
        assert_eq!(batch.documents[1].status, DocumentStatus::Completed);
        assert_eq!(batch.usage.calls, 1);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::Error { error } if error.starts_with("scan.pdf")));
    }

    #[tokio::test]
    async fn test_unavailable_extractor_aborts_and_persists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(
            ScriptedExtractor::new(|_| {
                Err(ExtractorError::Unreachable("connection refused".into()))
            }),
            dir.path(),
        );

        let batch = svc
            .analyse_batch(
                &control(),
                &[upload("a.txt", "text/plain", "one"), upload("b.txt", "text/plain", "two")],
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(batch.documents.len(), 1);
        assert!(matches!(batch.documents[0].status, DocumentStatus::Aborted { .. }));
        assert!(svc.db.lock().await.list_documents().unwrap().is_empty());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(ScriptedExtractor::constant(ANSWER), dir.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = svc
            .analyse_batch(
                &control(),
                &[upload("a.txt", "text/plain", "x")],
                &ProgressReporter::disabled(),
                &cancel,
            )
            .await;
        assert!(batch.cancelled);
        assert!(batch.documents.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_document_keeps_partial_matches() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // The first chunk answers, then the run is cancelled.
        let extractor = ScriptedExtractor::new(move |_| {
            trigger.cancel();
            Ok(Completion {
                text: ANSWER.to_string(),
                tokens_used: 12,
            })
        });
        let options = PipelineOptions {
            chunking: ChunkOptions {
                max_tokens_per_chunk: 100,
                overlap_tokens: 10,
            },
            ..PipelineOptions::default()
        };
        let svc = service_with(extractor, dir.path(), options);
        let long = ["Access", "Review", "Sign-off"]
            .iter()
            .map(|w| format!("{w} {}", "log entry ".repeat(25)))
            .collect::<Vec<_>>()
            .join("\n\n");

        let batch = svc
            .analyse_batch(
                &control(),
                &[
                    upload("reviews.txt", "text/plain", &long),
                    upload("mfa.txt", "text/plain", "MFA is enforced."),
                ],
                &ProgressReporter::disabled(),
                &cancel,
            )
            .await;

        assert!(batch.cancelled);
        assert_eq!(batch.documents.len(), 1, "batch stops after the cancelled document");
        let doc = &batch.documents[0];
        assert_eq!(doc.status, DocumentStatus::Cancelled);
        assert_eq!(doc.match_ids.len(), 1);
        assert_eq!(doc.usage.calls, 1);
        assert_eq!(doc.summary.unwrap().total_matches, 1);

        let db = svc.db.lock().await;
        let document_id = doc.document_id.unwrap();
        assert_eq!(db.list_documents().unwrap().len(), 1);
        assert!(db.list_chunks(document_id).unwrap().len() >= 2);
        let active = db.list_active_matches("AC-2").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, doc.match_ids[0]);
        assert_eq!(active[0].document_id, document_id);
    }

    #[tokio::test]
    async fn test_reanalyse_and_review() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(ScriptedExtractor::constant(ANSWER), dir.path());
        let batch = svc
            .analyse_batch(
                &control(),
                &[upload("review.txt", "text/plain", "Access review log.")],
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await;
        let document_id = batch.documents[0].document_id.unwrap();

        let report = svc.gap_report(&control()).await.unwrap();
        assert_eq!(report.gap_questions, 1);
        assert_eq!(report.pending_suggestions(), 1);

        let again = svc
            .reanalyse_document(
                document_id,
                &control(),
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(again.reused);
        svc.review(again.match_ids[0], ReviewStatus::Accepted).await.unwrap();
        assert_eq!(svc.gap_report(&control()).await.unwrap().pending_suggestions(), 0);

        let superseded = batch.documents[0].match_ids[0];
        assert!(svc.review(superseded, ReviewStatus::Dismissed).await.is_err());
        let missing = svc
            .reanalyse_document(
                999,
                &control(),
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await;
        assert!(missing.is_err());
    }
}
