//! Evidence matching pipeline for one document against one control's questions.
//!
//! Phases run strictly in order: `extracting → chunking → analysing → fusion
//! → complete`. Chunks are analysed one at a time in index order; fusion only
//! starts once every chunk result is in. Cancellation is checked between
//! chunks and between fusion calls, and whatever was computed is kept.
pub mod progress;
pub mod service;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::extractor::{ExtractorError, SemanticExtractor, Usage};
use crate::indexer::chunker::{self, Chunk, ChunkOptions};
use crate::indexer::sanitiser::Sanitiser;
use crate::matching::fusion::{FusionEngine, merge_locally};
use crate::matching::gaps::analyse_gaps;
use crate::matching::matcher::ChunkMatcher;
use crate::matching::prompts::DocumentContext;
use crate::matching::{FinalMatch, MIN_CONTENT_RELEVANCE, MatchCandidate, Question, ReviewedMatch};
use crate::storage::text::TextExtractionError;
use progress::{Phase, ProgressReporter, RunSummary};

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Every chunk call failed and at least one failure will not go away on retry.
    #[error("analysis failed: semantic extractor unavailable, no chunk could be analysed: {0}")]
    ExtractorUnavailable(#[source] ExtractorError),

    #[error("text extraction failed: {0}")]
    Extraction(#[from] TextExtractionError),
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub chunking: ChunkOptions,
    pub sanitiser: Sanitiser,
    /// Timeout for each individual extractor call.
    pub call_timeout: Option<Duration>,
    pub org_context: Option<String>,
}

/// Extracted (not yet sanitised) text of one document.
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    pub title: &'a str,
    pub text: &'a str,
    pub evidence_type_hint: Option<&'a str>,
}

/// Position of a document within its upload batch (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPosition {
    pub current: usize,
    pub total: usize,
}

impl BatchPosition {
    pub const SINGLE: Self = Self {
        current: 1,
        total: 1,
    };
}

/// Everything one document run produced.
#[derive(Debug, Clone)]
pub struct DocumentRun {
    pub chunks: Vec<Chunk>,
    /// One match per question with evidence, in question order.
    pub matches: Vec<FinalMatch>,
    pub summary: RunSummary,
    pub usage: Usage,
    pub chunks_analysed: usize,
    pub failed_calls: usize,
    pub fused_questions: usize,
    pub cancelled: bool,
}

/// Per-chunk results, fully materialised before fusion starts.
struct ChunkPhase {
    candidates: Vec<MatchCandidate>,
    usage: Usage,
    succeeded: usize,
    failed: usize,
    fatal: Option<ExtractorError>,
    cancelled: bool,
}

pub struct Pipeline {
    extractor: Arc<dyn SemanticExtractor>,
    options: PipelineOptions,
    token_sink: Option<UnboundedSender<String>>,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn SemanticExtractor>, options: PipelineOptions) -> Self {
        Self {
            extractor,
            options,
            token_sink: None,
        }
    }

    /// Stream generated text of every chunk call to `tokens`.
    #[must_use]
    pub fn with_token_sink(mut self, tokens: UnboundedSender<String>) -> Self {
        self.token_sink = Some(tokens);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Run every phase for one document.
    ///
    /// Returns `Err` only when no chunk could be analysed because the
    /// extractor is unusable; a terminal `error` event has then been sent.
    pub async fn run_document(
        &self,
        doc: &DocumentInput<'_>,
        questions: &[Question],
        position: BatchPosition,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<DocumentRun, PipelineError> {
        reporter.phase(
            Phase::Extracting,
            position.current,
            position.total,
            format!("Preparing text of {}", doc.title),
        );
        let sanitised = self.options.sanitiser.clean(doc.text, doc.title);

        if questions.is_empty() {
            return Ok(short_circuit(doc.title, Vec::new(), 0, reporter, "no questions to answer"));
        }

        reporter.phase(
            Phase::Chunking,
            position.current,
            position.total,
            format!("Chunking {}", doc.title),
        );
        let chunks = chunker::chunk_text(&sanitised.text, self.options.chunking);
        info!(document = doc.title, chunks = chunks.len(), "Chunked document");

        if chunks.is_empty() {
            return Ok(short_circuit(
                doc.title,
                chunks,
                questions.len(),
                reporter,
                "no text to analyse",
            ));
        }

        let ctx = DocumentContext {
            title: doc.title,
            evidence_type_hint: doc.evidence_type_hint,
            org_context: self.options.org_context.as_deref(),
        };
        let analysis = self
            .analyse_chunks(&ctx, &chunks, questions, reporter, cancel)
            .await;

        if analysis.succeeded == 0 {
            if let Some(e) = analysis.fatal {
                reporter.error(format!(
                    "Analysis of {} failed: semantic extractor unavailable ({e}); no chunk could be analysed",
                    doc.title
                ));
                return Err(PipelineError::ExtractorUnavailable(e));
            }
        }

        let mut usage = analysis.usage;
        let mut cancelled = analysis.cancelled;
        let order: HashMap<i64, usize> = questions
            .iter()
            .enumerate()
            .map(|(i, q)| (q.id, i))
            .collect();
        let groups = group_by_question(analysis.candidates);

        let mut matches = Vec::with_capacity(groups.len());
        let mut to_fuse: Vec<(&Question, &[MatchCandidate])> = Vec::new();
        for question in questions {
            match groups.get(&question.id).map(Vec::as_slice) {
                Some([single]) => {
                    let promoted = FinalMatch::promote(single.clone());
                    reporter.matched(&promoted);
                    matches.push(promoted);
                }
                Some(group) if !group.is_empty() => to_fuse.push((question, group)),
                _ => {}
            }
        }

        let fusion =
            FusionEngine::new(self.extractor.as_ref()).with_timeout(self.options.call_timeout);
        let mut fused_questions = 0;
        let fusion_total = to_fuse.len();
        for (i, (question, group)) in to_fuse.into_iter().enumerate() {
            let hint = group.iter().any(|c| c.evidence_type_match);
            if !cancelled && cancel.is_cancelled() {
                cancelled = true;
            }

            let final_match = if cancelled {
                merge_locally(group, hint)
            } else {
                reporter.phase(
                    Phase::Fusion,
                    i + 1,
                    fusion_total,
                    format!(
                        "Fusing {} passages for question {}",
                        group.len(),
                        question.id
                    ),
                );
                fusion.fuse(doc.title, question, group, hint).await.map(|fused| {
                    usage.add(fused.usage);
                    fused_questions += 1;
                    fused.final_match
                })
            };
            if let Some(final_match) = final_match {
                reporter.matched(&final_match);
                matches.push(final_match);
            }
        }
        matches.sort_by_key(|m| order.get(&m.question_id).copied().unwrap_or(usize::MAX));

        let reviewed: Vec<ReviewedMatch> = matches.iter().cloned().map(Into::into).collect();
        let gaps = analyse_gaps(questions, &reviewed);
        let summary = RunSummary::from_matches(&matches, &gaps);

        let message = if cancelled {
            format!(
                "Analysis of {} cancelled after {} of {} chunks; {} matches kept",
                doc.title,
                analysis.succeeded + analysis.failed,
                chunks.len(),
                summary.total_matches
            )
        } else {
            format!(
                "Analysis of {} complete: {} matches, {} evidence gaps",
                doc.title, summary.total_matches, summary.evidence_gaps
            )
        };
        info!(
            document = doc.title,
            matches = summary.total_matches,
            gaps = summary.evidence_gaps,
            tokens = usage.tokens_used,
            cancelled,
            "Document analysed"
        );
        reporter.complete(summary, message);

        Ok(DocumentRun {
            chunks_analysed: analysis.succeeded + analysis.failed,
            chunks,
            matches,
            summary,
            usage,
            failed_calls: analysis.failed,
            fused_questions,
            cancelled,
        })
    }

    async fn analyse_chunks(
        &self,
        ctx: &DocumentContext<'_>,
        chunks: &[Chunk],
        questions: &[Question],
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ChunkPhase {
        let matcher = ChunkMatcher::new(self.extractor.as_ref())
            .with_timeout(self.options.call_timeout)
            .with_token_sink(self.token_sink.as_ref());
        let mut phase = ChunkPhase {
            candidates: Vec::new(),
            usage: Usage::default(),
            succeeded: 0,
            failed: 0,
            fatal: None,
            cancelled: false,
        };

        for chunk in chunks {
            if cancel.is_cancelled() {
                info!(document = ctx.title, chunk = chunk.index, "Analysis cancelled");
                phase.cancelled = true;
                break;
            }
            reporter.phase(
                Phase::Analysing,
                chunk.index + 1,
                chunks.len(),
                format!("Analysing chunk {} of {}", chunk.index + 1, chunks.len()),
            );

            match matcher.match_chunk(ctx, chunk, questions).await {
                Ok(result) => {
                    phase.succeeded += 1;
                    phase.usage.add(result.usage);
                    phase.candidates.extend(result.outcome.into_candidates());
                }
                Err(e) => {
                    phase.failed += 1;
                    warn!(
                        document = ctx.title,
                        chunk = chunk.index,
                        error = %e,
                        "Chunk analysis failed, continuing without it"
                    );
                    if e.is_fatal() && phase.fatal.is_none() {
                        phase.fatal = Some(e);
                    }
                }
            }
        }

        phase
    }
}

/// Group candidates by question, keeping only those at or above the
/// relevance threshold.
fn group_by_question(candidates: Vec<MatchCandidate>) -> BTreeMap<i64, Vec<MatchCandidate>> {
    let mut groups: BTreeMap<i64, Vec<MatchCandidate>> = BTreeMap::new();
    for candidate in candidates
        .into_iter()
        .filter(|c| c.content_relevance >= MIN_CONTENT_RELEVANCE)
    {
        groups.entry(candidate.question_id).or_default().push(candidate);
    }
    groups
}

fn short_circuit(
    title: &str,
    chunks: Vec<Chunk>,
    question_count: usize,
    reporter: &ProgressReporter,
    reason: &str,
) -> DocumentRun {
    let summary = RunSummary::empty(question_count);
    info!(document = title, reason, "Nothing to analyse");
    reporter.complete(summary, format!("Analysis of {title} complete: {reason}"));
    DocumentRun {
        chunks,
        matches: Vec::new(),
        summary,
        usage: Usage::default(),
        chunks_analysed: 0,
        failed_calls: 0,
        fused_questions: 0,
        cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Completion;
    use crate::extractor::mock::ScriptedExtractor;
    use crate::matching::fusion::PASSAGE_SEPARATOR;
    use crate::matching::prompts::{FUSION_SYSTEM_PROMPT, MATCH_SYSTEM_PROMPT};
    use progress::ProgressEvent;

    fn questions(ids: &[i64]) -> Vec<Question> {
        ids.iter()
            .map(|&id| Question {
                id,
                text: format!("Question {id}"),
                evidence_type: "policy".into(),
                what_good_looks_like: String::new(),
                red_flags: Vec::new(),
            })
            .collect()
    }

    fn small_chunks() -> PipelineOptions {
        PipelineOptions {
            chunking: ChunkOptions {
                max_tokens_per_chunk: 100,
                overlap_tokens: 10,
            },
            ..PipelineOptions::default()
        }
    }

    /// Three paragraphs that each need their own 100-token chunk.
    fn three_chunk_text() -> String {
        ["ALPHA", "BRAVO", "CHARLIE"]
            .iter()
            .map(|w| format!("{w} {}", "evidence text ".repeat(20)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn untitled(text: &str) -> DocumentInput<'_> {
        DocumentInput {
            title: "Doc",
            text,
            evidence_type_hint: None,
        }
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Ok(e) = rx.try_recv() {
            events.push(e);
        }
        events
    }

    fn reply(text: &str) -> Result<Completion, ExtractorError> {
        Ok(Completion {
            text: text.to_string(),
            tokens_used: 10,
        })
    }

    /// Chunk containing ALPHA matches question 1; BRAVO and CHARLIE both match 2.
    fn scripted() -> ScriptedExtractor {
        ScriptedExtractor::new(|req| {
            if req.system_prompt == FUSION_SYSTEM_PROMPT {
                return reply(r#"{"content_relevance": 0.9, "specificity": 0.9, "combined_passage": "fused"}"#);
            }
            let excerpt = req.user_prompt.split("<excerpt>").nth(1).unwrap_or_default();
            if excerpt.trim_start().starts_with("ALPHA") {
                reply(r#"[{"question_id": 1, "content_relevance": 0.7, "specificity": 0.5, "evidence_type_match": true}]"#)
            } else if excerpt.contains("BRAVO") || excerpt.contains("CHARLIE") {
                reply(r#"[{"question_id": 2, "content_relevance": 0.6, "specificity": 0.4},
                          {"question_id": 3, "content_relevance": 0.1}]"#)
            } else {
                reply("[]")
            }
        })
    }

    #[tokio::test]
    async fn test_phase_order_and_fusion() {
        let text = three_chunk_text();
        let ex = Arc::new(scripted());
        let pipeline = Pipeline::new(ex.clone(), small_chunks());
        let (reporter, mut rx) = ProgressReporter::channel();
        let doc = DocumentInput {
            title: "Policy",
            text: &text,
            evidence_type_hint: None,
        };

        let run = pipeline
            .run_document(
                &doc,
                &questions(&[1, 2, 3]),
                BatchPosition::SINGLE,
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.chunks.len(), 3);
        assert_eq!(run.matches.len(), 2);
        assert_eq!(run.matches[0].question_id, 1);
        assert_eq!(run.matches[1].question_id, 2);
        assert_eq!(run.matches[1].matched_passage, "fused");
        assert_eq!(run.fused_questions, 1);
        assert_eq!(ex.calls_with_system(MATCH_SYSTEM_PROMPT), 3);
        assert_eq!(ex.calls_with_system(FUSION_SYSTEM_PROMPT), 1);
        assert_eq!(run.usage.calls, 4);
        assert_eq!(run.summary.evidence_gaps, 1);

        let events = drain(&mut rx);
        let phases: Vec<Phase> = events.iter().filter_map(ProgressEvent::phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Extracting,
                Phase::Chunking,
                Phase::Analysing,
                Phase::Analysing,
                Phase::Analysing,
                Phase::Fusion,
                Phase::Complete
            ]
        );
        let match_events = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Match { .. }))
            .count();
        assert_eq!(match_events, 2);
        // Fusion counts questions, analysing counts chunks.
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Progress { phase: Phase::Fusion, current: 1, total: 1, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::Progress { phase: Phase::Analysing, current: 3, total: 3, .. }
        )));
    }

    #[tokio::test]
    async fn test_single_chunk_match_skips_fusion() {
        let ex = Arc::new(ScriptedExtractor::constant(
            r#"[{"question_id": 5, "content_relevance": 0.8, "specificity": 0.8, "evidence_type_match": true}]"#,
        ));
        let pipeline = Pipeline::new(ex.clone(), PipelineOptions::default());
        let doc = DocumentInput {
            title: "Short",
            text: "Quarterly access reviews are signed off by the CISO.",
            evidence_type_hint: Some("record"),
        };
        let run = pipeline
            .run_document(
                &doc,
                &questions(&[5]),
                BatchPosition::SINGLE,
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.matches.len(), 1);
        assert_eq!(run.fused_questions, 0);
        assert_eq!(ex.calls_with_system(FUSION_SYSTEM_PROMPT), 0);
        assert_eq!(run.matches[0].composite_score, 0.84);
    }

    #[tokio::test]
    async fn test_no_questions_short_circuits() {
        let ex = Arc::new(ScriptedExtractor::constant("[]"));
        let pipeline = Pipeline::new(ex.clone(), PipelineOptions::default());
        let (reporter, mut rx) = ProgressReporter::channel();
        let doc = DocumentInput {
            title: "Doc",
            text: "Some text",
            evidence_type_hint: None,
        };
        let run = pipeline
            .run_document(&doc, &[], BatchPosition::SINGLE, &reporter, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.summary, RunSummary::empty(0));
        assert!(ex.requests().is_empty());
        let events = drain(&mut rx);
        assert_eq!(events.last().and_then(ProgressEvent::phase), Some(Phase::Complete));
    }

    #[tokio::test]
    async fn test_empty_text_short_circuits_with_all_gaps() {
        let ex = Arc::new(ScriptedExtractor::constant("[]"));
        let pipeline = Pipeline::new(ex.clone(), PipelineOptions::default());
        let doc = DocumentInput {
            title: "Blank",
            text: " \n\n \u{0}",
            evidence_type_hint: None,
        };
        let run = pipeline
            .run_document(
                &doc,
                &questions(&[1, 2, 3]),
                BatchPosition::SINGLE,
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(run.chunks.is_empty());
        assert_eq!(run.summary, RunSummary::empty(3));
        assert!(ex.requests().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_do_not_abort() {
        let text = three_chunk_text();
        let ex = Arc::new(ScriptedExtractor::new(|req| {
            if req.user_prompt.contains("BRAVO") && !req.user_prompt.contains("ALPHA") {
                Err(ExtractorError::Timeout(Duration::from_secs(30)))
            } else {
                reply("no json at all")
            }
        }));
        let pipeline = Pipeline::new(ex, small_chunks());
        let run = pipeline
            .run_document(
                &untitled(&text),
                &questions(&[1]),
                BatchPosition::SINGLE,
                &ProgressReporter::disabled(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(run.chunks_analysed, 3);
        assert!(run.failed_calls >= 1);
        assert!(run.matches.is_empty());
        assert_eq!(run.summary.evidence_gaps, 1);
        // Parse failures still count usage.
        assert!(run.usage.tokens_used > 0);
    }

    #[tokio::test]
    async fn test_fatal_extractor_emits_error() {
        let text = three_chunk_text();
        let ex = Arc::new(ScriptedExtractor::new(|_| {
            Err(ExtractorError::Unauthorized("invalid x-api-key".into()))
        }));
        let pipeline = Pipeline::new(ex, small_chunks());
        let (reporter, mut rx) = ProgressReporter::channel();
        let err = pipeline
            .run_document(
                &untitled(&text),
                &questions(&[1]),
                BatchPosition::SINGLE,
                &reporter,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ExtractorUnavailable(_)));
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Error { error }) if error.contains("failed")
        ));
        assert!(!events.iter().any(|e| e.phase() == Some(Phase::Complete)));
    }

    #[tokio::test]
    async fn test_cancellation_keeps_partial_results() {
        let text = three_chunk_text();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // Cancel as soon as the second chunk has been answered.
        let ex = Arc::new(ScriptedExtractor::new(move |req| {
            let excerpt = req.user_prompt.split("<excerpt>").nth(1).unwrap_or_default();
            if excerpt.trim_start().starts_with("ALPHA") {
                reply(r#"[{"question_id": 1, "content_relevance": 0.7}]"#)
            } else {
                trigger.cancel();
                reply(r#"[{"question_id": 2, "content_relevance": 0.6}]"#)
            }
        }));
        let pipeline = Pipeline::new(ex.clone(), small_chunks());
        let (reporter, mut rx) = ProgressReporter::channel();
        let run = pipeline
            .run_document(
                &untitled(&text),
                &questions(&[1, 2]),
                BatchPosition::SINGLE,
                &reporter,
                &cancel,
            )
            .await
            .unwrap();

        assert!(run.cancelled);
        assert_eq!(run.chunks_analysed, 2);
        assert_eq!(ex.requests().len(), 2);
        assert_eq!(run.matches.len(), 2);
        let events = drain(&mut rx);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Progress { phase: Phase::Complete, message, .. })
                if message.contains("cancelled")
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_fusion_merges_remaining_groups_locally() {
        let text = three_chunk_text();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // Every chunk answers questions 1 and 2; the first fusion call cancels.
        let ex = Arc::new(ScriptedExtractor::new(move |req| {
            if req.system_prompt == FUSION_SYSTEM_PROMPT {
                trigger.cancel();
                return reply(r#"{"content_relevance": 0.9, "specificity": 0.9, "combined_passage": "fused"}"#);
            }
            let excerpt = req.user_prompt.split("<excerpt>").nth(1).unwrap_or_default();
            let label = if excerpt.trim_start().starts_with("ALPHA") {
                "ALPHA"
            } else if excerpt.contains("CHARLIE") {
                "CHARLIE"
            } else {
                "BRAVO"
            };
            reply(&format!(
                r#"[{{"question_id": 1, "content_relevance": 0.7, "matched_passage": "{label}"}},
                   {{"question_id": 2, "content_relevance": 0.6, "specificity": 0.3, "matched_passage": "{label}"}}]"#
            ))
        }));
        let pipeline = Pipeline::new(ex.clone(), small_chunks());
        let (reporter, mut rx) = ProgressReporter::channel();
        let run = pipeline
            .run_document(
                &untitled(&text),
                &questions(&[1, 2]),
                BatchPosition::SINGLE,
                &reporter,
                &cancel,
            )
            .await
            .unwrap();

        assert!(run.cancelled);
        assert_eq!(run.chunks_analysed, 3);
        assert_eq!(run.fused_questions, 1);
        assert_eq!(ex.calls_with_system(FUSION_SYSTEM_PROMPT), 1);

        assert_eq!(run.matches.len(), 2);
        assert_eq!(run.matches[0].question_id, 1);
        assert_eq!(run.matches[0].matched_passage, "fused");
        let merged = &run.matches[1];
        assert_eq!(merged.question_id, 2);
        assert_eq!(merged.matched_passage, ["ALPHA", "BRAVO", "CHARLIE"].join(PASSAGE_SEPARATOR));
        assert_eq!(merged.content_relevance, 0.6);
        assert!(merged.confidence_notes.contains("without reconciliation"));

        let events = drain(&mut rx);
        let fusion_events = events
            .iter()
            .filter(|e| e.phase() == Some(Phase::Fusion))
            .count();
        assert_eq!(fusion_events, 1);
        let match_events = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Match { .. }))
            .count();
        assert_eq!(match_events, 2);
        assert!(matches!(
            events.last(),
            Some(ProgressEvent::Progress { phase: Phase::Complete, message, summary: Some(s), .. })
                if message.contains("cancelled") && s.total_matches == 2
        ));
    }

    #[test]
    fn test_group_by_question_filters_threshold() {
        let make = |question_id, chunk_index, relevance| MatchCandidate {
            question_id,
            chunk_index,
            content_relevance: relevance,
            specificity: 0.5,
            evidence_type_match: false,
            matched_passage: String::new(),
            summary: String::new(),
            suggested_response: String::new(),
            confidence_notes: String::new(),
        };
        let groups = group_by_question(vec![
            make(1, 0, 0.5),
            make(1, 1, 0.2),
            make(2, 1, 0.9),
            make(1, 2, 0.3),
        ]);
        assert_eq!(groups[&1].len(), 2);
        assert_eq!(groups[&2].len(), 1);
    }
}
