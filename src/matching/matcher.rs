/// Per-chunk matching against the question set.
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::parse::{self, bool_field, integer_field, number_field, string_field};
use super::prompts::{self, DocumentContext};
use super::scoring::clamp_unit;
use super::{MIN_CONTENT_RELEVANCE, MatchCandidate, Question};
use crate::extractor::{ExtractorError, SemanticExtractor, Usage, call_extractor};
use crate::indexer::chunker::Chunk;

/// What a chunk's extractor output yielded.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// A JSON array was found; it may hold no usable candidates.
    Candidates(Vec<MatchCandidate>),
    /// No JSON array could be recovered from the output.
    Empty,
}

impl ParseOutcome {
    #[must_use]
    pub fn into_candidates(self) -> Vec<MatchCandidate> {
        match self {
            Self::Candidates(c) => c,
            Self::Empty => Vec::new(),
        }
    }
}

/// Result of one chunk call. Usage is counted even when nothing parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMatch {
    pub outcome: ParseOutcome,
    pub usage: Usage,
}

pub struct ChunkMatcher<'a> {
    extractor: &'a dyn SemanticExtractor,
    timeout: Option<Duration>,
    tokens: Option<&'a UnboundedSender<String>>,
}

impl<'a> ChunkMatcher<'a> {
    pub fn new(extractor: &'a dyn SemanticExtractor) -> Self {
        Self {
            extractor,
            timeout: None,
            tokens: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stream generated text to `tokens` while each call runs.
    #[must_use]
    pub fn with_token_sink(mut self, tokens: Option<&'a UnboundedSender<String>>) -> Self {
        self.tokens = tokens;
        self
    }

    /// Ask the extractor which questions `chunk` supports.
    ///
    /// Transport failures and timeouts are returned as errors; the caller
    /// decides whether they are fatal. Unusable output is `ParseOutcome::Empty`.
    pub async fn match_chunk(
        &self,
        doc: &DocumentContext<'_>,
        chunk: &Chunk,
        questions: &[Question],
    ) -> Result<ChunkMatch, ExtractorError> {
        let user_prompt = prompts::match_user_prompt(doc, chunk, questions);
        let completion = call_extractor(
            self.extractor,
            prompts::MATCH_SYSTEM_PROMPT,
            &user_prompt,
            self.timeout,
            self.tokens,
        )
        .await?;

        let outcome = parse_candidates(&completion.text, chunk.index, questions);
        if outcome == ParseOutcome::Empty {
            warn!(
                document = doc.title,
                chunk = chunk.index,
                "No JSON array in extractor output, chunk contributes no evidence"
            );
        }

        Ok(ChunkMatch {
            outcome,
            usage: Usage::of(&completion),
        })
    }
}

/// Normalise raw extractor output into candidates for `chunk_index`.
///
/// Elements without a numeric `question_id` and `content_relevance`, with an
/// unknown question id, or below the relevance threshold are dropped. Scores
/// are clamped into `[0, 1]`. When one chunk reports the same question twice,
/// the higher-scoring element wins.
#[must_use]
pub fn parse_candidates(text: &str, chunk_index: usize, questions: &[Question]) -> ParseOutcome {
    let Some(items) = parse::extract_array(text) else {
        return ParseOutcome::Empty;
    };

    let known: HashSet<i64> = questions.iter().map(|q| q.id).collect();
    let mut best: BTreeMap<i64, MatchCandidate> = BTreeMap::new();
    let mut dropped = 0usize;

    for item in items {
        let Some(map) = item.as_object() else {
            dropped += 1;
            continue;
        };
        let (Some(question_id), Some(relevance)) = (
            integer_field(map, "question_id"),
            number_field(map, "content_relevance"),
        ) else {
            dropped += 1;
            continue;
        };
        if !known.contains(&question_id) {
            dropped += 1;
            continue;
        }

        let candidate = MatchCandidate {
            question_id,
            chunk_index,
            content_relevance: clamp_unit(relevance),
            specificity: clamp_unit(number_field(map, "specificity").unwrap_or(0.0)),
            evidence_type_match: bool_field(map, "evidence_type_match"),
            matched_passage: string_field(map, "matched_passage"),
            summary: string_field(map, "summary"),
            suggested_response: string_field(map, "suggested_response"),
            confidence_notes: string_field(map, "confidence_notes"),
        };
        if candidate.content_relevance < MIN_CONTENT_RELEVANCE {
            continue;
        }

        match best.get(&question_id) {
            Some(existing) if existing.composite_score() >= candidate.composite_score() => {}
            _ => {
                best.insert(question_id, candidate);
            }
        }
    }

    if dropped > 0 {
        debug!(chunk = chunk_index, dropped, "Dropped malformed candidates");
    }

    ParseOutcome::Candidates(best.into_values().collect())
}
