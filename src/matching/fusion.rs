/// Cross-chunk fusion: one reconciled match per question that several
/// chunks contributed to.
use std::time::Duration;

use tracing::{debug, warn};

use super::parse::{self, number_field, string_field};
use super::prompts;
use super::scoring::{self, clamp_unit};
use super::{FinalMatch, MIN_CONTENT_RELEVANCE, MatchCandidate, Question};
use crate::extractor::{SemanticExtractor, Usage, call_extractor};

/// Separator between passages that are merged without reconciliation.
pub const PASSAGE_SEPARATOR: &str = "\n\n[...]\n\n";

/// Outcome of fusing one question's candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct Fused {
    pub final_match: FinalMatch,
    pub usage: Usage,
    /// `false` when the local merge was used instead of the extractor's answer.
    pub reconciled: bool,
}

pub struct FusionEngine<'a> {
    extractor: &'a dyn SemanticExtractor,
    timeout: Option<Duration>,
}

impl<'a> FusionEngine<'a> {
    pub fn new(extractor: &'a dyn SemanticExtractor) -> Self {
        Self {
            extractor,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reconcile `candidates` (two or more, all for `question`) into one match.
    ///
    /// `None` only when `candidates` is empty. Extractor errors and unusable
    /// output fall back to [`merge_locally`].
    pub async fn fuse(
        &self,
        document_title: &str,
        question: &Question,
        candidates: &[MatchCandidate],
        evidence_type_match_hint: bool,
    ) -> Option<Fused> {
        let base = best_candidate(candidates)?;
        let user_prompt = prompts::fusion_user_prompt(document_title, question, candidates);
        let completion = match call_extractor(
            self.extractor,
            prompts::FUSION_SYSTEM_PROMPT,
            &user_prompt,
            self.timeout,
            None,
        )
        .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!(question = question.id, error = %e, "Fusion call failed, merging locally");
                return Some(Fused {
                    final_match: merge_from(base, candidates, evidence_type_match_hint),
                    usage: Usage::default(),
                    reconciled: false,
                });
            }
        };
        let usage = Usage::of(&completion);

        let reconciled = reconcile(&completion.text, base, candidates, evidence_type_match_hint);
        let fused = match reconciled {
            Some(final_match) => Fused {
                final_match,
                usage,
                reconciled: true,
            },
            None => {
                warn!(question = question.id, "Unusable fusion output, merging locally");
                Fused {
                    final_match: merge_from(base, candidates, evidence_type_match_hint),
                    usage,
                    reconciled: false,
                }
            }
        };
        Some(fused)
    }
}

/// Candidate with the highest pre-fusion composite score; earliest chunk on ties.
fn best_candidate(candidates: &[MatchCandidate]) -> Option<&MatchCandidate> {
    candidates.iter().reduce(|best, c| {
        if c.composite_score() > best.composite_score() {
            c
        } else {
            best
        }
    })
}

#[allow(clippy::too_many_arguments)]
fn build(
    base: &MatchCandidate,
    content_relevance: f64,
    specificity: f64,
    evidence_type_match: bool,
    matched_passage: String,
    summary: String,
    suggested_response: String,
    confidence_notes: String,
) -> FinalMatch {
    let composite_score =
        scoring::composite_score(content_relevance, specificity, evidence_type_match);
    FinalMatch {
        question_id: base.question_id,
        chunk_index: base.chunk_index,
        content_relevance,
        specificity,
        evidence_type_match,
        matched_passage,
        summary,
        suggested_response,
        confidence_notes,
        composite_score,
        strength_label: scoring::strength_label(composite_score),
    }
}

/// Parse the extractor's reconciled assessment. `None` when the output is
/// unusable or reports relevance below the candidate threshold.
fn reconcile(
    text: &str,
    base: &MatchCandidate,
    candidates: &[MatchCandidate],
    evidence_type_match: bool,
) -> Option<FinalMatch> {
    let map = parse::extract_object(text)?;
    let relevance = clamp_unit(number_field(&map, "content_relevance")?);
    if relevance < MIN_CONTENT_RELEVANCE {
        debug!(relevance, "Fused relevance below threshold");
        return None;
    }
    let specificity = number_field(&map, "specificity").map_or_else(
        || candidates.iter().map(|c| c.specificity).fold(0.0, f64::max),
        clamp_unit,
    );

    let or_else = |value: String, fallback: &str| {
        if value.is_empty() {
            fallback.to_string()
        } else {
            value
        }
    };

    Some(build(
        base,
        relevance,
        specificity,
        evidence_type_match,
        or_else(
            string_field(&map, "combined_passage"),
            &join_passages(candidates),
        ),
        or_else(string_field(&map, "summary"), &join_summaries(candidates)),
        or_else(
            string_field(&map, "suggested_response"),
            &base.suggested_response,
        ),
        string_field(&map, "confidence_notes"),
    ))
}

fn join_passages(candidates: &[MatchCandidate]) -> String {
    candidates
        .iter()
        .map(|c| c.matched_passage.as_str())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

fn join_summaries(candidates: &[MatchCandidate]) -> String {
    candidates
        .iter()
        .map(|c| c.summary.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic merge used when fusion output is unusable or the run was
/// cancelled: maximum scores, concatenated passages and summaries, and the
/// best candidate's suggested response and chunk reference.
/// `None` when there is nothing to merge.
#[must_use]
pub fn merge_locally(
    candidates: &[MatchCandidate],
    evidence_type_match: bool,
) -> Option<FinalMatch> {
    let base = best_candidate(candidates)?;
    Some(merge_from(base, candidates, evidence_type_match))
}

fn merge_from(
    base: &MatchCandidate,
    candidates: &[MatchCandidate],
    evidence_type_match: bool,
) -> FinalMatch {
    let relevance = candidates.iter().map(|c| c.content_relevance).fold(0.0, f64::max);
    let specificity = candidates.iter().map(|c| c.specificity).fold(0.0, f64::max);
    let chunks: Vec<String> = candidates
        .iter()
        .map(|c| (c.chunk_index + 1).to_string())
        .collect();

    build(
        base,
        relevance,
        specificity,
        evidence_type_match,
        join_passages(candidates),
        join_summaries(candidates),
        base.suggested_response.clone(),
        format!("Combined from chunks {} without reconciliation.", chunks.join(", ")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::mock::ScriptedExtractor;
    use crate::extractor::{Completion, ExtractorError};
    use crate::matching::StrengthLabel;

    fn question() -> Question {
        Question {
            id: 7,
            text: "Is there an incident response plan?".into(),
            evidence_type: "policy".into(),
            what_good_looks_like: String::new(),
            red_flags: Vec::new(),
        }
    }

    fn candidate(chunk_index: usize, relevance: f64, specificity: f64) -> MatchCandidate {
        MatchCandidate {
            question_id: 7,
            chunk_index,
            content_relevance: relevance,
            specificity,
            evidence_type_match: true,
            matched_passage: format!("passage {chunk_index}"),
            summary: format!("summary {chunk_index}."),
            suggested_response: format!("response {chunk_index}"),
            confidence_notes: String::new(),
        }
    }

    #[test]
    fn test_local_merge() {
        let candidates = [candidate(0, 0.6, 0.9), candidate(2, 0.8, 0.4)];
        let merged = merge_locally(&candidates, true).unwrap();

        assert_eq!(merged.question_id, 7);
        assert_eq!(merged.content_relevance, 0.8);
        assert_eq!(merged.specificity, 0.9);
        assert_eq!(merged.matched_passage, "passage 0\n\n[...]\n\npassage 2");
        assert_eq!(merged.summary, "summary 0. summary 2.");
        // 0.5*0.6 + 0.2 + 0.3*0.9 = 0.77 vs 0.5*0.8 + 0.2 + 0.3*0.4 = 0.72
        assert_eq!(merged.suggested_response, "response 0");
        assert_eq!(merged.chunk_index, 0);
        assert_eq!(merged.composite_score, scoring::composite_score(0.8, 0.9, true));
        assert_eq!(merged.strength_label, StrengthLabel::Strong);
        assert!(merged.confidence_notes.contains("chunks 1, 3"));
    }

    #[tokio::test]
    async fn test_nothing_to_merge_or_fuse() {
        assert!(merge_locally(&[], true).is_none());

        let ex = ScriptedExtractor::constant(r#"{"content_relevance": 0.9}"#);
        assert!(FusionEngine::new(&ex).fuse("Doc", &question(), &[], true).await.is_none());
        assert!(ex.requests().is_empty());
    }

    #[tokio::test]
    async fn test_fuse_uses_reconciled_answer() {
        let ex = ScriptedExtractor::constant(
            r#"{"content_relevance": 0.9, "specificity": 0.8, "combined_passage": "both",
                "summary": "one plan", "suggested_response": "Yes, documented."}"#,
        );
        let candidates = [candidate(1, 0.6, 0.3), candidate(5, 0.8, 0.5)];
        let fused = FusionEngine::new(&ex)
            .fuse("IR Plan", &question(), &candidates, true)
            .await
            .unwrap();

        assert!(fused.reconciled);
        assert_eq!(fused.usage.calls, 1);
        let m = fused.final_match;
        assert_eq!(m.chunk_index, 5);
        assert_eq!(m.matched_passage, "both");
        assert_eq!(m.suggested_response, "Yes, documented.");
        assert_eq!(m.composite_score, scoring::composite_score(0.9, 0.8, true));
        assert_eq!(ex.calls_with_system(prompts::FUSION_SYSTEM_PROMPT), 1);
    }

    #[tokio::test]
    async fn test_fuse_falls_back_on_garbage() {
        let ex = ScriptedExtractor::new(|_| {
            Ok(Completion {
                text: "These passages all look good to me!".into(),
                tokens_used: 17,
            })
        });
        let candidates = [candidate(1, 0.6, 0.3), candidate(5, 0.8, 0.5)];
        let fused = FusionEngine::new(&ex)
            .fuse("IR Plan", &question(), &candidates, false)
            .await
            .unwrap();

        assert!(!fused.reconciled);
        assert_eq!(fused.usage.tokens_used, 17);
        assert_eq!(fused.final_match, merge_locally(&candidates, false).unwrap());
        assert!(!fused.final_match.evidence_type_match);
    }

    #[tokio::test]
    async fn test_fuse_falls_back_on_error_and_low_relevance() {
        let failing =
            ScriptedExtractor::new(|_| Err(ExtractorError::Timeout(Duration::from_secs(1))));
        let candidates = [candidate(0, 0.5, 0.5), candidate(1, 0.4, 0.5)];
        let fused = FusionEngine::new(&failing)
            .fuse("Doc", &question(), &candidates, true)
            .await
            .unwrap();
        assert!(!fused.reconciled);
        assert_eq!(fused.final_match.content_relevance, 0.5);

        let low = ScriptedExtractor::constant(r#"{"content_relevance": 0.1}"#);
        let fused = FusionEngine::new(&low)
            .fuse("Doc", &question(), &candidates, true)
            .await
            .unwrap();
        assert!(!fused.reconciled);
        assert!(fused.final_match.content_relevance >= MIN_CONTENT_RELEVANCE);
    }

    #[tokio::test]
    async fn test_partial_fusion_output_fills_from_candidates() {
        let ex = ScriptedExtractor::constant(r#"{"content_relevance": 0.7}"#);
        let candidates = [candidate(0, 0.5, 0.2), candidate(3, 0.6, 0.6)];
        let m = FusionEngine::new(&ex)
            .fuse("Doc", &question(), &candidates, true)
            .await
            .unwrap()
            .final_match;
        assert_eq!(m.specificity, 0.6);
        assert_eq!(m.matched_passage, "passage 0\n\n[...]\n\npassage 3");
        assert_eq!(m.suggested_response, "response 3");
    }
}
