//! Evidence matching: question model, per-chunk candidates, scoring, fusion
//! and gap analysis.
pub mod fusion;
pub mod gaps;
pub mod matcher;
pub mod parse;
pub mod prompts;
pub mod scoring;

use serde::{Deserialize, Serialize};

/// Candidates below this relevance never reach the final match set.
pub const MIN_CONTENT_RELEVANCE: f64 = 0.3;

/// One audit question belonging to a control.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: i64,
    pub text: String,
    /// Coarse category of proof expected (policy, register, record, ...).
    #[serde(default)]
    pub evidence_type: String,
    #[serde(default)]
    pub what_good_looks_like: String,
    #[serde(default)]
    pub red_flags: Vec<String>,
}

/// A control and its fixed questionnaire.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub questions: Vec<Question>,
}

/// A match produced from a single chunk. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub question_id: i64,
    pub chunk_index: usize,
    pub content_relevance: f64,
    pub specificity: f64,
    pub evidence_type_match: bool,
    pub matched_passage: String,
    pub summary: String,
    pub suggested_response: String,
    pub confidence_notes: String,
}

impl MatchCandidate {
    /// Composite score under the fixed scoring policy.
    #[must_use]
    pub fn composite_score(&self) -> f64 {
        scoring::composite_score(
            self.content_relevance,
            self.specificity,
            self.evidence_type_match,
        )
    }
}

/// Four-level qualitative bucket derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrengthLabel {
    Minimal,
    Weak,
    Partial,
    Strong,
}

impl StrengthLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Weak => "weak",
            Self::Partial => "partial",
            Self::Strong => "strong",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "minimal" => Some(Self::Minimal),
            "weak" => Some(Self::Weak),
            "partial" => Some(Self::Partial),
            "strong" => Some(Self::Strong),
            _ => None,
        }
    }
}

/// The one match per (document, question) emitted by a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMatch {
    pub question_id: i64,
    /// Chunk the match is traced to; for fused matches, the highest-scoring input.
    pub chunk_index: usize,
    pub content_relevance: f64,
    pub specificity: f64,
    pub evidence_type_match: bool,
    pub matched_passage: String,
    pub summary: String,
    pub suggested_response: String,
    pub confidence_notes: String,
    pub composite_score: f64,
    pub strength_label: StrengthLabel,
}

impl FinalMatch {
    /// Promotes a single-chunk candidate, recomputing its score.
    #[must_use]
    pub fn promote(candidate: MatchCandidate) -> Self {
        let composite_score = candidate.composite_score();
        Self {
            question_id: candidate.question_id,
            chunk_index: candidate.chunk_index,
            content_relevance: candidate.content_relevance,
            specificity: candidate.specificity,
            evidence_type_match: candidate.evidence_type_match,
            matched_passage: candidate.matched_passage,
            summary: candidate.summary,
            suggested_response: candidate.suggested_response,
            confidence_notes: candidate.confidence_notes,
            composite_score,
            strength_label: scoring::strength_label(composite_score),
        }
    }
}

/// Human review state of a stored match. Owned by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Accepted,
    Dismissed,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Dismissed => "dismissed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// A final match together with its review state, as fed to gap analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewedMatch {
    #[serde(flatten)]
    pub final_match: FinalMatch,
    pub review: ReviewStatus,
}

impl From<FinalMatch> for ReviewedMatch {
    fn from(final_match: FinalMatch) -> Self {
        Self {
            final_match,
            review: ReviewStatus::Pending,
        }
    }
}
