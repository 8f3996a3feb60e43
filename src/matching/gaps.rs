/// Evidence-gap analysis over the current match set of a control.
///
/// The report is derived on demand and never stored.
use serde::Serialize;

use super::scoring::{STRONG_THRESHOLD, WEAK_THRESHOLD};
use super::{FinalMatch, Question, ReviewStatus, ReviewedMatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceStatus {
    None,
    Partial,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCoverage {
    pub question_id: i64,
    pub evidence_status: EvidenceStatus,
    pub best_score: Option<f64>,
    pub match_count: usize,
    pub pending_suggestion_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GapReport {
    pub questions: Vec<QuestionCoverage>,
    pub total_questions: usize,
    pub covered_questions: usize,
    pub gap_questions: usize,
}

impl GapReport {
    /// Total pending suggestions across all questions.
    #[must_use]
    pub fn pending_suggestions(&self) -> usize {
        self.questions.iter().map(|q| q.pending_suggestion_count).sum()
    }

    #[must_use]
    pub fn coverage(&self, question_id: i64) -> Option<&QuestionCoverage> {
        self.questions.iter().find(|q| q.question_id == question_id)
    }
}

/// Full evidence: a strong score from the expected kind of document.
fn is_full(best: &FinalMatch) -> bool {
    best.composite_score >= STRONG_THRESHOLD && best.evidence_type_match
}

/// Classify every question against `matches`. Matches for questions outside
/// `questions` are ignored.
#[must_use]
pub fn analyse_gaps(questions: &[Question], matches: &[ReviewedMatch]) -> GapReport {
    let coverage: Vec<QuestionCoverage> = questions
        .iter()
        .map(|q| {
            let for_question: Vec<&ReviewedMatch> = matches
                .iter()
                .filter(|m| m.final_match.question_id == q.id)
                .collect();

            let best = for_question
                .iter()
                .map(|m| &m.final_match)
                .reduce(|best, m| {
                    if m.composite_score > best.composite_score {
                        m
                    } else {
                        best
                    }
                });

            let evidence_status = match best {
                None => EvidenceStatus::None,
                Some(b) if is_full(b) => EvidenceStatus::Full,
                Some(_) => EvidenceStatus::Partial,
            };

            QuestionCoverage {
                question_id: q.id,
                evidence_status,
                best_score: best.map(|b| b.composite_score),
                match_count: for_question.len(),
                pending_suggestion_count: for_question
                    .iter()
                    .filter(|m| {
                        m.review == ReviewStatus::Pending
                            && m.final_match.composite_score >= WEAK_THRESHOLD
                    })
                    .count(),
            }
        })
        .collect();

    let covered_questions = coverage
        .iter()
        .filter(|c| c.evidence_status != EvidenceStatus::None)
        .count();

    GapReport {
        total_questions: questions.len(),
        covered_questions,
        gap_questions: questions.len() - covered_questions,
        questions: coverage,
    }
}
