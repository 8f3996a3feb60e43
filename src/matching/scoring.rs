/// Composite scoring policy shared by the chunk matcher and fusion.
///
/// The weights are fixed. Changing them changes what "strong evidence" means
/// for every stored match, so they live here and nowhere else.
use super::StrengthLabel;

const RELEVANCE_WEIGHT: f64 = 0.5;
const EVIDENCE_TYPE_WEIGHT: f64 = 0.2;
const SPECIFICITY_WEIGHT: f64 = 0.3;
/// Evidence-type factor when the document is not the expected kind of proof.
const EVIDENCE_TYPE_MISMATCH: f64 = 0.3;

pub const STRONG_THRESHOLD: f64 = 0.85;
pub const PARTIAL_THRESHOLD: f64 = 0.70;
pub const WEAK_THRESHOLD: f64 = 0.50;

/// Clamp an untrusted score into `[0, 1]`; NaN becomes 0.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `0.5·relevance + 0.2·(type match ? 1.0 : 0.3) + 0.3·specificity`, rounded to 4 places.
#[must_use]
pub fn composite_score(content_relevance: f64, specificity: f64, evidence_type_match: bool) -> f64 {
    let type_factor = if evidence_type_match {
        1.0
    } else {
        EVIDENCE_TYPE_MISMATCH
    };
    let raw = RELEVANCE_WEIGHT * clamp_unit(content_relevance)
        + EVIDENCE_TYPE_WEIGHT * type_factor
        + SPECIFICITY_WEIGHT * clamp_unit(specificity);
    ((raw * 10_000.0).round() / 10_000.0).clamp(0.0, 1.0)
}

#[must_use]
pub fn strength_label(score: f64) -> StrengthLabel {
    if score >= STRONG_THRESHOLD {
        StrengthLabel::Strong
    } else if score >= PARTIAL_THRESHOLD {
        StrengthLabel::Partial
    } else if score >= WEAK_THRESHOLD {
        StrengthLabel::Weak
    } else {
        StrengthLabel::Minimal
    }
}
