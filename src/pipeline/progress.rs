/// Ordered progress events published by the pipeline.
///
/// The pipeline writes to a [`ProgressReporter`]; a transport (CLI, SSE)
/// drains the receiving end. Delivery is best-effort: once the receiver is
/// gone, events are dropped and the pipeline keeps running.
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

use crate::matching::gaps::GapReport;
use crate::matching::{FinalMatch, StrengthLabel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Extracting,
    Chunking,
    Analysing,
    Fusion,
    Complete,
}

/// Aggregate counts emitted with the terminal `complete` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_matches: usize,
    pub strong_matches: usize,
    pub partial_matches: usize,
    pub weak_matches: usize,
    pub evidence_gaps: usize,
    pub pending_suggestions: usize,
}

impl RunSummary {
    /// Summary for a run that produced no matches.
    #[must_use]
    pub fn empty(question_count: usize) -> Self {
        Self {
            evidence_gaps: question_count,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn from_matches(matches: &[FinalMatch], gaps: &GapReport) -> Self {
        let count = |label: StrengthLabel| {
            matches
                .iter()
                .filter(|m| m.strength_label == label)
                .count()
        };
        Self {
            total_matches: matches.len(),
            strong_matches: count(StrengthLabel::Strong),
            partial_matches: count(StrengthLabel::Partial),
            weak_matches: count(StrengthLabel::Weak),
            evidence_gaps: gaps.gap_questions,
            pending_suggestions: gaps.pending_suggestions(),
        }
    }
}

/// One event on the wire.
///
/// Serialises untagged: `{"phase", "current", "total", "message"}`,
/// `{"match": {...}}` or `{"error": "..."}`. `current`/`total` count chunks
/// during `analysing` and multi-chunk questions during `fusion`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Progress {
        phase: Phase,
        current: usize,
        total: usize,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<RunSummary>,
    },
    Match {
        #[serde(rename = "match")]
        final_match: Box<FinalMatch>,
    },
    Error {
        error: String,
    },
}

impl ProgressEvent {
    #[must_use]
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Progress { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub struct ProgressReporter {
    tx: Option<UnboundedSender<ProgressEvent>>,
    disconnected: AtomicBool,
}

impl ProgressReporter {
    /// A reporter and the receiver a transport drains.
    #[must_use]
    pub fn channel() -> (Self, UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: Some(tx),
                disconnected: AtomicBool::new(false),
            },
            rx,
        )
    }

    /// A reporter that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: None,
            disconnected: AtomicBool::new(false),
        }
    }

    /// Whether the receiving side has gone away.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    pub fn send(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() && !self.disconnected.swap(true, Ordering::Relaxed) {
            warn!("Progress receiver disconnected, dropping further events");
        }
    }

    pub fn phase(&self, phase: Phase, current: usize, total: usize, message: impl Into<String>) {
        let message = message.into();
        debug!(?phase, current, total, "{message}");
        self.send(ProgressEvent::Progress {
            phase,
            current,
            total,
            message,
            summary: None,
        });
    }

    pub fn matched(&self, final_match: &FinalMatch) {
        self.send(ProgressEvent::Match {
            final_match: Box::new(final_match.clone()),
        });
    }

    pub fn complete(&self, summary: RunSummary, message: impl Into<String>) {
        self.send(ProgressEvent::Progress {
            phase: Phase::Complete,
            current: summary.total_matches,
            total: summary.total_matches,
            message: message.into(),
            summary: Some(summary),
        });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.send(ProgressEvent::Error {
            error: error.into(),
        });
    }
}
