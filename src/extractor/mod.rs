/// Semantic-extraction collaborator: an untrusted text generator.
///
/// The pipeline receives an `Arc<dyn SemanticExtractor>` at construction;
/// tests substitute [`mock::ScriptedExtractor`].
pub mod anthropic;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Errors that can occur while calling the extractor.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractorError {
    #[error("network error: {0}")]
    Network(String),

    #[error("extractor unreachable: {0}")]
    Unreachable(String),

    #[error("extractor rejected credentials: {0}")]
    Unauthorized(String),

    #[error("extractor call timed out after {0:?}")]
    Timeout(Duration),

    #[error("extractor API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("invalid extractor response: {0}")]
    InvalidResponse(String),
}

impl ExtractorError {
    /// Failures that will repeat for every call in a run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Unreachable(_))
    }
}

/// Generated text plus the tokens the call consumed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait SemanticExtractor: Send + Sync {
    /// Run one completion to the end.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, ExtractorError>;

    /// Like [`complete`](Self::complete), but sends text deltas to `tokens`
    /// as they arrive. A closed receiver does not fail the call.
    async fn stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        tokens: UnboundedSender<String>,
    ) -> Result<Completion, ExtractorError> {
        let completion = self.complete(system_prompt, user_prompt).await?;
        let _ = tokens.send(completion.text.clone());
        Ok(completion)
    }
}

/// Call the extractor with a single-call timeout, streaming deltas to
/// `tokens` when a sink is given.
pub async fn call_extractor(
    extractor: &dyn SemanticExtractor,
    system_prompt: &str,
    user_prompt: &str,
    timeout: Option<Duration>,
    tokens: Option<&UnboundedSender<String>>,
) -> Result<Completion, ExtractorError> {
    let call = async {
        match tokens {
            Some(tx) => extractor.stream(system_prompt, user_prompt, tx.clone()).await,
            None => extractor.complete(system_prompt, user_prompt).await,
        }
    };
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(ExtractorError::Timeout(limit))),
        None => call.await,
    }
}

/// Token and call accounting across extractor calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub calls: u32,
    pub tokens_used: u64,
}

impl Usage {
    #[must_use]
    pub fn of(completion: &Completion) -> Self {
        Self {
            calls: 1,
            tokens_used: completion.tokens_used,
        }
    }

    pub fn add(&mut self, other: Usage) {
        self.calls += other.calls;
        self.tokens_used += other.tokens_used;
    }
}

#[cfg(test)]
mod tests {
    use super::mock::ScriptedExtractor;
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ExtractorError::Unauthorized("401".into()).is_fatal());
        assert!(ExtractorError::Unreachable("dns".into()).is_fatal());
        assert!(!ExtractorError::Timeout(Duration::from_secs(1)).is_fatal());
        assert!(!ExtractorError::Network("reset".into()).is_fatal());
        assert!(
            !ExtractorError::Api {
                status: 529,
                body: "overloaded".into()
            }
            .is_fatal()
        );
    }

    #[tokio::test]
    async fn test_call_times_out() {
        let slow = ScriptedExtractor::new(|_| Ok(Completion::default()))
            .with_delay(Duration::from_millis(200));
        let err = call_extractor(&slow, "s", "u", Some(Duration::from_millis(10)), None)
            .await
            .unwrap_err();
        assert_eq!(err, ExtractorError::Timeout(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_default_stream_forwards_whole_text() {
        let ex = ScriptedExtractor::new(|_| {
            Ok(Completion {
                text: "[]".into(),
                tokens_used: 3,
            })
        });
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = call_extractor(&ex, "s", "u", None, Some(&tx)).await.unwrap();
        assert_eq!(out.tokens_used, 3);
        assert_eq!(rx.recv().await.as_deref(), Some("[]"));
    }

    #[test]
    fn test_usage_accumulates() {
        let mut total = Usage::default();
        total.add(Usage::of(&Completion {
            text: String::new(),
            tokens_used: 10,
        }));
        total.add(Usage {
            calls: 2,
            tokens_used: 5,
        });
        assert_eq!(
            total,
            Usage {
                calls: 3,
                tokens_used: 15
            }
        );
    }
}
