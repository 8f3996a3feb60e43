/// Scripted extractor for tests.
///
/// Answers every call through a closure and records each request, so tests
/// can assert which prompts were sent and how often.
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{Completion, ExtractorError, SemanticExtractor};

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorRequest {
    pub system_prompt: String,
    pub user_prompt: String,
}

type Script = dyn Fn(&ExtractorRequest) -> Result<Completion, ExtractorError> + Send + Sync;

pub struct ScriptedExtractor {
    script: Box<Script>,
    delay: Option<Duration>,
    requests: Mutex<Vec<ExtractorRequest>>,
}

impl ScriptedExtractor {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&ExtractorRequest) -> Result<Completion, ExtractorError> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// An extractor that always answers with `text`.
    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| {
            Ok(Completion {
                text: text.clone(),
                tokens_used: 1,
            })
        })
    }

    /// Sleep before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<ExtractorRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of requests whose system prompt equals `system_prompt`.
    pub fn calls_with_system(&self, system_prompt: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.system_prompt == system_prompt)
            .count()
    }
}

#[async_trait]
impl SemanticExtractor for ScriptedExtractor {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, ExtractorError> {
        let request = ExtractorRequest {
            system_prompt: system_prompt.to_string(),
            user_prompt: user_prompt.to_string(),
        };
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_requests() {
        let ex = ScriptedExtractor::constant("ok");
        ex.complete("sys-a", "one").await.unwrap();
        ex.complete("sys-b", "two").await.unwrap();
        ex.complete("sys-a", "three").await.unwrap();

        assert_eq!(ex.requests().len(), 3);
        assert_eq!(ex.requests()[1].user_prompt, "two");
        assert_eq!(ex.calls_with_system("sys-a"), 2);
    }

    #[tokio::test]
    async fn test_script_sees_prompts() {
        let ex = ScriptedExtractor::new(|req| {
            if req.user_prompt.contains("fail") {
                Err(ExtractorError::Network("reset".into()))
            } else {
                Ok(Completion {
                    text: req.user_prompt.to_uppercase(),
                    tokens_used: 2,
                })
            }
        });
        assert_eq!(ex.complete("s", "hi").await.unwrap().text, "HI");
        assert!(ex.complete("s", "please fail").await.is_err());
    }
}
