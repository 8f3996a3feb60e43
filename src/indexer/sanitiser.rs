/// Sanitiser for extracted document text.
///
/// Document text is untrusted: it ends up verbatim inside prompts sent to the
/// semantic extractor. Control characters are stripped, known prompt-injection
/// phrases and chat-template delimiters are redacted, and the result is capped
/// at a hard length ceiling. Nothing here fails; problems are logged.
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

/// Hard ceiling on sanitised text length, in characters.
pub const DEFAULT_MAX_CHARS: usize = 500_000;

/// Replacement for every suspicious pattern.
pub const REDACTION_MARKER: &str = "[REDACTED]";

static SUSPICIOUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Instruction overrides
        r"(?i)\bignore\s+(?:all\s+)?(?:previous|prior|above)\s+instructions\b",
        r"(?i)\bdisregard\s+(?:all\s+)?(?:previous|prior|above)\b",
        // Role injection markers, anywhere in the text
        r"(?i)\b(?:system|assistant|human)\s*:",
        // Chat-template delimiters
        r"(?i)\[/?INST\]",
        r"(?i)<<\s*/?SYS\s*>>",
        r"(?i)<\|[a-z_]{2,20}\|>",
        r"(?i)</?s>",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Result of sanitising one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitised {
    pub text: String,
    pub redactions: usize,
    pub control_chars_removed: usize,
    pub truncated: bool,
}

/// Configurable sanitiser; `Sanitiser::default()` applies the 500 000 char ceiling.
#[derive(Debug, Clone, Copy)]
pub struct Sanitiser {
    pub max_chars: usize,
}

impl Default for Sanitiser {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CHARS,
        }
    }
}

impl Sanitiser {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Clean `text`, logging redactions and truncation against `source_label`.
    pub fn clean(&self, text: &str, source_label: &str) -> Sanitised {
        if text.is_empty() {
            return Sanitised {
                text: String::new(),
                redactions: 0,
                control_chars_removed: 0,
                truncated: false,
            };
        }

        let mut control_chars_removed = 0;
        let mut cleaned: String = text
            .chars()
            .filter(|&c| {
                let strip = c.is_ascii_control() && !matches!(c, '\n' | '\t' | '\r');
                if strip {
                    control_chars_removed += 1;
                }
                !strip
            })
            .collect();

        let mut redactions = 0;
        for pattern in SUSPICIOUS_PATTERNS.iter() {
            let found = pattern.find_iter(&cleaned).count();
            if found > 0 {
                redactions += found;
                cleaned = pattern
                    .replace_all(&cleaned, REDACTION_MARKER)
                    .into_owned();
            }
        }

        if control_chars_removed > 0 {
            debug!(
                source = source_label,
                removed = control_chars_removed,
                "Stripped control characters"
            );
        }
        if redactions > 0 {
            warn!(
                source = source_label,
                redactions, "Redacted suspicious prompt-injection patterns"
            );
        }

        let mut truncated = false;
        if let Some((cut, _)) = cleaned.char_indices().nth(self.max_chars) {
            warn!(
                source = source_label,
                max_chars = self.max_chars,
                "Document text exceeds length ceiling, truncating"
            );
            cleaned.truncate(cut);
            truncated = true;
        }

        Sanitised {
            text: cleaned,
            redactions,
            control_chars_removed,
            truncated,
        }
    }
}

/// Sanitise with the default ceiling and return only the clean text.
#[must_use]
pub fn sanitise(text: &str, source_label: &str) -> String {
    Sanitiser::default().clean(text, source_label).text
}
