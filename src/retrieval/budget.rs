/// Character budget applied to a ranked list of chunks.
use serde::{Deserialize, Serialize};

/// Visible separator placed between chunks of one section.
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// What to do with the first chunk that no longer fits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Drop it and everything after it.
    #[default]
    WholeChunks,
    /// Keep a prefix of it if at least `min_remaining` chars of budget are
    /// left after the separator, then stop.
    PartialTrailing { min_remaining: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub max_chars: usize,
    pub policy: TruncationPolicy,
}

/// Output of [`ContextBudget::fit`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Fitted {
    pub text: String,
    /// Input indices that contributed text, in order.
    pub included: Vec<usize>,
}

impl ContextBudget {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            policy: TruncationPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: TruncationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Join ranked chunks until the budget runs out.
    pub fn truncate<S: AsRef<str>>(&self, chunks: &[S]) -> String {
        self.fit(chunks).text
    }

    /// Like [`truncate`](Self::truncate), also reporting which chunks made it.
    ///
    /// Lengths are counted in chars and separators count against the budget,
    /// so `text` never exceeds `max_chars` chars. Chunks are trimmed first and
    /// empty ones are skipped.
    pub fn fit<S: AsRef<str>>(&self, chunks: &[S]) -> Fitted {
        let separator_len = CHUNK_SEPARATOR.chars().count();
        let mut fitted = Fitted::default();
        let mut used = 0usize;

        for (i, chunk) in chunks.iter().enumerate() {
            let content = chunk.as_ref().trim();
            if content.is_empty() {
                continue;
            }

            let separator = if fitted.included.is_empty() { 0 } else { separator_len };
            let len = content.chars().count();

            if used + separator + len <= self.max_chars {
                if separator > 0 {
                    fitted.text.push_str(CHUNK_SEPARATOR);
                }
                fitted.text.push_str(content);
                fitted.included.push(i);
                used += separator + len;
                continue;
            }

            if let TruncationPolicy::PartialTrailing { min_remaining } = self.policy {
                let remaining = self.max_chars.saturating_sub(used + separator);
                if remaining > 0 && remaining >= min_remaining {
                    if separator > 0 {
                        fitted.text.push_str(CHUNK_SEPARATOR);
                    }
                    fitted.text.extend(content.chars().take(remaining));
                    fitted.included.push(i);
                }
            }
            break;
        }

        fitted
    }
}
