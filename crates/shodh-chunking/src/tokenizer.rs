//! Token estimation against a fixed reference BPE.
//!
//! Plain text is measured with the GPT-2 encoding, chat message lists with
//! cl100k. Both encoders are built once per process and shared read-only.
//! Every budgeting decision in the crate goes through [`TokenEstimator`].

use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tiktoken_rs::CoreBPE;

static GPT2_BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::r50k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::error!("Failed to load GPT-2 BPE, falling back to char estimate: {}", e);
        None
    }
});

static CHAT_BPE: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(e) => {
        tracing::error!("Failed to load cl100k BPE, falling back to char estimate: {}", e);
        None
    }
});

/// Heuristic used only if the bundled BPE tables cannot be loaded.
const FALLBACK_CHARS_PER_TOKEN: usize = 4;

// Chat format overhead, see the OpenAI cookbook "How to count tokens".
const TOKENS_PER_MESSAGE: usize = 4;
const TOKENS_PER_NAME_DISCOUNT: usize = 1;
const REPLY_PRIMING_TOKENS: usize = 3;

/// One chat-style message. Only `content` is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            name: None,
        }
    }
}

/// Handle to the shared encoders. Cheap to copy; holds no state of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn new() -> Self {
        Self
    }

    /// Token count of `text` under the GPT-2 encoding, special tokens allowed.
    pub fn estimate_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        match GPT2_BPE.as_ref() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            None => fallback_count(text),
        }
    }

    /// Planning estimate for a chat request built from `messages`.
    pub fn estimate_message_tokens(&self, messages: &[ChatMessage]) -> usize {
        let count = |value: &str| -> usize {
            match CHAT_BPE.as_ref() {
                Some(bpe) => bpe.encode_with_special_tokens(value).len(),
                None => fallback_count(value),
            }
        };

        let mut num_tokens = 0;
        for message in messages {
            num_tokens += TOKENS_PER_MESSAGE;
            num_tokens += count(&message.role);
            num_tokens += count(&message.content);
            if let Some(name) = &message.name {
                // The role is omitted when a name is present.
                num_tokens += count(name);
                num_tokens -= TOKENS_PER_NAME_DISCOUNT;
            }
        }
        num_tokens + REPLY_PRIMING_TOKENS
    }

    /// Truncate `text` to at most `max_tokens` tokens.
    ///
    /// Encodes, keeps the leading tokens and decodes. When the cut falls inside
    /// a multi-byte character the partial tokens are dropped so the result is
    /// always valid text.
    pub fn construct_tokens_with_size(&self, text: &str, max_tokens: usize) -> String {
        let Some(bpe) = GPT2_BPE.as_ref() else {
            return text
                .chars()
                .take(max_tokens * FALLBACK_CHARS_PER_TOKEN)
                .collect();
        };

        let tokens = bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }

        let mut end = max_tokens;
        while end > 0 {
            if let Ok(decoded) = bpe.decode(tokens[..end].to_vec()) {
                if bpe.encode_with_special_tokens(&decoded).len() <= max_tokens {
                    return decoded;
                }
            }
            end -= 1;
        }
        String::new()
    }

    /// Split `text` into consecutive slices of at most `slice_tokens` tokens.
    ///
    /// Slices end on character boundaries. A single character that needs more
    /// tokens than `slice_tokens` is emitted whole.
    pub fn slice_by_tokens(&self, text: &str, slice_tokens: usize) -> Vec<String> {
        let slice_tokens = slice_tokens.max(1);
        let Some(bpe) = GPT2_BPE.as_ref() else {
            let chars: Vec<char> = text.chars().collect();
            return chars
                .chunks(slice_tokens * FALLBACK_CHARS_PER_TOKEN)
                .map(|c| c.iter().collect())
                .collect();
        };

        let tokens = bpe.encode_with_special_tokens(text);
        let mut slices = Vec::new();
        let mut start = 0;

        while start < tokens.len() {
            let target = (start + slice_tokens).min(tokens.len());
            let mut decoded = None;

            // Shrink first so slices never exceed the budget. Re-encoding a
            // slice on its own can merge differently, so the decoded text is
            // measured again.
            let mut end = target;
            while end > start {
                if let Ok(s) = bpe.decode(tokens[start..end].to_vec()) {
                    if bpe.encode_with_special_tokens(&s).len() <= slice_tokens {
                        decoded = Some((end, s));
                        break;
                    }
                }
                end -= 1;
            }

            if decoded.is_none() {
                let mut end = target + 1;
                while end <= tokens.len() {
                    if let Ok(s) = bpe.decode(tokens[start..end].to_vec()) {
                        decoded = Some((end, s));
                        break;
                    }
                    end += 1;
                }
            }

            match decoded {
                Some((end, s)) => {
                    slices.push(s);
                    start = end;
                }
                None => break,
            }
        }

        slices
    }
}

fn fallback_count(text: &str) -> usize {
    text.chars().count().div_ceil(FALLBACK_CHARS_PER_TOKEN)
}

/// Shorthand for [`TokenEstimator::estimate_tokens`].
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator.estimate_tokens(text)
}

/// Shorthand for [`TokenEstimator::construct_tokens_with_size`].
pub fn clip_text(text: &str, max_tokens: usize) -> String {
    TokenEstimator.construct_tokens_with_size(text, max_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_has_no_tokens() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let text = "Azure AI Search supports hybrid retrieval.";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
        assert!(estimate_tokens(text) > 0);
    }

    #[test]
    fn test_estimate_monotonic_in_length() {
        let mut previous = 0;
        let mut text = String::new();
        for word in ["alpha", " beta", " gamma", " delta", " epsilon", " zeta"] {
            text.push_str(word);
            let current = estimate_tokens(&text);
            assert!(current >= previous, "{} < {} for {:?}", current, previous, text);
            previous = current;
        }
    }

    #[test]
    fn test_message_overhead() {
        let estimator = TokenEstimator::new();
        assert_eq!(estimator.estimate_message_tokens(&[]), REPLY_PRIMING_TOKENS);

        let plain = vec![ChatMessage::new("user", "hello")];
        let named = vec![ChatMessage {
            name: Some("bob".to_string()),
            ..ChatMessage::new("user", "hello")
        }];
        let plain_count = estimator.estimate_message_tokens(&plain);
        let named_count = estimator.estimate_message_tokens(&named);

        // 4 per message + role + content + 3 priming
        assert!(plain_count >= TOKENS_PER_MESSAGE + REPLY_PRIMING_TOKENS + 2);
        assert!(named_count >= plain_count);
    }

    #[test]
    fn test_construct_tokens_with_size_truncates() {
        let text = "one two three four five six seven eight nine ten";
        let clipped = clip_text(text, 3);
        assert!(estimate_tokens(&clipped) <= 3);
        assert!(text.starts_with(&clipped));
        assert_eq!(clip_text(text, 1000), text);
        assert_eq!(clip_text(text, 0), "");
    }

    #[test]
    fn test_construct_tokens_mid_character_stays_valid() {
        let text = "日本語のテキストを分割します";
        for n in 0..estimate_tokens(text) {
            let clipped = clip_text(text, n);
            assert!(text.starts_with(&clipped));
            assert!(estimate_tokens(&clipped) <= n);
        }
    }

    #[test]
    fn test_slice_by_tokens_recombines() {
        let text = "x".repeat(10_000);
        let slices = TokenEstimator.slice_by_tokens(&text, 50);
        assert!(slices.len() > 1);
        assert_eq!(slices.concat(), text);
        for slice in &slices {
            assert!(estimate_tokens(slice) <= 50);
        }
    }

    #[test]
    fn test_slice_by_tokens_multibyte() {
        let text = "🚀🚀🚀 emoji heavy 🚀 text";
        let slices = TokenEstimator.slice_by_tokens(text, 1);
        assert_eq!(slices.concat(), text);
    }
}
