use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tiktoken_rs::CoreBPE;
use tracing::debug;

use crate::error::{LoopError, Result};

/// Fallback encoding when a hint cannot be resolved.
const DEFAULT_ENCODING: &str = "cl100k_base";

/// Process-wide cache of resolved encodings, keyed by hint.
/// Building a `CoreBPE` is expensive; the budgeter asks for the same hint
/// every iteration.
static ENCODINGS: OnceLock<Mutex<HashMap<String, Arc<CoreBPE>>>> = OnceLock::new();

/// Token estimator for sizing and truncating prompts.
///
/// The hint may name an encoding (`cl100k_base`, `o200k_base`, ...) or a
/// model identifier that tiktoken knows how to map to one. Unresolvable
/// hints fall back to `cl100k_base`.
pub struct TokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TokenEstimator {
    /// Resolve the hint to an encoding, consulting the process-wide cache.
    ///
    /// Fails only when no backend at all can be initialized; the system must
    /// not run with unbounded prompt sizes.
    pub fn new(hint: &str) -> Result<Self> {
        let cache = ENCODINGS.get_or_init(|| Mutex::new(HashMap::new()));
        {
            let cache = cache.lock().expect("encoding cache poisoned");
            if let Some(bpe) = cache.get(hint) {
                return Ok(Self {
                    bpe: Arc::clone(bpe),
                });
            }
        }

        let bpe = Self::resolve(hint)?;
        let bpe = Arc::new(bpe);
        let mut cache = cache.lock().expect("encoding cache poisoned");
        cache.insert(hint.to_string(), Arc::clone(&bpe));
        Ok(Self { bpe })
    }

    fn resolve(hint: &str) -> Result<CoreBPE> {
        let by_name = match hint {
            "cl100k_base" => Some(tiktoken_rs::cl100k_base()),
            "o200k_base" => Some(tiktoken_rs::o200k_base()),
            "p50k_base" => Some(tiktoken_rs::p50k_base()),
            "r50k_base" => Some(tiktoken_rs::r50k_base()),
            _ => None,
        };
        if let Some(result) = by_name {
            return result.map_err(|_| LoopError::TokenizerUnavailable(hint.to_string()));
        }

        // Not a known encoding name; try it as a model identifier.
        if let Ok(bpe) = tiktoken_rs::get_bpe_from_model(hint) {
            return Ok(bpe);
        }

        debug!("unresolvable encoding hint '{}', using {}", hint, DEFAULT_ENCODING);
        tiktoken_rs::cl100k_base()
            .map_err(|_| LoopError::TokenizerUnavailable(DEFAULT_ENCODING.to_string()))
    }

    /// Estimate the token count for the given text
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len()
    }

    /// Truncate `text` to at most `max_tokens` tokens, returning a decoded
    /// prefix. Backs off token by token so a multi-byte character split
    /// across a token boundary never yields invalid text.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_with_special_tokens(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        let mut end = max_tokens;
        while end > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..end].to_vec()) {
                return prefix;
            }
            end -= 1;
        }
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_is_positive_for_text() {
        let estimator = TokenEstimator::new("cl100k_base").unwrap();
        let count = estimator.count("Hello, world!");
        assert!(count > 0);
        assert!(count < 10);
    }

    #[test]
    fn test_model_hint_resolves() {
        let estimator = TokenEstimator::new("gpt-4").unwrap();
        assert!(estimator.count("Hello") > 0);
    }

    #[test]
    fn test_unknown_hint_falls_back() {
        let estimator = TokenEstimator::new("not-a-real-encoding").unwrap();
        assert!(estimator.count("Hello") > 0);
    }

    #[test]
    fn test_truncate_respects_ceiling() {
        let estimator = TokenEstimator::new("cl100k_base").unwrap();
        let text = "word ".repeat(500);
        let truncated = estimator.truncate(&text, 10);
        assert!(estimator.count(&truncated) <= 10);
        assert!(text.starts_with(&truncated));
    }

    #[test]
    fn test_truncate_noop_under_ceiling() {
        let estimator = TokenEstimator::new("cl100k_base").unwrap();
        assert_eq!(estimator.truncate("short text", 100), "short text");
    }

    #[test]
    fn test_truncate_multibyte_stays_valid() {
        let estimator = TokenEstimator::new("cl100k_base").unwrap();
        let text = "日本語のテキスト".repeat(50);
        for max in 1..12 {
            let truncated = estimator.truncate(&text, max);
            // String construction already guarantees validity; check the
            // prefix relationship instead.
            assert!(text.starts_with(&truncated));
        }
    }
}
