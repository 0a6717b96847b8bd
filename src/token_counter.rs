//! Token counting for the digest.
//!
//! Wraps a byte-pair-encoding tokenizer behind a thread-safe, lazily
//! initialized handle. Counts are memoized per text in a bounded LRU so
//! repeated digests of cached content never re-encode. When no tokenizer
//! model file is configured (or it fails to load) the counter degrades to a
//! byte-length approximation rather than failing requests.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};
use tokenizers::Tokenizer;
use tracing::{info, warn};

use crate::cache::BoundedLru;

/// Average bytes per BPE token, used by the fallback approximation.
const FALLBACK_BYTES_PER_TOKEN: usize = 4;

pub struct TokenCounter {
    tokenizer_path: Option<PathBuf>,
    tokenizer: OnceCell<Option<Tokenizer>>,
    cache: Arc<BoundedLru<String, usize>>,
}

impl TokenCounter {
    pub fn new(tokenizer_path: Option<PathBuf>, cache_capacity: usize) -> Self {
        Self {
            tokenizer_path,
            tokenizer: OnceCell::new(),
            cache: Arc::new(BoundedLru::new(cache_capacity, None)),
        }
    }

    /// The memoization cache, for registration with the cache registry.
    pub fn cache(&self) -> Arc<BoundedLru<String, usize>> {
        self.cache.clone()
    }

    /// Counts tokens in `text`, initializing the tokenizer on first use.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }

        let key = hex::encode(Sha256::digest(text.as_bytes()));
        if let Some(count) = self.cache.get(&key) {
            return count;
        }

        let count = match self.tokenizer() {
            Some(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.get_ids().len(),
                Err(e) => {
                    warn!(error = %e, "Tokenizer encode failed, using approximation");
                    approximate_count(text)
                }
            },
            None => approximate_count(text),
        };

        self.cache.put(key, count);
        count
    }

    fn tokenizer(&self) -> Option<&Tokenizer> {
        self.tokenizer
            .get_or_init(|| {
                let path = self.tokenizer_path.as_ref()?;
                match Tokenizer::from_file(path) {
                    Ok(t) => {
                        info!(path = %path.display(), "Tokenizer loaded");
                        Some(t)
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "Tokenizer load failed, falling back to byte-length approximation"
                        );
                        None
                    }
                }
            })
            .as_ref()
    }
}

fn approximate_count(text: &str) -> usize {
    text.len().div_ceil(FALLBACK_BYTES_PER_TOKEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_counts_zero() {
        let counter = TokenCounter::new(None, 16);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn test_fallback_approximation() {
        let counter = TokenCounter::new(None, 16);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert_eq!(counter.count(&"x".repeat(400)), 100);
    }

    #[test]
    fn test_counts_are_memoized() {
        let counter = TokenCounter::new(None, 16);
        let text = "the same digest text";
        let first = counter.count(text);
        let second = counter.count(text);
        assert_eq!(first, second);
        assert_eq!(counter.cache().stats().hits, 1);
    }

    #[test]
    fn test_missing_model_file_degrades() {
        let counter = TokenCounter::new(Some(PathBuf::from("/nonexistent/tokenizer.json")), 16);
        // Must not panic or error; byte-length fallback applies.
        assert_eq!(counter.count("abcdefgh"), 2);
    }
}
