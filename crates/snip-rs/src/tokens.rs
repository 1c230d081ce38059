//! Approximate token counting.
//!
//! Exact counts depend on the provider tokenizer and do not matter here: the
//! numbers only feed savings reports. The estimator never fails.

use std::collections::HashMap;

use crate::state::normalize_id;

/// Default characters per token (conservative estimate for English text and code).
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Estimates the token count of a piece of text.
pub trait TokenEstimator: Send + Sync {
    /// Approximate token count of `text`. Must not panic or fail.
    fn estimate(&self, text: &str) -> usize;

    /// Sum of estimates over several texts.
    fn estimate_all<'a>(&self, texts: &mut dyn Iterator<Item = &'a str>) -> usize {
        texts.map(|t| self.estimate(t)).sum()
    }
}

/// Character-ratio heuristic estimator.
#[derive(Debug, Clone, Copy)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl CharRatioEstimator {
    /// Create an estimator with a custom ratio. Non-positive ratios fall back
    /// to [`DEFAULT_CHARS_PER_TOKEN`].
    pub fn new(chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 {
            chars_per_token
        } else {
            DEFAULT_CHARS_PER_TOKEN
        };
        Self { chars_per_token }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_TOKEN)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> usize {
        (text.chars().count() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Estimated tokens held by the outputs of `ids`. Unknown outputs count as
/// zero.
pub fn estimate_outputs(
    estimator: &dyn TokenEstimator,
    outputs: &HashMap<String, String>,
    ids: &[String],
) -> usize {
    let mut texts = ids
        .iter()
        .filter_map(|id| outputs.get(&normalize_id(id)).map(String::as_str));
    estimator.estimate_all(&mut texts)
}
