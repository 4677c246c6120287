//! Word vocabulary fitted on the training texts.
//!
//! Indices start at 1; 0 is reserved for padding. Only the `max_words - 1`
//! most frequent words (by document frequency) receive an index, every other
//! word is out-of-vocabulary and dropped when encoding.

use crate::error::ForecastError;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Characters replaced by a space before splitting.
pub const TOKENIZER_FILTERS: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~\t\n";

/// Lowercase, strip the filter characters and split on whitespace.
pub fn split_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if TOKENIZER_FILTERS.contains(c) { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Longest cleaned text in whitespace-separated tokens (at least 1).
pub fn max_token_count<S: AsRef<str>>(texts: &[S]) -> usize {
    texts
        .iter()
        .map(|t| t.as_ref().split_whitespace().count())
        .max()
        .unwrap_or(0)
        .max(1)
}

/// Left-pad with zeros, or keep only the last `len` ids.
pub fn pad_sequence(ids: &[usize], len: usize) -> Vec<i64> {
    let kept = &ids[ids.len().saturating_sub(len)..];
    let mut padded = vec![0i64; len - kept.len()];
    padded.extend(kept.iter().map(|&id| id as i64));
    padded
}

/// Word-to-index table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    /// Cap on indices: every assigned index is `< max_words`
    pub max_words: usize,
    /// Words in index order; `words[i]` has index `i + 1`
    pub words: Vec<String>,
    /// Reverse mapping from word to index
    pub word_index: HashMap<String, usize>,
}

impl Vocabulary {
    /// Fit on the training texts only.
    ///
    /// Ranking: document frequency, then total count, then first occurrence.
    pub fn fit<S: AsRef<str>>(texts: &[S], max_words: usize) -> Self {
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        let mut total: HashMap<String, usize> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();

        for text in texts {
            let words = split_words(text.as_ref());
            let unique: HashSet<&String> = words.iter().collect();
            for word in unique {
                *doc_freq.entry(word.clone()).or_insert(0) += 1;
            }
            for word in &words {
                let count = total.entry(word.clone()).or_insert(0);
                if *count == 0 {
                    first_seen.push(word.clone());
                }
                *count += 1;
            }
        }

        // Stable sort keeps first-occurrence order among ties.
        let mut ranked = first_seen;
        ranked.sort_by_key(|w| (Reverse(doc_freq[w]), Reverse(total[w])));

        let capacity = max_words.saturating_sub(1);
        let dropped = ranked.len().saturating_sub(capacity);
        ranked.truncate(capacity);

        if dropped > 0 {
            let overflow = ForecastError::VocabularyOverflow {
                dropped,
                cap: max_words,
            };
            warn!("{overflow}");
        }

        let word_index = ranked
            .iter()
            .enumerate()
            .map(|(i, w)| (w.clone(), i + 1))
            .collect();
        debug!(words = ranked.len(), max_words, "vocabulary fitted");

        Vocabulary {
            max_words,
            words: ranked,
            word_index,
        }
    }

    /// Number of indexed words.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Index of `word`, or `None` when out of vocabulary.
    pub fn index_of(&self, word: &str) -> Option<usize> {
        self.word_index.get(word).copied()
    }

    /// Words paired with their index, in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.words.iter().enumerate().map(|(i, w)| (i + 1, w.as_str()))
    }

    /// Map a text to indices, dropping out-of-vocabulary words.
    pub fn encode(&self, text: &str) -> Vec<usize> {
        split_words(text)
            .iter()
            .filter_map(|w| self.index_of(w))
            .collect()
    }

    /// Encode and pad/truncate to exactly `len` ids.
    pub fn encode_padded(&self, text: &str, len: usize) -> Vec<i64> {
        pad_sequence(&self.encode(text), len)
    }
}
