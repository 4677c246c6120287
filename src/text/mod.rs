//! Tweet text normalization.
//!
//! - [`normalizer`] - Sentinel-token rewriting, stopword and mention removal
//! - [`stopwords`] - Fixed English stopword list with a negation whitelist

pub mod normalizer;
pub mod stopwords;

pub use normalizer::{clean_text, remove_mentions, remove_stopwords, tokenize};
