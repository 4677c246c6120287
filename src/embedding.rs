//! Pretrained word embeddings and the frozen embedding matrix.
//!
//! Tables use the GloVe text format: one `word v1 v2 … vD` entry per line.
//! A general-purpose table is loaded first; a domain-specific table then
//! overrides it, but only for words on a curated keyword list.

use crate::error::{ForecastError, Result};
use crate::text::tokenize;
use crate::vocab::Vocabulary;
use ndarray::Array2;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// In-memory word → vector table.
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTable {
    pub dim: usize,
    vectors: HashMap<String, Vec<f32>>,
}

impl EmbeddingTable {
    pub fn new(dim: usize) -> Self {
        EmbeddingTable {
            dim,
            vectors: HashMap::new(),
        }
    }

    /// Load only the entries whose word passes `keep`.
    pub fn load_filtered(
        path: impl AsRef<Path>,
        dim: usize,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ForecastError::data_load(path, e))?;
        let table = Self::parse(BufReader::new(file), dim, path, keep)?;
        info!(path = %path.display(), words = table.len(), "embedding table loaded");
        Ok(table)
    }

    /// Parse GloVe-format lines; `path` is only used in error messages.
    pub fn parse<R: BufRead>(
        reader: R,
        dim: usize,
        path: &Path,
        keep: impl Fn(&str) -> bool,
    ) -> Result<Self> {
        let mut table = EmbeddingTable::new(dim);

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| ForecastError::data_load(path, e))?;
            let mut parts = line.split_whitespace();
            let Some(word) = parts.next() else {
                continue;
            };
            if !keep(word) {
                continue;
            }

            let vector = parts
                .map(str::parse::<f32>)
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(|e| {
                    ForecastError::data_load(path, format!("line {}: {}", line_no + 1, e))
                })?;
            if vector.len() != dim {
                return Err(ForecastError::data_load(
                    path,
                    format!(
                        "line {}: expected {} values for `{}`, found {}",
                        line_no + 1,
                        dim,
                        word,
                        vector.len()
                    ),
                ));
            }
            table.vectors.insert(word.to_string(), vector);
        }

        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn get(&self, word: &str) -> Option<&[f32]> {
        self.vectors.get(word).map(Vec::as_slice)
    }

    /// Overwrite entries with `domain` vectors for keywords only; returns how many were written.
    pub fn overlay_keywords(
        &mut self,
        domain: &EmbeddingTable,
        keywords: &HashSet<String>,
    ) -> Result<usize> {
        if domain.dim != self.dim {
            return Err(ForecastError::shape_mismatch(
                "domain embedding dimension",
                self.dim,
                domain.dim,
            ));
        }

        let mut written = 0;
        for (word, vector) in &domain.vectors {
            if keywords.contains(word) {
                debug!(word = %word, "domain embedding override");
                self.vectors.insert(word.clone(), vector.clone());
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Read the keyword allowlist: text before the first double space, normalized by [`tokenize`].
pub fn load_keywords(path: impl AsRef<Path>) -> Result<HashSet<String>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| ForecastError::data_load(path, e))?;
    let mut keywords = HashSet::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| ForecastError::data_load(path, e))?;
        if let Some(keyword) = parse_keyword(&line) {
            keywords.insert(keyword);
        }
    }
    Ok(keywords)
}

fn parse_keyword(line: &str) -> Option<String> {
    let raw = line.split("  ").next()?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(tokenize(raw))
}

/// Build the `(max_words, dim)` matrix for the fitted vocabulary.
///
/// Row `i` holds the vector of the word with index `i`; rows of words the
/// table does not know (and row 0) stay all-zero.
pub fn build_embedding_matrix(vocab: &Vocabulary, table: &EmbeddingTable) -> Array2<f32> {
    let mut matrix = Array2::zeros((vocab.max_words, table.dim));
    let mut found = 0;
    for (index, word) in vocab.iter() {
        if let Some(vector) = table.get(word) {
            for (cell, &value) in matrix.row_mut(index).iter_mut().zip(vector) {
                *cell = value;
            }
            found += 1;
        }
    }
    info!(found, vocabulary = vocab.len(), "embedding matrix built");
    matrix
}
