//! Input tables and seeded splitting.

use crate::error::{ForecastError, Result};
use crate::features::{AccountAttributes, ATTRIBUTE_COUNT};
use csv::ReaderBuilder;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::info;

/// One row of the accounts table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TweetRecord {
    /// Tweet identifier, kept verbatim
    pub tweet_id: String,
    /// Raw tweet text
    pub text: String,
    pub friends_count: f64,
    pub followers_count: f64,
    pub account_age: f64,
    pub total_tweet_count: f64,
    pub favourited_tweet_count: f64,
}

impl TweetRecord {
    pub fn attributes(&self) -> AccountAttributes {
        AccountAttributes {
            friends_count: self.friends_count,
            followers_count: self.followers_count,
            account_age: self.account_age,
            total_tweet_count: self.total_tweet_count,
            favourited_tweet_count: self.favourited_tweet_count,
        }
    }
}

/// Account rows and their cumulative retweet counts, row-aligned.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<TweetRecord>,
    /// `(n, hours + 1)` raw counts for hours `0..=hours`
    pub retweets: Array2<f64>,
}

impl Dataset {
    /// Pair the two tables; they must have the same number of rows.
    pub fn new(records: Vec<TweetRecord>, retweets: Array2<f64>) -> Result<Self> {
        if records.len() != retweets.nrows() {
            return Err(ForecastError::shape_mismatch(
                "retweet rows vs account rows",
                records.len(),
                retweets.nrows(),
            ));
        }
        Ok(Dataset { records, retweets })
    }

    /// Read both CSV files.
    pub fn load(accounts: &Path, retweets: &Path, hours: usize) -> Result<Self> {
        let records = load_tweets(accounts)?;
        let counts = load_retweets(retweets, hours)?;
        info!(rows = records.len(), hours, "dataset loaded");
        Self::new(records, counts)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// `(n, 5)` raw account attributes.
    pub fn attribute_matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.len(), ATTRIBUTE_COUNT));
        for (mut row, record) in matrix.axis_iter_mut(Axis(0)).zip(&self.records) {
            for (cell, value) in row.iter_mut().zip(record.attributes().to_array()) {
                *cell = value;
            }
        }
        matrix
    }
}

/// Read the accounts table; columns beyond the known ones are ignored.
pub fn load_tweets(path: &Path) -> Result<Vec<TweetRecord>> {
    let file = std::fs::File::open(path).map_err(|e| ForecastError::data_load(path, e))?;
    read_tweets(file, path)
}

pub fn read_tweets<R: Read>(reader: R, path: &Path) -> Result<Vec<TweetRecord>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    rdr.deserialize()
        .enumerate()
        .map(|(i, row)| {
            row.map_err(|e| ForecastError::data_load(path, format!("row {}: {}", i + 1, e)))
        })
        .collect()
}

/// Read the hourly counts from the columns named `"0"` to `hours`.
pub fn load_retweets(path: &Path, hours: usize) -> Result<Array2<f64>> {
    let file = std::fs::File::open(path).map_err(|e| ForecastError::data_load(path, e))?;
    read_retweets(file, path, hours)
}

pub fn read_retweets<R: Read>(reader: R, path: &Path, hours: usize) -> Result<Array2<f64>> {
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = rdr
        .headers()
        .map_err(|e| ForecastError::data_load(path, e))?
        .clone();

    let columns = (0..=hours)
        .map(|hour| {
            let name = hour.to_string();
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| ForecastError::data_load(path, format!("missing column \"{name}\"")))
        })
        .collect::<Result<Vec<usize>>>()?;

    let mut values = Vec::new();
    let mut rows = 0;
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| ForecastError::data_load(path, e))?;
        for &col in &columns {
            let field = record.get(col).unwrap_or("").trim();
            let count = field.parse::<f64>().map_err(|e| {
                ForecastError::data_load(path, format!("row {} column {}: {}", i + 1, col, e))
            })?;
            values.push(count);
        }
        rows += 1;
    }

    Array2::from_shape_vec((rows, hours + 1), values)
        .map_err(|e| ForecastError::data_load(path, e))
}

/// Row indices of the three partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffle `indices` with `seed` and cut off the first `ceil(len * fraction)` as held out.
fn holdout(mut indices: Vec<usize>, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);
    let held = ((indices.len() as f64 * fraction).ceil() as usize).min(indices.len());
    let kept = indices.split_off(held);
    (kept, indices)
}

/// Split `0..n` into train, validation and test.
///
/// The test rows are held out first; validation is then carved out of the
/// remaining rows with the same seed. Every parallel array is indexed
/// through these vectors, so rows stay aligned across partitions.
pub fn split_indices(
    n: usize,
    test_fraction: f64,
    validation_fraction: f64,
    seed: u64,
) -> Result<SplitIndices> {
    let (rest, test) = holdout((0..n).collect(), test_fraction, seed);
    let (train, validation) = holdout(rest, validation_fraction, seed);
    if train.is_empty() || validation.is_empty() || test.is_empty() {
        return Err(ForecastError::shape_mismatch(
            "rows per partition (at least)",
            1,
            train.len().min(validation.len()).min(test.len()),
        ));
    }
    Ok(SplitIndices {
        train,
        validation,
        test,
    })
}

/// Rows of `array` at `indices`, in that order.
pub fn take_rows(array: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    array.select(Axis(0), indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::io::Cursor;

    const ACCOUNTS: &str = "\
tweet_id,text,friends_count,followers_count,account_age,total_tweet_count,favourited_tweet_count,lang
101,Launch day!,10,200,3,1500,40,en
102,so tired,55,20,7,300,2,en
";

    #[test]
    fn test_read_tweets_ignores_extra_columns() {
        let records = read_tweets(Cursor::new(ACCOUNTS), Path::new("a.csv")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tweet_id, "101");
        assert_eq!(records[1].text, "so tired");
        assert_eq!(records[1].attributes().followers_count, 20.0);
    }

    #[test]
    fn test_read_tweets_reports_bad_row() {
        let bad = "tweet_id,text,friends_count,followers_count,account_age,total_tweet_count,favourited_tweet_count\n1,x,a,2,3,4,5\n";
        assert!(matches!(
            read_tweets(Cursor::new(bad), Path::new("a.csv")),
            Err(ForecastError::DataLoad { .. })
        ));
    }

    #[test]
    fn test_read_retweets_by_header_name() {
        let csv = "id,2,0,1,extra\n7,5,0,1,x\n8,9,2,4,y\n";
        let counts = read_retweets(Cursor::new(csv), Path::new("r.csv"), 2).unwrap();
        assert_eq!(counts, ndarray::array![[0.0, 1.0, 5.0], [2.0, 4.0, 9.0]]);
    }

    #[test]
    fn test_read_retweets_missing_hour() {
        let csv = "0,1\n0,1\n";
        assert!(matches!(
            read_retweets(Cursor::new(csv), Path::new("r.csv"), 2),
            Err(ForecastError::DataLoad { .. })
        ));
    }

    #[test]
    fn test_dataset_rejects_misaligned_tables() {
        let records = read_tweets(Cursor::new(ACCOUNTS), Path::new("a.csv")).unwrap();
        assert!(matches!(
            Dataset::new(records, Array2::zeros((3, 4))),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_split_sizes_and_disjointness() {
        let split = split_indices(20, 0.1, 0.1, 42).unwrap();
        assert_eq!(split.test.len(), 2);
        assert_eq!(split.validation.len(), 2);
        assert_eq!(split.train.len(), 16);

        let all: HashSet<usize> = split
            .train
            .iter()
            .chain(&split.validation)
            .chain(&split.test)
            .copied()
            .collect();
        assert_eq!(all.len(), 20);
    }

    #[test]
    fn test_split_is_reproducible() {
        let a = split_indices(50, 0.1, 0.1, 7).unwrap();
        let b = split_indices(50, 0.1, 0.1, 7).unwrap();
        assert_eq!(a, b);
        let c = split_indices(50, 0.1, 0.1, 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_too_small() {
        assert!(split_indices(1, 0.1, 0.1, 0).is_err());
    }

    #[test]
    fn test_take_rows_keeps_order() {
        let array = ndarray::array![[0.0], [1.0], [2.0]];
        assert_eq!(take_rows(&array, &[2, 0]), ndarray::array![[2.0], [0.0]]);
    }
}
