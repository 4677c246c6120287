//! Everything fitted once per run, shared by every stage.
//!
//! [`PipelineContext::prepare`] cleans the texts, splits the rows, fits the
//! cross-feature scaler, the retweet scale and the vocabulary on the training
//! partition and encodes every partition with them. After that the context
//! is read-only.

use super::config::{Config, RetweetMaxScope};
use super::data::{split_indices, take_rows, Dataset, SplitIndices};
use crate::embedding::{build_embedding_matrix, load_keywords, EmbeddingTable};
use crate::error::{ForecastError, Result};
use crate::features::CrossFeatureScaler;
use crate::model::{CountScale, ModelDims, TensorSet};
use crate::text::clean_text;
use crate::vocab::{max_token_count, Vocabulary};
use ndarray::{s, Array2};
use rand::Rng;
use tracing::info;

/// Which head the tensors are built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Regime {
    /// Terminal-hour target only
    WarmUp,
    /// Teacher-forcing inputs and the full trajectory
    EndToEnd,
}

/// One partition, encoded and scaled.
#[derive(Debug, Clone)]
pub struct SplitData {
    pub tweet_ids: Vec<String>,
    /// Padded token ids, one row per tweet
    pub tokens: Vec<Vec<i64>>,
    /// Scaled cross-features
    pub features: Array2<f64>,
    /// Normalized counts for hours `0..hours`
    pub history: Array2<f64>,
    /// Normalized counts for hours `1..=hours`
    pub targets: Array2<f64>,
}

impl SplitData {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tensors for `regime`, left on the CPU.
    pub fn tensors(&self, regime: Regime) -> Result<TensorSet> {
        match regime {
            Regime::WarmUp => {
                let last = self.targets.ncols().saturating_sub(1);
                let terminal = self.targets.slice(s![.., last..]).to_owned();
                TensorSet::new(&self.tokens, &self.features, None, &terminal)
            }
            Regime::EndToEnd => TensorSet::new(
                &self.tokens,
                &self.features,
                Some(&self.history),
                &self.targets,
            ),
        }
    }

    fn check_alignment(&self, name: &str) -> Result<()> {
        let n = self.len();
        for (what, rows) in [
            ("tweet ids", self.tweet_ids.len()),
            ("features", self.features.nrows()),
            ("history", self.history.nrows()),
            ("targets", self.targets.nrows()),
        ] {
            if rows != n {
                return Err(ForecastError::shape_mismatch(
                    format!("{name} {what}"),
                    n,
                    rows,
                ));
            }
        }
        Ok(())
    }
}

/// Fitted state of one run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub seed: u64,
    pub splits: SplitIndices,
    pub seq_len: usize,
    pub vocab: Vocabulary,
    pub scaler: CrossFeatureScaler,
    pub count_scale: CountScale,
    pub train: SplitData,
    pub validation: SplitData,
    pub test: SplitData,
}

/// The configured seed, or one drawn from `0..=100`.
pub fn resolve_seed(configured: Option<u64>) -> u64 {
    match configured {
        Some(seed) => seed,
        None => {
            let seed = rand::thread_rng().gen_range(0..=100);
            info!(seed, "drew split seed");
            seed
        }
    }
}

impl PipelineContext {
    /// Fit everything on `dataset` with a fixed `seed`.
    pub fn prepare(config: &Config, dataset: &Dataset, seed: u64) -> Result<Self> {
        let hours = config.features.hours;
        if dataset.retweets.ncols() != hours + 1 {
            return Err(ForecastError::shape_mismatch(
                "retweet columns",
                hours + 1,
                dataset.retweets.ncols(),
            ));
        }

        let texts: Vec<String> = dataset.records.iter().map(|r| clean_text(&r.text)).collect();
        let splits = split_indices(
            dataset.len(),
            config.data.test_fraction,
            config.data.validation_fraction,
            seed,
        )?;
        info!(
            seed,
            train = splits.train.len(),
            validation = splits.validation.len(),
            test = splits.test.len(),
            "rows split"
        );

        let attributes = dataset.attribute_matrix();
        let scaler = CrossFeatureScaler::fit(
            take_rows(&attributes, &splits.train).view(),
            config.features.normalize_to,
        )?;

        let terminal = dataset.retweets.column(hours);
        let max_count = match config.data.retweet_max_scope {
            RetweetMaxScope::Dataset => column_max(terminal.iter().copied()),
            RetweetMaxScope::Training => column_max(splits.train.iter().map(|&i| terminal[i])),
        };
        let count_scale = CountScale::new(max_count, config.features.retweets_norm_to);
        info!(max_count, scope = ?config.data.retweet_max_scope, "retweet scale fitted");

        let train_texts: Vec<&str> = splits.train.iter().map(|&i| texts[i].as_str()).collect();
        let vocab = Vocabulary::fit(&train_texts, config.vocab.max_words);
        let seq_len = max_token_count(&train_texts);
        info!(words = vocab.len(), seq_len, "vocabulary fitted");

        let normalized = dataset.retweets.mapv(|c| count_scale.normalize(c));
        let build = |indices: &[usize], name: &str| -> Result<SplitData> {
            let rows = take_rows(&normalized, indices);
            let split = SplitData {
                tweet_ids: indices
                    .iter()
                    .map(|&i| dataset.records[i].tweet_id.clone())
                    .collect(),
                tokens: indices
                    .iter()
                    .map(|&i| vocab.encode_padded(&texts[i], seq_len))
                    .collect(),
                features: scaler.transform(take_rows(&attributes, indices).view())?,
                history: rows.slice(s![.., ..hours]).to_owned(),
                targets: rows.slice(s![.., 1..]).to_owned(),
            };
            split.check_alignment(name)?;
            Ok(split)
        };

        let train = build(&splits.train, "train")?;
        let validation = build(&splits.validation, "validation")?;
        let test = build(&splits.test, "test")?;

        Ok(PipelineContext {
            seed,
            splits,
            seq_len,
            vocab,
            scaler,
            count_scale,
            train,
            validation,
            test,
        })
    }

    /// Layer sizes implied by the fitted state and `config.model`.
    pub fn dims(&self, config: &Config) -> ModelDims {
        ModelDims {
            vocab_size: self.vocab.max_words as i64,
            embedding_dim: config.model.embedding_dim as i64,
            feature_count: self.scaler.feature_count() as i64,
            lstm_units: config.model.lstm_units as i64,
            hidden_units: config.model.hidden_units as i64,
            dropout: config.model.dropout,
        }
    }

    /// Load the general table for vocabulary words, overlay the domain
    /// vectors for keywords and build the frozen embedding matrix.
    pub fn embedding_matrix(&self, config: &Config) -> Result<Array2<f32>> {
        let dim = config.model.embedding_dim;
        let in_vocab = |w: &str| self.vocab.index_of(w).is_some();

        let mut table = EmbeddingTable::load_filtered(&config.data.glove_path, dim, in_vocab)?;
        let keywords = load_keywords(&config.data.keywords_path)?;
        let domain =
            EmbeddingTable::load_filtered(&config.data.custom_embedding_path, dim, |w| {
                in_vocab(w) && keywords.contains(w)
            })?;
        let overridden = table.overlay_keywords(&domain, &keywords)?;
        info!(keywords = keywords.len(), overridden, "domain embeddings applied");

        Ok(build_embedding_matrix(&self.vocab, &table))
    }
}

fn column_max(values: impl Iterator<Item = f64>) -> f64 {
    values.fold(0.0, f64::max)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::data::TweetRecord;
    use std::path::Path;
    use tempfile::tempdir;

    const WORDS: [&str; 6] = ["rocket", "launch", "moon", "crowd", "news", "storm"];

    /// Twenty tweets whose retweet trajectories grow with the follower count.
    pub(crate) fn synthetic_dataset(hours: usize) -> Dataset {
        let records: Vec<TweetRecord> = (0..20)
            .map(|i| TweetRecord {
                tweet_id: format!("t{i}"),
                text: format!(
                    "{} {} #Big{} http://x.co/{i} WOW!!",
                    WORDS[i % 6],
                    WORDS[(i * 5 + 1) % 6],
                    WORDS[(i + 2) % 6]
                ),
                friends_count: (i % 7 + 1) as f64,
                followers_count: (10 * i + 5) as f64,
                account_age: (i % 3 + 1) as f64,
                total_tweet_count: (100 + i) as f64,
                favourited_tweet_count: (i % 4) as f64,
            })
            .collect();
        let retweets = Array2::from_shape_fn((20, hours + 1), |(r, h)| (r * h / 4) as f64);
        Dataset::new(records, retweets).unwrap()
    }

    pub(crate) fn small_config(hours: usize) -> Config {
        let mut config = Config::default();
        config.features.hours = hours;
        config.vocab.max_words = 50;
        config.data.seed = Some(17);
        config
    }

    /// Write the synthetic tweets, both embedding tables and the keyword list
    /// under `dir`, and return a small CPU config reading them.
    ///
    /// GloVe gives the k-th word of `WORDS` the vector `0.k` (1-based). The
    /// domain table has `rocket`, `storm` and `zebra`; only `rocket` and
    /// `zebra` are keywords.
    pub(crate) fn write_fixture(dir: &Path, hours: usize) -> Config {
        let dataset = synthetic_dataset(hours);

        let accounts = dir.join("accounts.csv");
        let mut writer = csv::Writer::from_path(&accounts).unwrap();
        writer
            .write_record([
                "tweet_id",
                "text",
                "friends_count",
                "followers_count",
                "account_age",
                "total_tweet_count",
                "favourited_tweet_count",
            ])
            .unwrap();
        for r in &dataset.records {
            writer
                .write_record([
                    r.tweet_id.clone(),
                    r.text.clone(),
                    r.friends_count.to_string(),
                    r.followers_count.to_string(),
                    r.account_age.to_string(),
                    r.total_tweet_count.to_string(),
                    r.favourited_tweet_count.to_string(),
                ])
                .unwrap();
        }
        writer.flush().unwrap();

        let retweets = dir.join("retweets.csv");
        let mut writer = csv::Writer::from_path(&retweets).unwrap();
        writer.write_record((0..=hours).map(|h| h.to_string())).unwrap();
        for row in dataset.retweets.rows() {
            writer.write_record(row.iter().map(|v| v.to_string())).unwrap();
        }
        writer.flush().unwrap();

        let glove = dir.join("glove.txt");
        let lines: String = WORDS
            .iter()
            .enumerate()
            .map(|(k, w)| format!("{w} 0.{v} 0.{v} 0.{v}\n", v = k + 1))
            .collect();
        std::fs::write(&glove, lines).unwrap();

        let custom = dir.join("custom.txt");
        std::fs::write(&custom, "rocket 9 9 9\nstorm 8 8 8\nzebra 7 7 7\n").unwrap();
        let keywords = dir.join("keywords.txt");
        std::fs::write(&keywords, "rocket  0.9\nzebra\n").unwrap();

        let mut config = small_config(hours);
        config.data.accounts_csv = accounts;
        config.data.retweets_csv = retweets;
        config.data.glove_path = glove;
        config.data.custom_embedding_path = custom;
        config.data.keywords_path = keywords;
        config.model.embedding_dim = 3;
        config.model.lstm_units = 4;
        config.model.hidden_units = 4;
        config.model.use_cuda = false;
        for regime in [&mut config.warm_up, &mut config.end_to_end] {
            regime.epochs = 1;
            regime.batch_size = 8;
        }
        config.output.model_dir = dir.join("models");
        config
    }

    #[test]
    fn test_embedding_matrix_from_files() {
        let dir = tempdir().unwrap();
        let config = write_fixture(dir.path(), 4);
        let dataset =
            Dataset::load(&config.data.accounts_csv, &config.data.retweets_csv, 4).unwrap();
        let ctx = PipelineContext::prepare(&config, &dataset, 17).unwrap();
        let matrix = ctx.embedding_matrix(&config).unwrap();

        assert_eq!(matrix.dim(), (50, 3));
        assert!(matrix.row(0).iter().all(|&v| v == 0.0));

        // keyword in the vocabulary: domain vector wins over GloVe
        let rocket = ctx.vocab.index_of("rocket").unwrap();
        assert_eq!(matrix.row(rocket).to_vec(), vec![9.0; 3]);
        // domain vector but not a keyword
        let storm = ctx.vocab.index_of("storm").unwrap();
        assert_eq!(matrix.row(storm).to_vec(), vec![0.6; 3]);
        let moon = ctx.vocab.index_of("moon").unwrap();
        assert_eq!(matrix.row(moon).to_vec(), vec![0.3; 3]);
        // keyword outside the vocabulary gets no row
        assert_eq!(ctx.vocab.index_of("zebra"), None);
        assert!(matrix.iter().all(|&v| v != 7.0));
    }

    #[test]
    fn test_splits_stay_aligned() {
        let dataset = synthetic_dataset(6);
        let config = small_config(6);
        let ctx = PipelineContext::prepare(&config, &dataset, 17).unwrap();

        for (indices, split) in [
            (&ctx.splits.train, &ctx.train),
            (&ctx.splits.validation, &ctx.validation),
            (&ctx.splits.test, &ctx.test),
        ] {
            for (row, &source) in indices.iter().enumerate() {
                assert_eq!(split.tweet_ids[row], format!("t{source}"));
                let expected = ctx.count_scale.normalize(dataset.retweets[[source, 6]]);
                assert!((split.targets[[row, 5]] - expected).abs() < 1e-12);
                let hour0 = ctx.count_scale.normalize(dataset.retweets[[source, 0]]);
                assert!((split.history[[row, 0]] - hour0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_prepare_is_deterministic() {
        let dataset = synthetic_dataset(4);
        let config = small_config(4);
        let a = PipelineContext::prepare(&config, &dataset, 3).unwrap();
        let b = PipelineContext::prepare(&config, &dataset, 3).unwrap();
        assert_eq!(a.splits, b.splits);
        assert_eq!(a.train.tokens, b.train.tokens);
        assert_eq!(a.vocab, b.vocab);
    }

    #[test]
    fn test_retweet_max_scope() {
        let dataset = synthetic_dataset(4);
        let mut config = small_config(4);

        let global = PipelineContext::prepare(&config, &dataset, 5).unwrap();
        assert_eq!(global.count_scale.max_count, 19.0);

        config.data.retweet_max_scope = RetweetMaxScope::Training;
        let training = PipelineContext::prepare(&config, &dataset, 5).unwrap();
        let expected = global
            .splits
            .train
            .iter()
            .map(|&i| dataset.retweets[[i, 4]])
            .fold(0.0, f64::max);
        assert_eq!(training.count_scale.max_count, expected);
    }

    #[test]
    fn test_vocabulary_fitted_on_training_rows_only() {
        let mut dataset = synthetic_dataset(4);
        let config = small_config(4);
        let probe = PipelineContext::prepare(&config, &dataset, 9).unwrap();
        let test_row = probe.splits.test[0];
        dataset.records[test_row].text = "zeppelin".to_string();

        let ctx = PipelineContext::prepare(&config, &dataset, 9).unwrap();
        assert_eq!(ctx.vocab.index_of("zeppelin"), None);
        assert!(ctx.test.tokens.iter().all(|row| row.len() == ctx.seq_len));
    }

    #[test]
    fn test_regime_tensor_shapes() {
        let dataset = synthetic_dataset(6);
        let ctx = PipelineContext::prepare(&small_config(6), &dataset, 1).unwrap();

        let warm = ctx.train.tensors(Regime::WarmUp).unwrap();
        assert_eq!(warm.targets.size(), vec![ctx.train.len() as i64, 1]);
        assert!(warm.decoder_inputs.is_none());

        let full = ctx.train.tensors(Regime::EndToEnd).unwrap();
        assert_eq!(full.targets.size(), vec![ctx.train.len() as i64, 6]);
        assert_eq!(
            full.decoder_inputs.map(|t| t.size()),
            Some(vec![ctx.train.len() as i64, 6])
        );
    }

    #[test]
    fn test_wrong_hour_count() {
        let dataset = synthetic_dataset(4);
        assert!(matches!(
            PipelineContext::prepare(&small_config(6), &dataset, 1),
            Err(ForecastError::ShapeMismatch { .. })
        ));
    }
}
