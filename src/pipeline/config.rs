//! Configuration structures for the forecasting pipeline.
//!
//! This module provides strongly-typed configuration loaded from TOML. The
//! configuration covers input paths and splitting, feature scaling, the
//! vocabulary cap, model sizes, both training regimes and output paths.
//! Every section falls back to its defaults, so a partial file is enough.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Main configuration structure loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input files and splitting
    pub data: DataConfig,
    /// Cross-feature and retweet scaling
    pub features: FeaturesConfig,
    /// Vocabulary cap
    pub vocab: VocabConfig,
    /// Model architecture
    pub model: ModelConfig,
    /// Encoder warm-up regime
    #[serde(default = "RegimeConfig::warm_up", deserialize_with = "warm_up_section")]
    pub warm_up: RegimeConfig,
    /// Encoder-decoder regime
    #[serde(default = "RegimeConfig::end_to_end", deserialize_with = "end_to_end_section")]
    pub end_to_end: RegimeConfig,
    /// Output paths
    pub output: OutputConfig,
}

/// Which rows the global retweet maximum is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetweetMaxScope {
    /// Every row, before splitting
    Dataset,
    /// Training rows only
    Training,
}

/// Data loading and splitting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// CSV with tweet text and account attributes
    pub accounts_csv: PathBuf,
    /// CSV with cumulative retweet counts for hours 0..=72
    pub retweets_csv: PathBuf,
    /// General-purpose GloVe table
    pub glove_path: PathBuf,
    /// Domain-specific embedding table
    pub custom_embedding_path: PathBuf,
    /// Keywords allowed to take the domain-specific vector
    pub keywords_path: PathBuf,
    /// Share of all rows held out for testing
    pub test_fraction: f64,
    /// Share of the remaining rows held out for validation
    pub validation_fraction: f64,
    /// Split seed; drawn from 0..=100 when absent
    pub seed: Option<u64>,
    /// Rows the retweet maximum is taken over
    pub retweet_max_scope: RetweetMaxScope,
}

/// Feature scaling configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Ceiling of the scaled cross-features
    pub normalize_to: f64,
    /// Ceiling of the normalized retweet counts
    pub retweets_norm_to: f64,
    /// Length of the forecast window
    pub hours: usize,
}

/// Vocabulary configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabConfig {
    /// Rows of the embedding matrix; index 0 is padding
    pub max_words: usize,
}

/// Model architecture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of both embedding tables
    pub embedding_dim: usize,
    /// LSTM summary width
    pub lstm_units: usize,
    /// Encoder projection and decoder state width
    pub hidden_units: usize,
    /// Dropout on the embedded tokens
    pub dropout: f64,
    /// Use CUDA when available
    pub use_cuda: bool,
}

/// Hyperparameters of one training regime.
///
/// A `[warm_up]` or `[end_to_end]` section only lists what it changes; every
/// other field keeps that regime's own default.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegimeConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Learning rate for the Adam optimizer
    pub learning_rate: f64,
    /// Gradient norm ceiling, no clipping when absent
    pub clip_norm: Option<f64>,
    /// L2 coefficient on the regularized kernels
    pub l2: f64,
}

/// Fields present in a regime section.
#[derive(Deserialize)]
struct RegimeSection {
    epochs: Option<usize>,
    batch_size: Option<usize>,
    learning_rate: Option<f64>,
    clip_norm: Option<f64>,
    l2: Option<f64>,
}

impl RegimeSection {
    fn over(self, base: RegimeConfig) -> RegimeConfig {
        RegimeConfig {
            epochs: self.epochs.unwrap_or(base.epochs),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            clip_norm: self.clip_norm.or(base.clip_norm),
            l2: self.l2.unwrap_or(base.l2),
        }
    }
}

fn warm_up_section<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<RegimeConfig, D::Error> {
    Ok(RegimeSection::deserialize(deserializer)?.over(RegimeConfig::warm_up()))
}

fn end_to_end_section<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<RegimeConfig, D::Error> {
    Ok(RegimeSection::deserialize(deserializer)?.over(RegimeConfig::end_to_end()))
}

/// Output paths configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory holding every output file
    pub model_dir: PathBuf,
    /// Warm-up weights filename
    pub warm_up_weights: String,
    /// End-to-end weights filename
    pub final_weights: String,
    /// Artifacts sidecar filename
    pub artifacts: String,
    /// Warm-up loss log filename
    pub warm_up_loss_log: String,
    /// End-to-end loss log filename
    pub loss_log: String,
    /// Closed-loop evaluation report filename
    pub results: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            accounts_csv: PathBuf::from("data/user_info_with_age.csv"),
            retweets_csv: PathBuf::from("data/retweet_count_new_unnormalized.csv"),
            glove_path: PathBuf::from("data/glove.twitter.27B.100d.txt"),
            custom_embedding_path: PathBuf::from("data/custom_WE.txt"),
            keywords_path: PathBuf::from("data/keywords.txt"),
            test_fraction: 0.1,
            validation_fraction: 0.1,
            seed: None,
            retweet_max_scope: RetweetMaxScope::Dataset,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        FeaturesConfig {
            normalize_to: 10.0,
            retweets_norm_to: 10.0,
            hours: 72,
        }
    }
}

impl Default for VocabConfig {
    fn default() -> Self {
        VocabConfig { max_words: 10000 }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            embedding_dim: 100,
            lstm_units: 256,
            hidden_units: 128,
            dropout: 0.3,
            use_cuda: true,
        }
    }
}

impl RegimeConfig {
    /// Encoder plus terminal-hour head: no clipping, no L2.
    pub fn warm_up() -> Self {
        RegimeConfig {
            epochs: 2000,
            batch_size: 64,
            learning_rate: 0.001,
            clip_norm: None,
            l2: 0.0,
        }
    }

    /// Encoder plus decoder.
    pub fn end_to_end() -> Self {
        RegimeConfig {
            epochs: 2000,
            batch_size: 512,
            learning_rate: 0.01,
            clip_norm: Some(1.0),
            l2: 0.05,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data: DataConfig::default(),
            features: FeaturesConfig::default(),
            vocab: VocabConfig::default(),
            model: ModelConfig::default(),
            warm_up: RegimeConfig::warm_up(),
            end_to_end: RegimeConfig::end_to_end(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            model_dir: PathBuf::from("saved_models"),
            warm_up_weights: "encoder_model.ot".to_string(),
            final_weights: "final_model.ot".to_string(),
            artifacts: "artifacts.json".to_string(),
            warm_up_loss_log: "loss_log_mse.txt".to_string(),
            loss_log: "loss_log_total.txt".to_string(),
            results: "results.txt".to_string(),
        }
    }
}

impl OutputConfig {
    /// `file` inside the model directory.
    pub fn path(&self, file: &str) -> PathBuf {
        self.model_dir.join(file)
    }

    /// Artifacts sidecar of the weights file `weights` in the model directory.
    pub fn artifacts_for(&self, weights: &str) -> PathBuf {
        self.sidecar_for(&self.path(weights))
    }

    /// Artifacts sidecar stored next to the weights at `weights`, wherever they live.
    pub fn sidecar_for(&self, weights: &Path) -> PathBuf {
        let stem = weights
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = format!("{}_{}", stem, self.artifacts);
        match weights.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// Returns `Ok(Config)` if the file can be read, parsed and validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ForecastError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to the defaults when the file does not exist.
    ///
    /// A file that exists but does not parse is still an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            warn!(
                path = %path.display(),
                "config file not found, using default configuration"
            );
            Ok(Config::default())
        }
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        let fraction_ok = |f: f64| f > 0.0 && f < 1.0;
        if !fraction_ok(self.data.test_fraction) {
            return Err(ForecastError::Config(format!(
                "data.test_fraction must be in (0, 1), got {}",
                self.data.test_fraction
            )));
        }
        if !fraction_ok(self.data.validation_fraction) {
            return Err(ForecastError::Config(format!(
                "data.validation_fraction must be in (0, 1), got {}",
                self.data.validation_fraction
            )));
        }
        if self.features.hours == 0 {
            return Err(ForecastError::Config("features.hours must be positive".into()));
        }
        if self.features.normalize_to <= 0.0 || self.features.retweets_norm_to <= 0.0 {
            return Err(ForecastError::Config(
                "normalization ceilings must be positive".into(),
            ));
        }
        if self.vocab.max_words < 2 {
            return Err(ForecastError::Config(
                "vocab.max_words must leave room for padding and one word".into(),
            ));
        }
        for (name, regime) in [("warm_up", &self.warm_up), ("end_to_end", &self.end_to_end)] {
            if regime.batch_size == 0 {
                return Err(ForecastError::Config(format!(
                    "{name}.batch_size must be positive"
                )));
            }
        }
        Ok(())
    }
}
