//! Training, evaluation and prediction pipeline.
//!
//! Two training regimes share one encoder:
//!
//! - **Warm-up**: the encoder plus a small head regresses the terminal-hour
//!   count with a Poisson loss on the raw output.
//! - **End-to-end**: the encoder state seeds an Elman decoder trained with
//!   teacher forcing on every hour and a Poisson loss on log-intensities.
//!   Evaluation then decodes each test tweet from its own rounded outputs.
//!
//! ## Usage
//!
//! ```bash
//! tweetcast warm-up
//! tweetcast train --init-from saved_models/encoder_model.ot
//! tweetcast evaluate
//! tweetcast predict --text "big news today" --followers 1200 --age 400
//! ```
//!
//! ## Configuration
//!
//! Every field is optional; a missing `config.toml` runs with the defaults.
//!
//! ```toml
//! [data]
//! accounts_csv = "data/user_info_with_age.csv"
//! retweets_csv = "data/retweet_count_new_unnormalized.csv"
//! glove_path = "data/glove.twitter.27B.100d.txt"
//! custom_embedding_path = "data/custom_WE.txt"
//! keywords_path = "data/keywords.txt"
//! test_fraction = 0.1
//! validation_fraction = 0.1
//! seed = 42
//! retweet_max_scope = "dataset"  # or "training"
//!
//! [features]
//! normalize_to = 10.0
//! retweets_norm_to = 10.0
//! hours = 72
//!
//! [end_to_end]
//! epochs = 2000
//! batch_size = 512
//! learning_rate = 0.01
//! clip_norm = 1.0
//! l2 = 0.05
//!
//! [output]
//! model_dir = "saved_models"
//! ```
//!
//! ## Module Structure
//!
//! - [`config`] - Configuration structures and loading
//! - [`data`] - Tweet and retweet CSV loading, seeded splits
//! - [`context`] - Per-run vocabulary, scalers and split tensors
//! - [`train`] - Mini-batch training for both regimes
//! - [`evaluate`] - Closed-loop evaluation and results file
//! - [`save`] - Weights plus JSON artifacts
//! - [`predict`] - Single tweet forecasting
//! - [`cli`] - Command-line interface

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod context;
pub mod data;
pub mod evaluate;
pub mod predict;
pub mod save;
pub mod train;

pub use config::Config;
pub use context::{PipelineContext, Regime, SplitData};
pub use data::{Dataset, TweetRecord};
pub use evaluate::{evaluate_closed_loop, evaluate_saved, TrajectoryReport};
pub use predict::{predict_single, Forecaster};
pub use save::ModelArtifacts;
pub use train::{fit, train_end_to_end, train_warm_up, LossHistory};
