//! # Tweetcast - Retweet Trajectory Forecasting
//!
//! Forecasts the cumulative retweet count of a tweet for each of the hours
//! after it is posted, from its text and the posting account's attributes.
//!
//! ## Model
//!
//! - **Text**: normalized tweet text, indexed by a frequency-ranked vocabulary
//!   and embedded with frozen GloVe vectors (domain vectors for keywords)
//! - **Account**: pairwise products of friends, followers, age, tweets and
//!   favourites, rescaled per column
//! - **Encoder**: LSTM over the embedded tokens, fused with the account
//!   features into the decoder's initial state
//! - **Decoder**: Elman RNN emitting one Poisson log-intensity per hour,
//!   fed its own rounded forecasts at inference
//!
//! ## Quick Start
//!
//! ```no_run
//! use tweetcast::features::AccountAttributes;
//! use tweetcast::pipeline::{Config, Forecaster};
//!
//! # fn main() -> tweetcast::Result<()> {
//! let config = Config::load_or_default("config.toml")?;
//! let forecaster = Forecaster::load(&config.output, false)?;
//!
//! let account = AccountAttributes {
//!     friends_count: 310.0,
//!     followers_count: 1200.0,
//!     account_age: 900.0,
//!     total_tweet_count: 5400.0,
//!     favourited_tweet_count: 870.0,
//! };
//! let trajectory = forecaster.forecast("Huge announcement coming tonight!", &account)?;
//! println!("after {} hours: {:?}", trajectory.len(), trajectory.last());
//! # Ok(())
//! # }
//! ```
//!
//! ## Requirements
//!
//! LibTorch is required through `tch`:
//!
//! ```bash
//! export LIBTORCH_USE_PYTORCH=1
//! export LIBTORCH_BYPASS_VERSION_CHECK=1
//! ```
//!
//! or build with `--features download-libtorch`.

pub mod embedding;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod text;
pub mod vocab;

pub use error::{ForecastError, Result};
pub use features::{AccountAttributes, CrossFeatureScaler};
pub use pipeline::{Config, Forecaster};
pub use vocab::Vocabulary;
