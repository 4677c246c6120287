//! Command-line interface for the retweet forecaster.

use super::config::Config;
use super::evaluate::evaluate_saved;
use super::predict::predict_single;
use super::train::{train_end_to_end, train_warm_up};
use crate::error::Result;
use crate::features::AccountAttributes;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tweetcast",
    about = "Forecast the hourly retweet trajectory of a tweet"
)]
pub struct Cli {
    /// TOML configuration file; defaults are used when it does not exist
    #[arg(long, global = true, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train the encoder against the terminal-hour count
    WarmUp,
    /// Train the encoder-decoder with teacher forcing, then evaluate closed-loop
    Train {
        /// Warm-up checkpoint used to initialize the encoder
        #[arg(long)]
        init_from: Option<PathBuf>,

        /// Skip closed-loop evaluation on the test split
        #[arg(long)]
        skip_eval: bool,
    },
    /// Re-run closed-loop evaluation with the saved end-to-end model
    Evaluate,
    /// Forecast a single tweet
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    /// Tweet text
    #[arg(long)]
    pub text: String,

    #[arg(long, default_value_t = 0.0)]
    pub friends: f64,

    #[arg(long, default_value_t = 0.0)]
    pub followers: f64,

    /// Account age in days
    #[arg(long, default_value_t = 0.0)]
    pub age: f64,

    /// Total tweets posted by the account
    #[arg(long, default_value_t = 0.0)]
    pub tweets: f64,

    /// Tweets the account has favourited
    #[arg(long, default_value_t = 0.0)]
    pub favourites: f64,
}

impl PredictArgs {
    pub fn attributes(&self) -> AccountAttributes {
        AccountAttributes {
            friends_count: self.friends,
            followers_count: self.followers,
            account_age: self.age,
            total_tweet_count: self.tweets,
            favourited_tweet_count: self.favourites,
        }
    }
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::WarmUp => train_warm_up(&config),
        Command::Train {
            init_from,
            skip_eval,
        } => train_end_to_end(&config, init_from.as_deref(), skip_eval),
        Command::Evaluate => evaluate_saved(&config).map(|_| ()),
        Command::Predict(args) => predict_single(
            &config.output,
            config.model.use_cuda,
            &args.text,
            &args.attributes(),
        )
        .map(|_| ()),
    }
}
