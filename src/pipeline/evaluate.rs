//! Closed-loop evaluation and results reporting.

use super::config::Config;
use super::context::{PipelineContext, SplitData};
use super::data::Dataset;
use super::save::ModelArtifacts;
use crate::error::{ForecastError, Result};
use crate::model::{select_device, CountScale, ForecastModel, LossKind, Network};
use std::fmt::Write as _;
use std::path::Path;
use tch::Tensor;
use tracing::info;

/// Ground truth and forecast of one test tweet.
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryReport {
    pub tweet_id: String,
    /// Unnormalized counts for hours `1..=hours`
    pub ground_truth: Vec<f64>,
    /// Decoded counts for the same hours
    pub predicted: Vec<i64>,
}

impl TrajectoryReport {
    /// Mean absolute error over every hour.
    pub fn mean_absolute_error(&self) -> f64 {
        if self.predicted.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .ground_truth
            .iter()
            .zip(&self.predicted)
            .map(|(&truth, &pred)| (truth - pred as f64).abs())
            .sum();
        total / self.predicted.len() as f64
    }
}

/// Run the encoder once per example of `split` and decode `hours` steps
/// from its own outputs, without teacher forcing.
pub fn evaluate_closed_loop(
    network: &Network<ForecastModel>,
    split: &SplitData,
    scale: &CountScale,
    hours: usize,
) -> Result<Vec<TrajectoryReport>> {
    let seq_len = split.tokens.first().map_or(0, Vec::len) as i64;
    let feature_count = split.features.ncols() as i64;
    let mut reports = Vec::with_capacity(split.len());

    for (i, tokens) in split.tokens.iter().enumerate() {
        let features: Vec<f32> = split.features.row(i).iter().map(|&v| v as f32).collect();
        let token_tensor = Tensor::from_slice(tokens)
            .view([1, seq_len])
            .to_device(network.device);
        let feature_tensor = Tensor::from_slice(&features)
            .view([1, feature_count])
            .to_device(network.device);

        let predicted = network
            .model
            .forecast(&token_tensor, &feature_tensor, hours, scale)?;
        let ground_truth = split
            .targets
            .row(i)
            .iter()
            .map(|&v| scale.unnormalize(v))
            .collect();

        reports.push(TrajectoryReport {
            tweet_id: split.tweet_ids[i].clone(),
            ground_truth,
            predicted,
        });
    }

    let mae = mean_error(&reports);
    info!(examples = reports.len(), mae, "closed-loop evaluation finished");
    Ok(reports)
}

fn mean_error(reports: &[TrajectoryReport]) -> f64 {
    if reports.is_empty() {
        return 0.0;
    }
    reports
        .iter()
        .map(TrajectoryReport::mean_absolute_error)
        .sum::<f64>()
        / reports.len() as f64
}

/// Render the reports as `test: i/n`, `ground truth:` and `predicted:` blocks.
pub fn render_reports(reports: &[TrajectoryReport]) -> String {
    let mut out = String::new();
    let total = reports.len();
    for (i, report) in reports.iter().enumerate() {
        let _ = writeln!(out, "test: {}/{} ({})", i + 1, total, report.tweet_id);
        let _ = writeln!(out, "ground truth: {:?}", report.ground_truth);
        let _ = writeln!(out, "predicted: {:?}", report.predicted);
    }
    let _ = writeln!(out, "mean absolute error: {:.4}", mean_error(reports));
    out
}

pub fn print_reports(reports: &[TrajectoryReport]) {
    println!("\n===================================================================");
    println!("  Closed-loop forecasts on the test split");
    println!("===================================================================\n");
    print!("{}", render_reports(reports));
}

pub fn write_results(path: &Path, reports: &[TrajectoryReport]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ForecastError::checkpoint(path, e))?;
    }
    std::fs::write(path, render_reports(reports)).map_err(|e| ForecastError::checkpoint(path, e))?;
    info!(path = %path.display(), "results written");
    Ok(())
}

/// Reload the end-to-end checkpoint, rebuild the test split from the
/// persisted seed and evaluate it.
pub fn evaluate_saved(config: &Config) -> Result<Vec<TrajectoryReport>> {
    let output = &config.output;
    let weights = output.path(&output.final_weights);
    let artifacts_path = output.artifacts_for(&output.final_weights);
    let artifacts = ModelArtifacts::load(&artifacts_path)?;
    artifacts.expect_loss(LossKind::PoissonLogLink, &artifacts_path)?;

    let dataset = Dataset::load(
        &config.data.accounts_csv,
        &config.data.retweets_csv,
        artifacts.hours,
    )?;
    let mut run_config = config.clone();
    run_config.features.hours = artifacts.hours;
    let ctx = PipelineContext::prepare(&run_config, &dataset, artifacts.seed)?;
    artifacts.check_fit(&ctx, &artifacts_path)?;

    let mut network = Network::forecast(artifacts.dims, select_device(config.model.use_cuda));
    network.load(&weights)?;

    let reports = evaluate_closed_loop(&network, &ctx.test, &artifacts.count_scale, artifacts.hours)?;
    print_reports(&reports);
    write_results(&output.path(&output.results), &reports)?;
    Ok(reports)
}
