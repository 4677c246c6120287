//! Training pipeline for both regimes.

use super::config::{Config, RegimeConfig};
use super::context::{resolve_seed, PipelineContext, Regime};
use super::data::Dataset;
use super::evaluate::{evaluate_closed_loop, print_reports, write_results};
use super::save::{save_model, ModelArtifacts};
use crate::error::{ForecastError, Result};
use crate::model::{select_device, LossKind, Network, TensorSet, TrainableModel};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tch::nn::{self, OptimizerConfig};
use tch::{Kind, Tensor};
use tracing::{debug, info, warn};

/// Per-epoch training and validation loss.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossHistory {
    pub loss: Vec<f64>,
    pub val_loss: Vec<f64>,
}

impl LossHistory {
    /// `loss:[..]` and `val_loss:[..]`, one metric per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, values) in [("loss", &self.loss), ("val_loss", &self.val_loss)] {
            let _ = writeln!(out, "{}:{:?}", name, values);
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForecastError::checkpoint(path, e))?;
        }
        std::fs::write(path, self.render()).map_err(|e| ForecastError::checkpoint(path, e))?;
        info!(path = %path.display(), "loss log written");
        Ok(())
    }
}

/// Train `network` for `regime.epochs` shuffled passes over `train`,
/// evaluating `validation` after every epoch.
///
/// # Arguments
///
/// * `network` - Network to update in place
/// * `train` - Training tensors
/// * `validation` - Held-out tensors, never used for updates
/// * `regime` - Epochs, batch size, learning rate, clipping and L2
pub fn fit<M: TrainableModel>(
    network: &mut Network<M>,
    train: &TensorSet,
    validation: &TensorSet,
    regime: &RegimeConfig,
) -> Result<LossHistory> {
    let device = network.device;
    let train = train.to_device(device);
    let validation = validation.to_device(device);
    let n = train.len();
    let batch_size = regime.batch_size as i64;

    let mut opt = nn::Adam::default().build(&network.vs, regime.learning_rate)?;
    let mut history = LossHistory::default();

    info!(
        samples = n,
        validation = validation.len(),
        epochs = regime.epochs,
        batch_size,
        learning_rate = regime.learning_rate,
        "training started"
    );

    for epoch in 0..regime.epochs {
        let mut total_loss = 0.0;
        let indices = Tensor::randperm(n, (Kind::Int64, device));

        for start in (0..n).step_by(batch_size as usize) {
            let len = batch_size.min(n - start);
            let batch = train.select(&indices.narrow(0, start, len));
            let loss = network.loss(&batch, true, regime.l2)?;

            match regime.clip_norm {
                Some(max_norm) => opt.backward_step_clip_norm(&loss, max_norm),
                None => opt.backward_step(&loss),
            }

            total_loss += loss.f_double_value(&[])? * len as f64;
        }

        let epoch_loss = total_loss / n as f64;
        let val_loss = network.evaluate_loss(&validation, regime.l2)?;
        history.loss.push(epoch_loss);
        history.val_loss.push(val_loss);

        info!(
            epoch = epoch + 1,
            epochs = regime.epochs,
            loss = epoch_loss,
            val_loss,
            "epoch finished"
        );
    }

    Ok(history)
}

/// Load the data and fit the per-run state with `seed`.
fn prepare(config: &Config, seed: u64) -> Result<PipelineContext> {
    let start = Instant::now();
    let dataset = Dataset::load(
        &config.data.accounts_csv,
        &config.data.retweets_csv,
        config.features.hours,
    )?;
    let ctx = PipelineContext::prepare(config, &dataset, seed)?;
    debug!(elapsed = start.elapsed().as_secs_f64(), "pipeline prepared");
    Ok(ctx)
}

/// Sidecar of the warm-up checkpoint at `weights`; it must come from the warm-up regime.
fn warm_up_artifacts(config: &Config, weights: &Path) -> Result<(PathBuf, ModelArtifacts)> {
    let sidecar = config.output.sidecar_for(weights);
    let artifacts = ModelArtifacts::load(&sidecar)?;
    artifacts.expect_loss(LossKind::PoissonDirect, &sidecar)?;
    Ok((sidecar, artifacts))
}

/// Train the encoder with the terminal-hour head and save it.
pub fn train_warm_up(config: &Config) -> Result<()> {
    let ctx = prepare(config, resolve_seed(config.data.seed))?;
    let dims = ctx.dims(config);
    let device = select_device(config.model.use_cuda);
    info!(?device, "device selected");

    tch::manual_seed(ctx.seed as i64);
    let mut network = Network::warm_up(dims, device);
    network.load_embedding(&ctx.embedding_matrix(config)?)?;

    let regime = config.warm_up;
    let train = ctx.train.tensors(Regime::WarmUp)?;
    let validation = ctx.validation.tensors(Regime::WarmUp)?;
    let history = fit(&mut network, &train, &validation, &regime)?;

    let test = ctx.test.tensors(Regime::WarmUp)?.to_device(device);
    let test_loss = network.evaluate_loss(&test, regime.l2)?;
    println!("Test loss ({}): {:.4}", network.model.loss_kind().name(), test_loss);

    let artifacts = ModelArtifacts::from_context(
        &ctx,
        dims,
        network.model.loss_kind(),
        config.features.hours,
    );
    save_model(&network, &artifacts, &config.output, &config.output.warm_up_weights)?;
    history.write(&config.output.path(&config.output.warm_up_loss_log))?;
    Ok(())
}

/// Train the encoder-decoder, save it and run closed-loop evaluation.
///
/// # Arguments
///
/// * `config` - Run configuration
/// * `init_from` - Optional warm-up checkpoint whose `encoder.*` variables seed the encoder
/// * `skip_eval` - Skip the closed-loop evaluation on the test split
///
/// A warm start reuses the warm-up run's split seed, so both regimes see the
/// same vocabulary and the same held-out rows.
pub fn train_end_to_end(config: &Config, init_from: Option<&Path>, skip_eval: bool) -> Result<()> {
    let warm = init_from
        .map(|weights| warm_up_artifacts(config, weights))
        .transpose()?;
    let seed = match &warm {
        Some((_, artifacts)) => {
            if config.data.seed.is_some_and(|s| s != artifacts.seed) {
                warn!(
                    configured = ?config.data.seed,
                    seed = artifacts.seed,
                    "using the warm-up checkpoint's split seed"
                );
            }
            artifacts.seed
        }
        None => resolve_seed(config.data.seed),
    };

    let ctx = prepare(config, seed)?;
    let dims = ctx.dims(config);
    if let Some((sidecar, artifacts)) = &warm {
        artifacts.check_fit(&ctx, sidecar)?;
        artifacts.check_encoder(dims, sidecar)?;
    }
    let device = select_device(config.model.use_cuda);
    info!(?device, "device selected");

    tch::manual_seed(ctx.seed as i64);
    let mut network = Network::forecast(dims, device);
    if let Some(path) = init_from {
        network.load_partial(path)?;
    }
    // After the checkpoint, which carries its own copy of the frozen matrix.
    network.load_embedding(&ctx.embedding_matrix(config)?)?;

    let regime = config.end_to_end;
    let train = ctx.train.tensors(Regime::EndToEnd)?;
    let validation = ctx.validation.tensors(Regime::EndToEnd)?;
    let history = fit(&mut network, &train, &validation, &regime)?;

    let artifacts = ModelArtifacts::from_context(
        &ctx,
        dims,
        network.model.loss_kind(),
        config.features.hours,
    );
    save_model(&network, &artifacts, &config.output, &config.output.final_weights)?;
    history.write(&config.output.path(&config.output.loss_log))?;

    if !skip_eval {
        let reports = evaluate_closed_loop(&network, &ctx.test, &ctx.count_scale, config.features.hours)?;
        print_reports(&reports);
        write_results(&config.output.path(&config.output.results), &reports)?;
    }
    Ok(())
}
