//! Single tweet forecasting using a saved model.

use super::config::OutputConfig;
use super::save::ModelArtifacts;
use crate::error::Result;
use crate::features::AccountAttributes;
use crate::model::{select_device, ForecastModel, LossKind, Network};
use crate::text::clean_text;
use std::time::Instant;
use tch::Tensor;
use tracing::info;

/// A trained end-to-end network with the state needed to encode new tweets.
pub struct Forecaster {
    network: Network<ForecastModel>,
    artifacts: ModelArtifacts,
}

impl Forecaster {
    pub fn new(network: Network<ForecastModel>, artifacts: ModelArtifacts) -> Self {
        Forecaster { network, artifacts }
    }

    /// Load the end-to-end weights and their artifacts from `output`.
    pub fn load(output: &OutputConfig, use_cuda: bool) -> Result<Self> {
        let artifacts_path = output.artifacts_for(&output.final_weights);
        let artifacts = ModelArtifacts::load(&artifacts_path)?;
        artifacts.expect_loss(LossKind::PoissonLogLink, &artifacts_path)?;
        let mut network = Network::forecast(artifacts.dims, select_device(use_cuda));
        network.load(&output.path(&output.final_weights))?;
        Ok(Forecaster::new(network, artifacts))
    }

    pub fn hours(&self) -> usize {
        self.artifacts.hours
    }

    /// Forecast the cumulative retweet count of each hour.
    pub fn forecast(&self, text: &str, account: &AccountAttributes) -> Result<Vec<i64>> {
        let cleaned = clean_text(text);
        let tokens = self
            .artifacts
            .vocabulary
            .encode_padded(&cleaned, self.artifacts.seq_len);
        let features: Vec<f32> = self
            .artifacts
            .scaler
            .transform_one(account)?
            .into_iter()
            .map(|v| v as f32)
            .collect();

        let device = self.network.device;
        let token_tensor = Tensor::from_slice(&tokens)
            .view([1, tokens.len() as i64])
            .to_device(device);
        let feature_tensor = Tensor::from_slice(&features)
            .view([1, features.len() as i64])
            .to_device(device);

        self.network.model.forecast(
            &token_tensor,
            &feature_tensor,
            self.artifacts.hours,
            &self.artifacts.count_scale,
        )
    }
}

/// Forecast a single tweet and print its trajectory.
///
/// # Arguments
///
/// * `output` - Where the trained model lives
/// * `use_cuda` - Use CUDA when available
/// * `text` - Raw tweet text
/// * `account` - Attributes of the posting account
pub fn predict_single(
    output: &OutputConfig,
    use_cuda: bool,
    text: &str,
    account: &AccountAttributes,
) -> Result<Vec<i64>> {
    let forecaster = Forecaster::load(output, use_cuda)?;
    info!(hours = forecaster.hours(), "model loaded");

    let start = Instant::now();
    let trajectory = forecaster.forecast(text, account)?;

    println!("\n===================================================================");
    println!("  Retweet forecast");
    println!("===================================================================\n");
    println!("Input text:");
    let display: String = text.chars().take(100).collect();
    if display.len() < text.len() {
        println!("  {}...\n", display);
    } else {
        println!("  {}\n", display);
    }
    for (hour, count) in trajectory.iter().enumerate() {
        println!("  hour {:>2}: {}", hour + 1, count);
    }
    println!("\n  Time: {:.3}s", start.elapsed().as_secs_f64());

    Ok(trajectory)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{torch_lock, LossKind, ModelDims};
    use crate::pipeline::context::tests::{small_config, synthetic_dataset};
    use crate::pipeline::context::PipelineContext;
    use crate::pipeline::save::save_model;
    use tch::Device;
    use tempfile::tempdir;

    #[test]
    fn test_saved_model_forecasts_like_in_memory() {
        let _guard = torch_lock();
        let dir = tempdir().unwrap();
        let mut config = small_config(4);
        config.output.model_dir = dir.path().to_path_buf();

        let dataset = synthetic_dataset(4);
        let ctx = PipelineContext::prepare(&config, &dataset, 8).unwrap();
        let dims = ModelDims {
            vocab_size: ctx.vocab.max_words as i64,
            embedding_dim: 3,
            feature_count: 10,
            lstm_units: 4,
            hidden_units: 4,
            dropout: 0.3,
        };

        tch::manual_seed(8);
        let network = Network::forecast(dims, Device::Cpu);
        let artifacts = ModelArtifacts::from_context(&ctx, dims, LossKind::PoissonLogLink, 4);
        save_model(&network, &artifacts, &config.output, &config.output.final_weights).unwrap();

        let account = dataset.records[0].attributes();
        let text = dataset.records[0].text.clone();
        let in_memory = Forecaster::new(network, artifacts)
            .forecast(&text, &account)
            .unwrap();
        let reloaded = Forecaster::load(&config.output, false)
            .unwrap()
            .forecast(&text, &account)
            .unwrap();

        assert_eq!(in_memory.len(), 4);
        assert_eq!(in_memory, reloaded);
    }

    #[test]
    fn test_load_rejects_warm_up_artifacts() {
        let _guard = torch_lock();
        let dir = tempdir().unwrap();
        let mut config = small_config(4);
        config.output.model_dir = dir.path().to_path_buf();

        let dataset = synthetic_dataset(4);
        let ctx = PipelineContext::prepare(&config, &dataset, 8).unwrap();
        let dims = ModelDims {
            vocab_size: ctx.vocab.max_words as i64,
            embedding_dim: 3,
            feature_count: 10,
            lstm_units: 4,
            hidden_units: 4,
            dropout: 0.3,
        };

        tch::manual_seed(8);
        let network = Network::forecast(dims, Device::Cpu);
        let artifacts = ModelArtifacts::from_context(&ctx, dims, LossKind::PoissonDirect, 4);
        save_model(&network, &artifacts, &config.output, &config.output.final_weights).unwrap();

        assert!(matches!(
            Forecaster::load(&config.output, false),
            Err(crate::error::ForecastError::Checkpoint { .. })
        ));
    }
}
