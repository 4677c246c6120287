//! Model persistence: weights plus the fitted state inference needs.

use super::config::OutputConfig;
use super::context::PipelineContext;
use crate::error::{ForecastError, Result};
use crate::features::CrossFeatureScaler;
use crate::model::{CountScale, LossKind, ModelDims, Network, TrainableModel};
use crate::vocab::Vocabulary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Everything besides the weights needed to reproduce inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub vocabulary: Vocabulary,
    pub scaler: CrossFeatureScaler,
    /// Padded sequence width
    pub seq_len: usize,
    pub count_scale: CountScale,
    /// Seed the splits were drawn with
    pub seed: u64,
    pub loss: LossKind,
    pub dims: ModelDims,
    /// Forecast window
    pub hours: usize,
}

impl ModelArtifacts {
    pub fn from_context(ctx: &PipelineContext, dims: ModelDims, loss: LossKind, hours: usize) -> Self {
        ModelArtifacts {
            vocabulary: ctx.vocab.clone(),
            scaler: ctx.scaler.clone(),
            seq_len: ctx.seq_len,
            count_scale: ctx.count_scale,
            seed: ctx.seed,
            loss,
            dims,
            hours,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| ForecastError::checkpoint(path, e))?;
        std::fs::write(path, json).map_err(|e| ForecastError::checkpoint(path, e))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ForecastError::checkpoint(path, e))?;
        serde_json::from_str(&json).map_err(|e| ForecastError::checkpoint(path, e))
    }

    /// Reject a checkpoint written by the other regime.
    pub fn expect_loss(&self, expected: LossKind, path: &Path) -> Result<()> {
        if self.loss != expected {
            return Err(ForecastError::checkpoint(
                path,
                format!(
                    "trained with {} loss, expected {}",
                    self.loss.name(),
                    expected.name()
                ),
            ));
        }
        Ok(())
    }

    /// Reject a checkpoint whose vocabulary or padding the current data does not reproduce.
    pub fn check_fit(&self, ctx: &PipelineContext, path: &Path) -> Result<()> {
        if ctx.vocab != self.vocabulary || ctx.seq_len != self.seq_len {
            return Err(ForecastError::checkpoint(
                path,
                "dataset no longer reproduces the saved vocabulary",
            ));
        }
        Ok(())
    }

    /// Reject a checkpoint whose encoder layers differ from `dims`. Dropout is not a weight.
    pub fn check_encoder(&self, dims: ModelDims, path: &Path) -> Result<()> {
        let comparable = ModelDims {
            dropout: self.dims.dropout,
            ..dims
        };
        if comparable != self.dims {
            return Err(ForecastError::checkpoint(
                path,
                format!("encoder sizes {:?} do not match {:?}", self.dims, dims),
            ));
        }
        Ok(())
    }
}

/// Write `network` as `weights_file` and its artifacts next to it.
///
/// # Arguments
///
/// * `network` - The trained network
/// * `artifacts` - Fitted state of the run
/// * `output` - Output configuration specifying the model directory
/// * `weights_file` - Weights filename inside the model directory
pub fn save_model<M: TrainableModel>(
    network: &Network<M>,
    artifacts: &ModelArtifacts,
    output: &OutputConfig,
    weights_file: &str,
) -> Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(&output.model_dir)
        .map_err(|e| ForecastError::checkpoint(&output.model_dir, e))?;

    let weights_path = output.path(weights_file);
    let artifacts_path = output.artifacts_for(weights_file);

    network.save(&weights_path)?;
    artifacts.save(&artifacts_path)?;

    info!(
        weights = %weights_path.display(),
        artifacts = %artifacts_path.display(),
        "model saved"
    );
    Ok((weights_path, artifacts_path))
}
