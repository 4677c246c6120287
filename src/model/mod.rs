//! Neural forecasting model on top of `tch`.
//!
//! - [`loss`] - Poisson losses for direct and log-link outputs
//! - [`encoder`] - Frozen-embedding LSTM encoder fused with cross-features
//! - [`decoder`] - Closed-loop decoding policy and the Elman decoder cell
//! - [`network`] - Warm-up and end-to-end networks owning their `VarStore`

pub mod decoder;
pub mod encoder;
pub mod loss;
pub mod network;

pub use decoder::{decode_closed_loop, round_count, CountScale, DecoderStep, RnnDecoder};
pub use encoder::SequenceEncoder;
pub use loss::LossKind;
pub use network::{ForecastModel, Network, TensorSet, TrainableModel, WarmUpModel};

use serde::{Deserialize, Serialize};
use tch::Device;

/// Layer sizes shared by both networks; persisted with every checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelDims {
    /// Rows of the embedding matrix (vocabulary cap)
    pub vocab_size: i64,
    pub embedding_dim: i64,
    /// Width of the cross-feature vector
    pub feature_count: i64,
    pub lstm_units: i64,
    /// Encoder projection and decoder state width
    pub hidden_units: i64,
    /// Dropout on the embedded tokens while training
    pub dropout: f64,
}

/// CUDA when available and allowed, otherwise CPU.
pub fn select_device(use_cuda: bool) -> Device {
    if use_cuda && tch::Cuda::is_available() {
        Device::Cuda(0)
    } else {
        Device::Cpu
    }
}

/// Serializes tests that seed or draw from libtorch's global generator.
#[cfg(test)]
pub(crate) fn torch_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
