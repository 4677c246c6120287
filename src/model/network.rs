//! Trainable networks and the batches they consume.
//!
//! A [`Network`] owns the device, the `VarStore` and one of the two model
//! heads. Both heads share the `encoder.*` variable names, so a warm-up
//! checkpoint can seed the end-to-end encoder through
//! [`Network::load_partial`].

use super::decoder::{decode_closed_loop, CountScale, RnnDecoder};
use super::encoder::SequenceEncoder;
use super::loss::LossKind;
use super::ModelDims;
use crate::error::{ForecastError, Result};
use ndarray::Array2;
use std::path::Path;
use tch::nn::{self, Module};
use tch::{Device, Kind, Tensor};
use tracing::{debug, info};

/// Kernels that carry the L2 penalty: LSTM input kernel, fusion projection
/// and decoder input kernel.
pub const REGULARIZED_KERNELS: [&str; 3] = [
    "encoder.lstm.weight_ih_l0",
    "encoder.fuse.weight",
    "decoder.input.weight",
];

/// Aligned tensors for one split.
pub struct TensorSet {
    /// Padded token ids `[n, seq_len]`
    pub tokens: Tensor,
    /// Scaled cross-features `[n, feature_count]`
    pub features: Tensor,
    /// Teacher-forcing inputs `[n, hours]`, end-to-end only
    pub decoder_inputs: Option<Tensor>,
    /// `[n, 1]` for the warm-up head, `[n, hours]` end-to-end
    pub targets: Tensor,
}

impl TensorSet {
    /// Build from host arrays; every array must have the same row count.
    pub fn new(
        tokens: &[Vec<i64>],
        features: &Array2<f64>,
        decoder_inputs: Option<&Array2<f64>>,
        targets: &Array2<f64>,
    ) -> Result<Self> {
        let n = tokens.len();
        for (context, rows) in [
            ("feature rows", features.nrows()),
            ("target rows", targets.nrows()),
        ] {
            if rows != n {
                return Err(ForecastError::shape_mismatch(context, n, rows));
            }
        }
        if let Some(inputs) = decoder_inputs {
            if inputs.nrows() != n {
                return Err(ForecastError::shape_mismatch(
                    "decoder input rows",
                    n,
                    inputs.nrows(),
                ));
            }
        }

        let seq_len = tokens.first().map_or(0, Vec::len);
        if let Some(row) = tokens.iter().find(|row| row.len() != seq_len) {
            return Err(ForecastError::shape_mismatch(
                "token sequence length",
                seq_len,
                row.len(),
            ));
        }
        let flat: Vec<i64> = tokens.iter().flatten().copied().collect();

        Ok(TensorSet {
            tokens: Tensor::from_slice(&flat).view([n as i64, seq_len as i64]),
            features: float_tensor(features),
            decoder_inputs: decoder_inputs.map(float_tensor),
            targets: float_tensor(targets),
        })
    }

    pub fn len(&self) -> i64 {
        self.tokens.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows at `index` (an Int64 tensor on the same device).
    pub fn select(&self, index: &Tensor) -> TensorSet {
        TensorSet {
            tokens: self.tokens.index_select(0, index),
            features: self.features.index_select(0, index),
            decoder_inputs: self
                .decoder_inputs
                .as_ref()
                .map(|t| t.index_select(0, index)),
            targets: self.targets.index_select(0, index),
        }
    }

    pub fn to_device(&self, device: Device) -> TensorSet {
        TensorSet {
            tokens: self.tokens.to_device(device),
            features: self.features.to_device(device),
            decoder_inputs: self.decoder_inputs.as_ref().map(|t| t.to_device(device)),
            targets: self.targets.to_device(device),
        }
    }
}

fn float_tensor(array: &Array2<f64>) -> Tensor {
    let (rows, cols) = array.dim();
    let values: Vec<f32> = array.iter().map(|&v| v as f32).collect();
    Tensor::from_slice(&values).view([rows as i64, cols as i64])
}

/// A model head that can be trained on [`TensorSet`] batches.
pub trait TrainableModel {
    /// Loss matching the head's output activation.
    fn loss_kind(&self) -> LossKind;

    /// Predictions shaped like `batch.targets`.
    fn forward_batch(&self, batch: &TensorSet, train: bool) -> Result<Tensor>;

    fn encoder_mut(&mut self) -> &mut SequenceEncoder;
}

/// Encoder plus a terminal-hour regression head.
pub struct WarmUpModel {
    encoder: SequenceEncoder,
    head: nn::Linear,
}

impl WarmUpModel {
    pub fn new(root: &nn::Path, dims: &ModelDims) -> Self {
        WarmUpModel {
            encoder: SequenceEncoder::new(&(root / "encoder"), dims),
            head: nn::linear(root / "head", dims.hidden_units, 1, Default::default()),
        }
    }
}

impl TrainableModel for WarmUpModel {
    fn loss_kind(&self) -> LossKind {
        LossKind::PoissonDirect
    }

    fn forward_batch(&self, batch: &TensorSet, train: bool) -> Result<Tensor> {
        let encoded = self
            .encoder
            .forward_t(&batch.tokens, &batch.features, train);
        // LeakyReLU, negative slope 0.3
        let activated = encoded.maximum(&(&encoded * 0.3));
        Ok(self.head.forward(&activated).relu())
    }

    fn encoder_mut(&mut self) -> &mut SequenceEncoder {
        &mut self.encoder
    }
}

/// Encoder whose projection seeds the hourly decoder.
pub struct ForecastModel {
    encoder: SequenceEncoder,
    decoder: RnnDecoder,
}

impl ForecastModel {
    pub fn new(root: &nn::Path, dims: &ModelDims) -> Self {
        ForecastModel {
            encoder: SequenceEncoder::new(&(root / "encoder"), dims),
            decoder: RnnDecoder::new(&(root / "decoder"), dims.hidden_units),
        }
    }

    /// Decoder initial state for a batch.
    pub fn encode(&self, tokens: &Tensor, features: &Tensor) -> Tensor {
        self.encoder.forward_t(tokens, features, false)
    }

    /// Closed-loop forecast for a single example (`tokens` `[1, seq_len]`).
    pub fn forecast(
        &self,
        tokens: &Tensor,
        features: &Tensor,
        hours: usize,
        scale: &CountScale,
    ) -> Result<Vec<i64>> {
        tch::no_grad(|| {
            let initial = self.encode(tokens, features);
            decode_closed_loop(&self.decoder, initial, hours, scale)
        })
    }
}

impl TrainableModel for ForecastModel {
    fn loss_kind(&self) -> LossKind {
        LossKind::PoissonLogLink
    }

    fn forward_batch(&self, batch: &TensorSet, train: bool) -> Result<Tensor> {
        let inputs = batch.decoder_inputs.as_ref().ok_or_else(|| {
            ForecastError::Config("end-to-end batches need decoder inputs".to_string())
        })?;
        let initial = self
            .encoder
            .forward_t(&batch.tokens, &batch.features, train);
        Ok(self.decoder.forward_teacher_forced(inputs, &initial))
    }

    fn encoder_mut(&mut self) -> &mut SequenceEncoder {
        &mut self.encoder
    }
}

/// A model head together with the variables backing it.
pub struct Network<M> {
    pub device: Device,
    pub vs: nn::VarStore,
    pub model: M,
    pub dims: ModelDims,
    regularized: Vec<Tensor>,
}

impl Network<WarmUpModel> {
    pub fn warm_up(dims: ModelDims, device: Device) -> Self {
        Network::build(dims, device, WarmUpModel::new)
    }
}

impl Network<ForecastModel> {
    pub fn forecast(dims: ModelDims, device: Device) -> Self {
        Network::build(dims, device, ForecastModel::new)
    }
}

impl<M: TrainableModel> Network<M> {
    fn build(
        dims: ModelDims,
        device: Device,
        make: impl FnOnce(&nn::Path<'_>, &ModelDims) -> M,
    ) -> Self {
        let mut vs = nn::VarStore::new(device);
        vs.set_kind(Kind::Float);
        let model = make(&vs.root(), &dims);

        let variables = vs.variables();
        let regularized: Vec<Tensor> = REGULARIZED_KERNELS
            .iter()
            .filter_map(|name| variables.get(*name).map(Tensor::shallow_clone))
            .collect();
        debug!(
            regularized = regularized.len(),
            variables = variables.len(),
            "network built"
        );

        Network {
            device,
            vs,
            model,
            dims,
            regularized,
        }
    }

    pub fn load_embedding(&mut self, matrix: &Array2<f32>) -> Result<()> {
        self.model.encoder_mut().load_embedding(matrix)
    }

    /// `l2 * Σ w²` over the regularized kernels.
    pub fn l2_penalty(&self, l2: f64) -> Tensor {
        let mut penalty = Tensor::from(0f32).to_device(self.device);
        if l2 > 0.0 {
            for weight in &self.regularized {
                penalty += weight.square().sum(Kind::Float) * l2;
            }
        }
        penalty
    }

    /// Mean loss of `batch` plus the L2 penalty.
    pub fn loss(&self, batch: &TensorSet, train: bool, l2: f64) -> Result<Tensor> {
        let predicted = self.model.forward_batch(batch, train)?;
        let base = self.model.loss_kind().compute(&predicted, &batch.targets);
        Ok(base + self.l2_penalty(l2))
    }

    /// Loss without dropout or gradient tracking.
    pub fn evaluate_loss(&self, batch: &TensorSet, l2: f64) -> Result<f64> {
        let loss = tch::no_grad(|| self.loss(batch, false, l2))?;
        Ok(loss.f_double_value(&[])?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ForecastError::checkpoint(path, e))?;
        }
        self.vs
            .save(path)
            .map_err(|e| ForecastError::checkpoint(path, e))?;
        info!(path = %path.display(), "weights saved");
        Ok(())
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.vs
            .load(path)
            .map_err(|e| ForecastError::checkpoint(path, e))?;
        info!(path = %path.display(), "weights loaded");
        Ok(())
    }

    /// Load the variables present in `path`, returning the names that were not found.
    pub fn load_partial(&mut self, path: &Path) -> Result<Vec<String>> {
        let missing = self
            .vs
            .load_partial(path)
            .map_err(|e| ForecastError::checkpoint(path, e))?;
        info!(
            path = %path.display(),
            missing = missing.len(),
            "weights partially loaded"
        );
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::torch_lock;
    use ndarray::array;
    use tempfile::tempdir;

    fn dims() -> ModelDims {
        ModelDims {
            vocab_size: 8,
            embedding_dim: 3,
            feature_count: 2,
            lstm_units: 4,
            hidden_units: 5,
            dropout: 0.3,
        }
    }

    fn batch(hours: usize, with_inputs: bool) -> TensorSet {
        let tokens = vec![vec![0, 1, 2], vec![3, 4, 5], vec![0, 0, 7]];
        let features = array![[0.5, 1.0], [0.0, 10.0], [3.0, 2.0]];
        let trajectory = Array2::from_shape_fn((3, hours), |(r, c)| (r + c) as f64 * 0.1);
        let inputs = with_inputs.then(|| trajectory.clone());
        TensorSet::new(&tokens, &features, inputs.as_ref(), &trajectory).unwrap()
    }

    #[test]
    fn test_tensor_set_rejects_misaligned_rows() {
        let tokens = vec![vec![1, 2], vec![3, 4]];
        let features = array![[1.0, 2.0]];
        let targets = array![[1.0], [2.0]];
        assert!(matches!(
            TensorSet::new(&tokens, &features, None, &targets),
            Err(ForecastError::ShapeMismatch { expected: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_select_keeps_rows_aligned() {
        let set = batch(2, true);
        let picked = set.select(&Tensor::from_slice(&[2i64, 0]));
        assert_eq!(picked.len(), 2);
        assert_eq!(picked.tokens.int64_value(&[0, 2]), 7);
        assert_eq!(picked.tokens.int64_value(&[1, 1]), 1);
        assert!((picked.targets.double_value(&[0, 0]) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_regularized_kernels_are_found() {
        let _guard = torch_lock();
        let warm = Network::warm_up(dims(), Device::Cpu);
        assert_eq!(warm.regularized.len(), 2);
        let full = Network::forecast(dims(), Device::Cpu);
        assert_eq!(full.regularized.len(), 3);
        assert_eq!(full.l2_penalty(0.0).double_value(&[]), 0.0);
        assert!(full.l2_penalty(0.05).double_value(&[]) > 0.0);
    }

    #[test]
    fn test_forward_shapes_and_finite_loss() {
        let _guard = torch_lock();
        tch::manual_seed(11);
        let warm = Network::warm_up(dims(), Device::Cpu);
        let warm_batch = batch(1, false);
        let out = warm.model.forward_batch(&warm_batch, false).unwrap();
        assert_eq!(out.size(), vec![3, 1]);
        assert!(warm.evaluate_loss(&warm_batch, 0.0).unwrap().is_finite());

        let full = Network::forecast(dims(), Device::Cpu);
        let full_batch = batch(6, true);
        let out = full.model.forward_batch(&full_batch, false).unwrap();
        assert_eq!(out.size(), vec![3, 6]);
        assert!(full.evaluate_loss(&full_batch, 0.05).unwrap().is_finite());
    }

    #[test]
    fn test_forecast_requires_decoder_inputs() {
        let _guard = torch_lock();
        let full = Network::forecast(dims(), Device::Cpu);
        assert!(matches!(
            full.model.forward_batch(&batch(4, false), false),
            Err(ForecastError::Config(_))
        ));
    }

    #[test]
    fn test_warm_up_encoder_seeds_forecast_network() {
        let _guard = torch_lock();
        let dir = tempdir().unwrap();
        let path = dir.path().join("warm.ot");

        tch::manual_seed(1);
        let mut warm = Network::warm_up(dims(), Device::Cpu);
        let matrix = Array2::from_elem((8, 3), 0.25f32);
        warm.load_embedding(&matrix).unwrap();
        warm.save(&path).unwrap();

        tch::manual_seed(2);
        let mut full = Network::forecast(dims(), Device::Cpu);
        let missing = full.load_partial(&path).unwrap();
        assert!(missing.iter().all(|name| name.starts_with("decoder.")));
        assert!(!missing.is_empty());

        let warm_vars = warm.vs.variables();
        let full_vars = full.vs.variables();
        for name in ["encoder.embedding", "encoder.fuse.weight", "encoder.lstm.weight_hh_l0"] {
            assert!(warm_vars[name].allclose(&full_vars[name], 1e-6, 1e-6, false));
        }
    }

    #[test]
    fn test_closed_loop_forecast_length() {
        let _guard = torch_lock();
        tch::manual_seed(5);
        let full = Network::forecast(dims(), Device::Cpu);
        let tokens = Tensor::from_slice(&[0i64, 1, 2]).view([1, 3]);
        let features = Tensor::from_slice(&[0.5f32, 1.0]).view([1, 2]);
        let counts = full
            .model
            .forecast(&tokens, &features, 5, &CountScale::new(100.0, 10.0))
            .unwrap();
        assert_eq!(counts.len(), 5);
    }
}
