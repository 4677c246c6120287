//! Text + account-feature encoder.
//!
//! Embeds the padded token sequence with a frozen embedding matrix, summarizes
//! it with a single-layer LSTM, concatenates the cross-features and projects
//! the result to the decoder's hidden width.

use super::ModelDims;
use crate::error::{ForecastError, Result};
use ndarray::Array2;
use tch::nn::{self, Module, RNN};
use tch::{Kind, Tensor};

pub struct SequenceEncoder {
    embedding: Tensor,
    lstm: nn::LSTM,
    fuse: nn::Linear,
    dropout: f64,
}

impl SequenceEncoder {
    /// Register the encoder variables under `p`.
    ///
    /// The embedding matrix is created as a non-trainable variable so the
    /// optimizer never touches it but checkpoints still carry it.
    pub fn new(p: &nn::Path, dims: &ModelDims) -> Self {
        let embedding = p.zeros_no_train("embedding", &[dims.vocab_size, dims.embedding_dim]);
        let lstm = nn::lstm(
            p / "lstm",
            dims.embedding_dim,
            dims.lstm_units,
            Default::default(),
        );
        let fuse = nn::linear(
            p / "fuse",
            dims.lstm_units + dims.feature_count,
            dims.hidden_units,
            Default::default(),
        );

        SequenceEncoder {
            embedding,
            lstm,
            fuse,
            dropout: dims.dropout,
        }
    }

    /// Copy a `(vocab_size, embedding_dim)` matrix into the frozen embedding.
    pub fn load_embedding(&mut self, matrix: &Array2<f32>) -> Result<()> {
        let expected = self.embedding.size();
        let (rows, cols) = matrix.dim();
        if expected != [rows as i64, cols as i64] {
            return Err(ForecastError::shape_mismatch(
                "embedding matrix cells",
                (expected[0] * expected[1]) as usize,
                rows * cols,
            ));
        }

        let values: Vec<f32> = matrix.iter().copied().collect();
        let source = Tensor::from_slice(&values)
            .view([rows as i64, cols as i64])
            .to_device(self.embedding.device());
        tch::no_grad(|| self.embedding.f_copy_(&source))?;
        Ok(())
    }

    /// Encode `tokens` `[batch, seq_len]` and `features` `[batch, feature_count]`
    /// into `[batch, hidden_units]`.
    pub fn forward_t(&self, tokens: &Tensor, features: &Tensor, train: bool) -> Tensor {
        let embedded = Tensor::embedding(&self.embedding, tokens, -1, false, false)
            .dropout(self.dropout, train);
        let (_, state) = self.lstm.seq(&embedded);
        let summary = state.h().squeeze_dim(0);
        let joined = Tensor::cat(&[summary, features.to_kind(Kind::Float)], 1);
        self.fuse.forward(&joined)
    }
}
