//! Poisson losses for count targets.

use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

/// Added inside the logarithm of [`LossKind::PoissonDirect`] so `log(0)` never happens.
pub const POISSON_EPSILON: f64 = 1e-5;

/// Which Poisson negative log-likelihood to use, chosen by the output activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    /// Linear output read as `ln(λ)`: `exp(ŷ) − y·ŷ`
    PoissonLogLink,
    /// Non-negative output read as `λ`: `ŷ − y·ln(ŷ + ε)`
    PoissonDirect,
}

impl LossKind {
    /// Mean loss over every element of `predicted` against `actual`.
    pub fn compute(&self, predicted: &Tensor, actual: &Tensor) -> Tensor {
        let elementwise = match self {
            LossKind::PoissonLogLink => predicted.exp() - actual * predicted,
            LossKind::PoissonDirect => predicted - actual * (predicted + POISSON_EPSILON).log(),
        };
        elementwise.mean(Kind::Float)
    }

    pub fn name(&self) -> &'static str {
        match self {
            LossKind::PoissonLogLink => "poisson_log_link",
            LossKind::PoissonDirect => "poisson_direct",
        }
    }
}
