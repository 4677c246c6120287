//! Autoregressive hourly decoder.
//!
//! The closed-loop driver only depends on [`DecoderStep`], a single
//! `(state, previous value) -> (state', log-intensity)` transition, so the
//! decoding policy can be exercised without any neural layers. [`RnnDecoder`]
//! is the Elman cell used by the end-to-end network.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use tch::nn::{self, Module};
use tch::{Kind, Tensor};

/// One hour of decoding.
pub trait DecoderStep {
    type State;

    /// Consume the normalized value of the previous hour and return the next
    /// state together with the predicted log-intensity.
    fn step(&self, state: &Self::State, previous: f64) -> Result<(Self::State, f64)>;
}

/// Maps raw retweet counts to and from the normalized range the model sees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountScale {
    /// Largest retweet count the scale was fitted on
    pub max_count: f64,
    /// Normalized value of `max_count`
    pub norm_to: f64,
}

impl CountScale {
    pub fn new(max_count: f64, norm_to: f64) -> Self {
        CountScale {
            max_count,
            norm_to,
        }
    }

    /// A zero maximum maps everything to zero.
    pub fn normalize(&self, count: f64) -> f64 {
        if self.max_count > 0.0 {
            count / self.max_count * self.norm_to
        } else {
            0.0
        }
    }

    pub fn unnormalize(&self, value: f64) -> f64 {
        value * self.max_count / self.norm_to
    }

    /// Turn a predicted log-intensity into an integer retweet count.
    ///
    /// A NaN or infinite count is an error rather than a silent cast.
    pub fn decode_log_intensity(&self, log_intensity: f64) -> Result<i64> {
        let count = self.unnormalize(log_intensity.exp());
        if !count.is_finite() {
            return Err(ForecastError::NonFinite {
                context: "decoded retweet count".to_string(),
                value: count,
            });
        }
        Ok(round_count(count))
    }
}

/// `max(ceil(x) - 1, floor(x))`.
///
/// Equals `floor(x)` for every finite `x`; integral values stay put.
pub fn round_count(x: f64) -> i64 {
    (x.ceil() - 1.0).max(x.floor()) as i64
}

/// Unroll `decoder` for `hours` steps, feeding every decoded count back as
/// the next input. Decoding starts from a normalized input of 0.
pub fn decode_closed_loop<D: DecoderStep>(
    decoder: &D,
    initial: D::State,
    hours: usize,
    scale: &CountScale,
) -> Result<Vec<i64>> {
    let mut state = initial;
    let mut previous = 0.0;
    let mut counts = Vec::with_capacity(hours);

    for _ in 0..hours {
        let (next, log_intensity) = decoder.step(&state, previous)?;
        let count = scale.decode_log_intensity(log_intensity)?;
        counts.push(count);
        previous = scale.normalize(count as f64);
        state = next;
    }

    Ok(counts)
}

/// Elman cell `h' = tanh(W_x x + W_h h + b)` with a shared linear read-out.
pub struct RnnDecoder {
    input: nn::Linear,
    recurrent: nn::Linear,
    project: nn::Linear,
}

impl RnnDecoder {
    pub fn new(p: &nn::Path, hidden_units: i64) -> Self {
        let input = nn::linear(p / "input", 1, hidden_units, Default::default());
        let recurrent = nn::linear(
            p / "recurrent",
            hidden_units,
            hidden_units,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let project = nn::linear(p / "project", hidden_units, 1, Default::default());

        RnnDecoder {
            input,
            recurrent,
            project,
        }
    }

    /// `x` is `[batch, 1]`, `h` is `[batch, hidden]`; returns `(h', log-intensity [batch, 1])`.
    pub fn cell(&self, x: &Tensor, h: &Tensor) -> (Tensor, Tensor) {
        let next = (self.input.forward(x) + self.recurrent.forward(h)).tanh();
        let out = self.project.forward(&next);
        (next, out)
    }

    /// Teacher-forced unroll over `inputs` `[batch, hours]`, returning
    /// log-intensities `[batch, hours]`.
    pub fn forward_teacher_forced(&self, inputs: &Tensor, h0: &Tensor) -> Tensor {
        let hours = inputs.size()[1];
        let inputs = inputs.to_kind(Kind::Float);
        let mut h = h0.shallow_clone();
        let mut outputs = Vec::with_capacity(hours as usize);

        for t in 0..hours {
            let (next, out) = self.cell(&inputs.narrow(1, t, 1), &h);
            outputs.push(out);
            h = next;
        }

        Tensor::cat(&outputs, 1)
    }
}

impl DecoderStep for RnnDecoder {
    /// Hidden state `[1, hidden]`
    type State = Tensor;

    fn step(&self, state: &Tensor, previous: f64) -> Result<(Tensor, f64)> {
        let x = Tensor::from_slice(&[previous as f32])
            .view([1, 1])
            .to_device(state.device());
        let (next, out) = self.cell(&x, state);
        let log_intensity = out.f_double_value(&[0, 0])?;
        Ok((next, log_intensity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::torch_lock;
    use approx::assert_abs_diff_eq;
    use std::cell::RefCell;
    use tch::Device;

    /// Replays fixed log-intensities and records the inputs it was fed.
    struct Replay {
        outputs: Vec<f64>,
        seen: RefCell<Vec<f64>>,
    }

    impl DecoderStep for Replay {
        type State = usize;

        fn step(&self, state: &usize, previous: f64) -> Result<(usize, f64)> {
            self.seen.borrow_mut().push(previous);
            Ok((state + 1, self.outputs[*state]))
        }
    }

    #[test]
    fn test_rounding_rule() {
        assert_eq!(round_count(4.3), 4);
        assert_eq!(round_count(4.9), 4);
        assert_eq!(round_count(4.0), 4);
        assert_eq!(round_count(0.0), 0);
        for x in [0.5, 1.0, 2.25, 7.999, 12.0] {
            let r = round_count(x);
            assert!(r == x.floor() as i64 || r == x.ceil() as i64 - 1);
        }
    }

    #[test]
    fn test_scale_round_trip() {
        let scale = CountScale::new(500.0, 10.0);
        assert_abs_diff_eq!(scale.normalize(250.0), 5.0);
        assert_abs_diff_eq!(scale.unnormalize(5.0), 250.0);
        assert_eq!(CountScale::new(0.0, 10.0).normalize(3.0), 0.0);
    }

    #[test]
    fn test_decode_log_intensity() {
        // exp(ln 0.43) * 100 / 10 = 4.3
        let scale = CountScale::new(100.0, 10.0);
        assert_eq!(scale.decode_log_intensity(0.43f64.ln()).unwrap(), 4);
    }

    #[test]
    fn test_non_finite_intensity_is_rejected() {
        let scale = CountScale::new(100.0, 10.0);
        for bad in [f64::NAN, f64::INFINITY, 1e6] {
            assert!(matches!(
                scale.decode_log_intensity(bad),
                Err(ForecastError::NonFinite { .. })
            ));
        }

        let replay = Replay {
            outputs: vec![0.43f64.ln(), f64::NAN, 0.0],
            seen: RefCell::new(Vec::new()),
        };
        assert!(matches!(
            decode_closed_loop(&replay, 0, 3, &scale),
            Err(ForecastError::NonFinite { .. })
        ));
        assert_eq!(replay.seen.borrow().len(), 2);
    }

    #[test]
    fn test_closed_loop_feeds_back_decoded_counts() {
        let scale = CountScale::new(100.0, 10.0);
        // Decoded counts: 4, 12, 12
        let replay = Replay {
            outputs: vec![0.43f64.ln(), 1.25f64.ln(), 1.23f64.ln()],
            seen: RefCell::new(Vec::new()),
        };

        let counts = decode_closed_loop(&replay, 0, 3, &scale).unwrap();
        assert_eq!(counts, vec![4, 12, 12]);

        let seen = replay.seen.borrow();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], 0.0);
        assert_abs_diff_eq!(seen[1], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(seen[2], 1.2, epsilon = 1e-12);
    }

    #[test]
    fn test_step_matches_teacher_forced_unroll() {
        let _guard = torch_lock();
        tch::manual_seed(3);
        let vs = nn::VarStore::new(Device::Cpu);
        let decoder = RnnDecoder::new(&(vs.root() / "decoder"), 4);

        let h0 = Tensor::randn([1, 4], (Kind::Float, Device::Cpu));
        let inputs = [0.0f32, 0.5, 1.5];
        let forced = decoder.forward_teacher_forced(&Tensor::from_slice(&inputs).view([1, 3]), &h0);
        assert_eq!(forced.size(), vec![1, 3]);

        let mut state = h0.shallow_clone();
        for (t, &x) in inputs.iter().enumerate() {
            let (next, out) = decoder.step(&state, x as f64).unwrap();
            let expected = forced.double_value(&[0, t as i64]);
            assert_abs_diff_eq!(out, expected, epsilon = 1e-6);
            state = next;
        }
    }
}
