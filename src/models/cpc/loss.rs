//! Contrastive predictive coding loss
//!
//! For every horizon k the loss shifts the quantized latents k steps
//! forward, predicts them from the causally-masked context, and asks a
//! classifier to find the true future among sampled distractors. The
//! true candidate always sits at class index 0, so the target labels
//! are all zeros.

use candle_core::{DType, Tensor, D};
use candle_nn::loss::cross_entropy;
use candle_nn::VarBuilder;
use tracing::debug;

use crate::config::CpcConfig;
use crate::core::error::{Result, VqcpcError};

use super::negatives::NegativeSampler;
use super::positional::PositionalEncoding;
use super::predictor::{CausalMaskCache, StepPredictor};

/// CPC loss with one step predictor per horizon
#[derive(Debug)]
pub struct CpcLoss {
    config: CpcConfig,
    positional: PositionalEncoding,
    predictors: Vec<StepPredictor>,
    mask_cache: CausalMaskCache,
    sampler: NegativeSampler,
}

impl CpcLoss {
    /// Build the loss, registering predictor parameters under `vb`
    pub fn new(config: CpcConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let device = vb.device().clone();
        let positional =
            PositionalEncoding::new(config.z_dim, config.max_len, config.dropout, &device)?;
        let predictors = (0..config.n_prediction_steps)
            .map(|k| {
                StepPredictor::new(
                    config.z_dim,
                    config.num_heads,
                    config.ff_dim,
                    vb.pp(format!("predictor_{k}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let sampler = NegativeSampler::new(config.seed);
        Ok(Self {
            config,
            positional,
            predictors,
            mask_cache: CausalMaskCache::new(),
            sampler,
        })
    }

    /// Loss configuration
    pub fn config(&self) -> &CpcConfig {
        &self.config
    }

    /// Compute the contrastive loss and per-horizon accuracies.
    ///
    /// `z` is the quantized latent sequence (B, T, z_dim) and `c` the
    /// aligned context sequence (B, T, c_dim), with B = S * U. Returns
    /// the scalar loss (mean over horizons) and one top-1 accuracy per
    /// horizon.
    pub fn forward(&mut self, z: &Tensor, c: &Tensor, training: bool) -> Result<(Tensor, Vec<f32>)> {
        let (b, t, z_dim) = z.dims3()?;
        let s = self.config.n_speakers;
        let u = self.config.n_utterances_per_speaker;
        let k_max = self.config.n_prediction_steps;
        let n = self.config.n_negatives;

        if b != s * u {
            return Err(VqcpcError::shape(
                "cpc_loss",
                format!("batch size {b} must equal n_speakers * n_utterances_per_speaker = {}", s * u),
            ));
        }
        if z_dim != self.config.z_dim {
            return Err(VqcpcError::shape(
                "cpc_loss",
                format!("latent dim {z_dim} does not match configured z_dim {}", self.config.z_dim),
            ));
        }
        if c.dims3()? != (b, t, self.config.c_dim) {
            return Err(VqcpcError::shape(
                "cpc_loss",
                format!("context {:?} must be ({b}, {t}, {})", c.dims(), self.config.c_dim),
            ));
        }
        if t <= k_max {
            return Err(VqcpcError::shape(
                "cpc_loss",
                format!("sequence length {t} must exceed the maximum horizon {k_max}"),
            ));
        }

        // Shared window so every horizon scores the same number of frames.
        let window = t - k_max;
        let z = z.contiguous()?.reshape((s, u, t, z_dim))?;
        let c = c.narrow(1, 0, window)?.contiguous()?;
        let c = self.positional.forward(&c, training)?;
        let mask = self.mask_cache.get(window, c.device())?;

        let mut losses = Vec::with_capacity(k_max);
        let mut accuracies = Vec::with_capacity(k_max);
        for k in 1..=k_max {
            let z_shift = z.narrow(2, k, window)?.contiguous()?; // (S, U, T', D)

            let predicted = self.predictors[k - 1].forward(&c, &mask)?;
            let predicted = predicted.reshape((s, u, window, z_dim))?;

            let indices = self.sampler.sample(s, u, window, n)?;
            let negatives = indices.gather(&z_shift)?; // (S, U, n, T', D)

            // True candidate first, negatives after: label is always 0.
            let candidates = Tensor::cat(&[&z_shift.unsqueeze(2)?, &negatives], 2)?;
            let logits = score_candidates(&candidates, &predicted)?; // (S, U, n+1, T')

            let logits = logits
                .reshape((s * u, n + 1, window))?
                .transpose(1, 2)?
                .contiguous()?
                .reshape((s * u * window, n + 1))?;
            let labels = Tensor::zeros(s * u * window, DType::U32, z.device())?;

            let loss = cross_entropy(&logits, &labels)?;
            let accuracy = top1_accuracy(&logits)?;
            debug!(horizon = k, accuracy = accuracy as f64, "cpc horizon scored");

            losses.push(loss);
            accuracies.push(accuracy);
        }

        let loss = Tensor::stack(&losses, 0)?.mean_all()?;
        Ok((loss, accuracies))
    }
}

/// Scaled dot-product score between each candidate and the prediction.
///
/// `candidates` is (S, U, n+1, T', D), `predicted` (S, U, T', D); the
/// result is (S, U, n+1, T'). The 1/sqrt(D) scaling keeps the logits in
/// a stable range independent of the embedding dimension.
fn score_candidates(candidates: &Tensor, predicted: &Tensor) -> Result<Tensor> {
    let d = predicted.dim(D::Minus1)?;
    let scores = candidates
        .broadcast_mul(&predicted.unsqueeze(2)?)?
        .sum(D::Minus1)?;
    Ok((scores / (d as f64).sqrt())?)
}

/// Fraction of positions where the true candidate (class 0) wins
fn top1_accuracy(logits: &Tensor) -> Result<f32> {
    let predictions = logits.argmax(D::Minus1)?;
    let labels = Tensor::zeros(predictions.dims(), DType::U32, logits.device())?;
    let correct = predictions
        .eq(&labels)?
        .to_dtype(DType::F32)?
        .mean_all()?
        .to_scalar::<f32>()?;
    Ok(correct)
}
