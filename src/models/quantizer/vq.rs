//! Grouped vector quantizer with EMA codebook updates
//!
//! Quantizes continuous latent frames to their nearest codebook entries,
//! one independent codebook per channel group. The returned tensor is a
//! straight-through value: numerically the selected codebook vectors,
//! but gradients pass to the encoder as if quantization were the
//! identity. Codebook learning happens as an explicit training-mode side
//! effect on [`CodebookState`], not through gradients.

use candle_core::{DType, Tensor, D};
use candle_nn::encoding::one_hot;
use candle_nn::loss::mse;
use tracing::debug;

use crate::config::VqConfig;
use crate::core::error::{Result, VqcpcError};

use super::codebook::CodebookState;

/// Grouped nearest-neighbor quantizer
#[derive(Debug, Clone)]
pub struct VectorQuantizer {
    config: VqConfig,
}

impl VectorQuantizer {
    /// Create a quantizer for the given configuration
    pub fn new(config: VqConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Quantizer configuration
    pub fn config(&self) -> &VqConfig {
        &self.config
    }

    /// Quantize a batch of latent frames.
    ///
    /// `x` has shape (B, C, L) with C = G * D. Returns the straight-through
    /// quantized tensor in the same layout, the scaled commitment loss, and
    /// the codebook perplexity summed over groups. When `training` is set
    /// the codebook state receives one EMA update; concurrent training
    /// calls against the same state are unsupported.
    pub fn quantize(
        &self,
        state: &mut CodebookState,
        x: &Tensor,
        training: bool,
    ) -> Result<(Tensor, Tensor, f32)> {
        let (b, c, l) = x.dims3().map_err(|_| {
            VqcpcError::shape("quantize", format!("expected rank-3 (B, C, L) input, got {:?}", x.dims()))
        })?;
        let (g, m, d) = (
            self.config.num_groups,
            self.config.num_codes,
            self.config.code_dim,
        );
        if c != g * d {
            return Err(VqcpcError::shape(
                "quantize",
                format!("channel count {c} must equal num_groups * code_dim = {}", g * d),
            ));
        }
        let n = b * l;

        // (B, C, L) -> (B, G, D, L) -> (G, B, L, D), then flatten batch/time.
        let x_grouped = x
            .contiguous()?
            .reshape((b, g, d, l))?
            .permute((1, 0, 3, 2))?
            .contiguous()?;
        // Assignment must not contribute gradient, so distances are taken
        // against a detached copy.
        let x_flat = x_grouped.detach().reshape((g, n, d))?;

        // Squared Euclidean distances via |x|^2 - 2 x.e + |e|^2.
        let x_sq = x_flat.sqr()?.sum_keepdim(2)?; // (G, N, 1)
        let e_sq = state.codebook().sqr()?.sum_keepdim(2)?.transpose(1, 2)?; // (G, 1, M)
        let xe = x_flat.matmul(&state.codebook().transpose(1, 2)?.contiguous()?)?; // (G, N, M)
        let distances = x_sq.broadcast_add(&e_sq)?.broadcast_sub(&(xe * 2.0)?)?;

        // First minimum wins on ties, deterministic for a fixed codebook.
        let indices = distances.argmin(D::Minus1)?; // (G, N) u32
        let encodings = one_hot(indices.to_dtype(DType::I64)?, m, 1.0f32, 0.0f32)?; // (G, N, M)

        let ids = indices.unsqueeze(2)?.expand((g, n, d))?.contiguous()?;
        let quantized = state.codebook().gather(&ids, 1)?; // (G, N, D)
        let quantized = quantized.reshape((g, b, l, d))?;

        if training {
            state.ema_update(&encodings, &x_flat, self.config.decay, self.config.epsilon)?;
        }

        // Commitment term: pull the encoder toward its chosen codes. The
        // quantized side is detached so only the encoder moves.
        let commitment_loss = (mse(&x_grouped, &quantized.detach())? * self.config.commitment_cost)?;

        // Straight-through estimator: value of the codebook entry, gradient
        // of the identity.
        let quantized = (&x_grouped + (&quantized - &x_grouped)?.detach())?;

        // Perplexity of the average code-usage distribution, per group,
        // summed across groups. Diagnostic only.
        let avg_probs = encodings.mean(1)?; // (G, M)
        let entropy = (&avg_probs * (&avg_probs + 1e-10)?.log()?)?.sum(1)?.neg()?;
        let perplexity = entropy.exp()?.sum_all()?.to_scalar::<f32>()?;

        // (G, B, L, D) -> (B, G, D, L) -> (B, C, L)
        let quantized = quantized
            .permute((1, 0, 3, 2))?
            .contiguous()?
            .reshape((b, c, l))?;

        debug!(
            perplexity = perplexity as f64,
            training, "quantized {} vectors across {} groups", n, g
        );

        Ok((quantized, commitment_loss, perplexity))
    }
}
