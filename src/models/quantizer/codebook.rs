//! EMA codebook state
//!
//! Holds the learned codebook together with the running statistics that
//! drive its online k-means style update: per-code usage counts and
//! per-code accumulated weight sums, both exponential moving averages.
//! The codebook is never touched by a gradient step; it is reconciled
//! from the statistics after every training update.
//!
//! All three tensors are learned state and must travel with any model
//! checkpoint, since the codebook alone does not determine the EMA
//! statistics.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{safetensors, DType, Device, Tensor};
use candle_nn::VarBuilder;

use crate::config::VqConfig;
use crate::core::error::{Result, VqcpcError};

/// Mutable codebook state for one grouped quantizer
///
/// Shapes: `codebook` (G, M, D), `usage_count` (G, M), `weight_sum`
/// (G, M, D). Invariant after every training update:
/// `codebook[g, m, :] == weight_sum[g, m, :] / usage_count[g, m]`.
#[derive(Debug, Clone)]
pub struct CodebookState {
    codebook: Tensor,
    usage_count: Tensor,
    weight_sum: Tensor,
}

impl CodebookState {
    /// Initialize a fresh state: codebook uniform in [-1/M, 1/M],
    /// counts zero, weight sums equal to the codebook.
    pub fn new(config: &VqConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let (g, m, d) = (config.num_groups, config.num_codes, config.code_dim);
        let bound = 1.0 / m as f64;
        let codebook = Tensor::rand(-bound as f32, bound as f32, (g, m, d), device)?;
        let usage_count = Tensor::zeros((g, m), DType::F32, device)?;
        let weight_sum = codebook.clone();
        Ok(Self {
            codebook,
            usage_count,
            weight_sum,
        })
    }

    /// Load state from a checkpoint via VarBuilder
    pub fn load(vb: VarBuilder, config: &VqConfig) -> Result<Self> {
        let (g, m, d) = (config.num_groups, config.num_codes, config.code_dim);
        let codebook = vb.get((g, m, d), "codebook")?;
        let usage_count = vb.get((g, m), "usage_count")?;
        let weight_sum = vb.get((g, m, d), "weight_sum")?;
        Ok(Self {
            codebook,
            usage_count,
            weight_sum,
        })
    }

    /// Rebuild state from raw tensors, checking shape consistency
    pub fn from_tensors(codebook: Tensor, usage_count: Tensor, weight_sum: Tensor) -> Result<Self> {
        let (g, m, d) = codebook.dims3()?;
        if usage_count.dims2()? != (g, m) {
            return Err(VqcpcError::shape(
                "codebook_state",
                format!(
                    "usage_count {:?} does not match codebook ({g}, {m}, {d})",
                    usage_count.dims()
                ),
            ));
        }
        if weight_sum.dims3()? != (g, m, d) {
            return Err(VqcpcError::shape(
                "codebook_state",
                format!(
                    "weight_sum {:?} does not match codebook ({g}, {m}, {d})",
                    weight_sum.dims()
                ),
            ));
        }
        Ok(Self {
            codebook,
            usage_count,
            weight_sum,
        })
    }

    /// Current codebook (G, M, D)
    pub fn codebook(&self) -> &Tensor {
        &self.codebook
    }

    /// EMA usage counts (G, M)
    pub fn usage_count(&self) -> &Tensor {
        &self.usage_count
    }

    /// EMA weight sums (G, M, D)
    pub fn weight_sum(&self) -> &Tensor {
        &self.weight_sum
    }

    /// Named tensors for checkpointing
    pub fn to_tensors(&self) -> HashMap<String, Tensor> {
        HashMap::from([
            ("codebook".to_string(), self.codebook.clone()),
            ("usage_count".to_string(), self.usage_count.clone()),
            ("weight_sum".to_string(), self.weight_sum.clone()),
        ])
    }

    /// Save the state to a safetensors file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        safetensors::save(&self.to_tensors(), path)?;
        Ok(())
    }

    /// One EMA update step from this batch's assignments.
    ///
    /// `encodings` is the one-hot assignment matrix (G, N, M) and `x_flat`
    /// the detached input vectors (G, N, D). Laplace smoothing keeps every
    /// count strictly positive while preserving the per-group total, so no
    /// code can collapse to zero usage and the reconciling division stays
    /// finite.
    pub(crate) fn ema_update(
        &mut self,
        encodings: &Tensor,
        x_flat: &Tensor,
        decay: f64,
        epsilon: f64,
    ) -> Result<()> {
        let (_g, m, _d) = self.codebook.dims3()?;

        let counts = encodings.sum(1)?; // (G, M)
        self.usage_count = ((&self.usage_count * decay)? + (counts * (1.0 - decay))?)?;

        // Laplace smoothing, renormalized to keep the per-group mass.
        let total = self.usage_count.sum_keepdim(1)?; // (G, 1)
        self.usage_count = (&self.usage_count + epsilon)?
            .broadcast_div(&(&total + m as f64 * epsilon)?)?
            .broadcast_mul(&total)?;

        let dw = encodings.transpose(1, 2)?.contiguous()?.matmul(x_flat)?; // (G, M, D)
        self.weight_sum = ((&self.weight_sum * decay)? + (dw * (1.0 - decay))?)?;

        self.codebook = self
            .weight_sum
            .broadcast_div(&self.usage_count.unsqueeze(2)?)?;
        Ok(())
    }
}
