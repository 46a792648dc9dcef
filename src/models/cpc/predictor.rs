//! Step predictors and the causal mask cache
//!
//! Each prediction horizon owns one self-attention encoder layer:
//! multi-head attention under a causal mask, a ReLU feed-forward block,
//! and post-norm residual connections. The layers are opaque learned
//! transforms; the only fixed contracts are the causal mask (position i
//! attends to j iff j <= i) and the (B, T, d_model) shape.
//!
//! Masks depend only on the sequence length, so they are memoized in an
//! explicit map keyed by length. Mixing sequence lengths across calls is
//! legal and correct.

use std::collections::HashMap;

use candle_core::{Device, Module, Tensor, D};
use candle_nn::ops::{layer_norm_slow, softmax};
use candle_nn::{layer_norm, linear, LayerNorm, Linear, VarBuilder};

use crate::core::error::Result;

const LN_EPS: f64 = 1e-5;

/// Layer-norm forward through the differentiable reference path.
///
/// `LayerNorm::forward` routes contiguous inputs with a bias to a fused
/// kernel applied via `apply_op3_no_bwd`, which records no backward graph
/// and silently stops gradients. The predictors are trained by
/// backpropagation, so the norms must use the decomposed implementation;
/// `layer_norm_slow` computes the identical function from primitive ops.
fn norm_forward(norm: &LayerNorm, x: &Tensor) -> Result<Tensor> {
    match norm.bias() {
        Some(bias) => Ok(layer_norm_slow(x, norm.weight(), bias, LN_EPS as f32)?),
        // Without a bias LayerNorm::forward already takes the
        // differentiable path.
        None => Ok(norm.forward(x)?),
    }
}

/// Additive causal mask cache keyed by sequence length
#[derive(Debug, Default)]
pub struct CausalMaskCache {
    masks: HashMap<usize, Tensor>,
}

impl CausalMaskCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or build) the (T, T) additive mask for `seq_len`:
    /// zero on and below the diagonal, -inf above.
    pub fn get(&mut self, seq_len: usize, device: &Device) -> Result<Tensor> {
        if let Some(mask) = self.masks.get(&seq_len) {
            return Ok(mask.clone());
        }
        let mut data = vec![0f32; seq_len * seq_len];
        for i in 0..seq_len {
            for j in (i + 1)..seq_len {
                data[i * seq_len + j] = f32::NEG_INFINITY;
            }
        }
        let mask = Tensor::from_vec(data, (seq_len, seq_len), device)?;
        self.masks.insert(seq_len, mask.clone());
        Ok(mask)
    }

    /// Number of distinct lengths cached so far
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// One-layer transformer encoder used as a step-ahead predictor
#[derive(Debug, Clone)]
pub struct StepPredictor {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    ff1: Linear,
    ff2: Linear,
    norm1: LayerNorm,
    norm2: LayerNorm,
    num_heads: usize,
    head_dim: usize,
}

impl StepPredictor {
    /// Build a predictor layer, registering parameters under `vb`
    pub fn new(d_model: usize, num_heads: usize, ff_dim: usize, vb: VarBuilder) -> Result<Self> {
        let query = linear(d_model, d_model, vb.pp("attn.query"))?;
        let key = linear(d_model, d_model, vb.pp("attn.key"))?;
        let value = linear(d_model, d_model, vb.pp("attn.value"))?;
        let output = linear(d_model, d_model, vb.pp("attn.output"))?;
        let ff1 = linear(d_model, ff_dim, vb.pp("ff1"))?;
        let ff2 = linear(ff_dim, d_model, vb.pp("ff2"))?;
        let norm1 = layer_norm(d_model, LN_EPS, vb.pp("norm1"))?;
        let norm2 = layer_norm(d_model, LN_EPS, vb.pp("norm2"))?;
        Ok(Self {
            query,
            key,
            value,
            output,
            ff1,
            ff2,
            num_heads,
            head_dim: d_model / num_heads,
            norm1,
            norm2,
        })
    }

    /// Predict the future-latent sequence from the context (B, T, d_model)
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let attn = self.attention(x, mask)?;
        let x = norm_forward(&self.norm1, &(x + attn)?)?;
        let ff = self.ff2.forward(&self.ff1.forward(&x)?.relu()?)?;
        norm_forward(&self.norm2, &(x + ff)?)
    }

    fn attention(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;

        let query = self
            .query
            .forward(x)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let key = self
            .key
            .forward(x)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let value = self
            .value
            .forward(x)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let scale = (self.head_dim as f64).sqrt();
        let key_t = key.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let scores = (query.matmul(&key_t)? / scale)?;
        // (T, T) mask broadcasts over (B, heads, T, T).
        let scores = scores.broadcast_add(mask)?;
        let weights = softmax(&scores, D::Minus1)?;

        let attn = weights.matmul(&value)?;
        let attn = attn
            .transpose(1, 2)?
            .contiguous()?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        Ok(self.output.forward(&attn)?)
    }
}
