//! # vqcpc - Vector-Quantized Contrastive Predictive Coding
//!
//! Numerical core of a VQ-CPC speech representation model: a grouped
//! vector quantizer with an online EMA codebook, and a contrastive
//! predictive objective with structured within-speaker negative
//! sampling.
//!
//! ## Features
//!
//! - **Grouped EMA vector quantization**: nearest-neighbor assignment,
//!   Laplace-smoothed usage statistics, straight-through gradients,
//!   commitment loss and a perplexity diagnostic
//! - **CPC loss**: one causal step predictor per horizon, scaled
//!   dot-product scoring against sampled distractors, per-horizon
//!   accuracy reporting
//! - **Explicit training semantics**: codebook updates and dropout are
//!   gated on a per-call `training` flag, never on global mode
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use vqcpc::{CodebookState, CpcLoss, VectorQuantizer, VqcpcConfig};
//!
//! let config = VqcpcConfig::default();
//! let device = Device::Cpu;
//!
//! let quantizer = VectorQuantizer::new(config.quantizer.clone())?;
//! let mut codebook = CodebookState::new(&config.quantizer, &device)?;
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//! let mut cpc = CpcLoss::new(config.cpc.clone(), vb.pp("cpc"))?;
//!
//! // x: encoder output (B, C, L)
//! let (z, commitment, perplexity) = quantizer.quantize(&mut codebook, &x, true)?;
//! let z = z.transpose(1, 2)?; // (B, L, C) for the context network
//! // c: context network output, aligned with z
//! let (loss, accuracies) = cpc.forward(&z, &c, true)?;
//! ```
//!
//! The surrounding model (feature extractor, context network, training
//! loop, checkpointing) is out of scope; this crate exposes tensor-shaped
//! contracts for those collaborators.

pub mod config;
pub mod core;
pub mod models;

// Re-exports for convenience
pub use config::{CpcConfig, VqConfig, VqcpcConfig};
pub use crate::core::error::{Result, VqcpcError};
pub use models::cpc::{
    CausalMaskCache, CpcLoss, NegativeIndices, NegativeSampler, PositionalEncoding, StepPredictor,
};
pub use models::quantizer::{CodebookState, VectorQuantizer};
