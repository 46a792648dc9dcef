//! Numerical model components
//!
//! - Vector quantization with an online EMA codebook
//! - Contrastive predictive coding loss with structured negatives

pub mod cpc;
pub mod quantizer;

// Re-exports for convenient access
pub use cpc::{CpcLoss, NegativeSampler};
pub use quantizer::{CodebookState, VectorQuantizer};
