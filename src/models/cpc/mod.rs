//! Contrastive predictive coding
//!
//! - `positional`: sinusoidal positional encoding for the context
//! - `predictor`: per-horizon step predictors and the causal mask cache
//! - `negatives`: structured within-speaker negative sampling
//! - `loss`: the contrastive loss orchestrating all of the above

pub mod loss;
pub mod negatives;
pub mod positional;
pub mod predictor;

pub use loss::CpcLoss;
pub use negatives::{NegativeIndices, NegativeSampler};
pub use positional::PositionalEncoding;
pub use predictor::{CausalMaskCache, StepPredictor};
