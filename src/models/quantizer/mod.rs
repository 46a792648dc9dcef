//! Vector quantization with an online EMA codebook
//!
//! - `codebook`: persistent codebook state and its EMA update
//! - `vq`: grouped nearest-neighbor quantizer with straight-through output

pub mod codebook;
pub mod vq;

pub use codebook::CodebookState;
pub use vq::VectorQuantizer;
