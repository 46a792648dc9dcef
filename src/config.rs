//! Model configuration
//!
//! Configuration structures for the vector quantizer and the CPC loss.
//! Shape-level constraints are checked once in `validate`; every invalid
//! combination is a fatal configuration error, never a runtime surprise
//! inside a tensor op.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{Result, VqcpcError};

fn default_commitment_cost() -> f64 {
    0.25
}

fn default_decay() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-5
}

fn default_num_heads() -> usize {
    8
}

fn default_ff_dim() -> usize {
    2048
}

fn default_dropout() -> f32 {
    0.1
}

fn default_max_len() -> usize {
    200
}

fn default_seed() -> u64 {
    42
}

/// Vector quantizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VqConfig {
    /// Number of independent latent groups (G)
    pub num_groups: usize,
    /// Codebook entries per group (M)
    pub num_codes: usize,
    /// Embedding dimension per group (D)
    pub code_dim: usize,
    /// Weight of the commitment term in the quantizer loss
    #[serde(default = "default_commitment_cost")]
    pub commitment_cost: f64,
    /// EMA decay for the codebook statistics
    #[serde(default = "default_decay")]
    pub decay: f64,
    /// Laplace smoothing epsilon for the usage counts
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
}

impl Default for VqConfig {
    fn default() -> Self {
        Self {
            num_groups: 2,
            num_codes: 128,
            code_dim: 128,
            commitment_cost: default_commitment_cost(),
            decay: default_decay(),
            epsilon: default_epsilon(),
        }
    }
}

impl VqConfig {
    /// Channel count the quantizer expects on its input (G * D)
    pub fn channels(&self) -> usize {
        self.num_groups * self.code_dim
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.num_groups == 0 || self.num_codes == 0 || self.code_dim == 0 {
            return Err(VqcpcError::config(
                "num_groups, num_codes and code_dim must all be nonzero",
            ));
        }
        if !(0.0 < self.decay && self.decay < 1.0) {
            return Err(VqcpcError::config(format!(
                "decay must be in (0, 1), got {}",
                self.decay
            )));
        }
        if self.epsilon <= 0.0 {
            return Err(VqcpcError::config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.commitment_cost < 0.0 {
            return Err(VqcpcError::config(format!(
                "commitment_cost must be non-negative, got {}",
                self.commitment_cost
            )));
        }
        Ok(())
    }
}

/// CPC loss configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpcConfig {
    /// Speakers per batch (S)
    pub n_speakers: usize,
    /// Utterances per speaker (U)
    pub n_utterances_per_speaker: usize,
    /// Prediction horizons (K)
    pub n_prediction_steps: usize,
    /// Distractors per position
    pub n_negatives: usize,
    /// Latent dimension of the quantized sequence
    pub z_dim: usize,
    /// Context dimension produced by the context network
    pub c_dim: usize,
    /// Attention heads in each step predictor
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    /// Feed-forward width in each step predictor
    #[serde(default = "default_ff_dim")]
    pub ff_dim: usize,
    /// Dropout applied after the positional encoding (training only)
    #[serde(default = "default_dropout")]
    pub dropout: f32,
    /// Maximum context length supported by the positional table
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    /// Seed for the negative sampler RNG
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for CpcConfig {
    fn default() -> Self {
        Self {
            n_speakers: 8,
            n_utterances_per_speaker: 8,
            n_prediction_steps: 6,
            n_negatives: 17,
            z_dim: 256,
            c_dim: 256,
            num_heads: default_num_heads(),
            ff_dim: default_ff_dim(),
            dropout: default_dropout(),
            max_len: default_max_len(),
            seed: default_seed(),
        }
    }
}

impl CpcConfig {
    /// Batch size the loss expects (S * U)
    pub fn batch_size(&self) -> usize {
        self.n_speakers * self.n_utterances_per_speaker
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.n_speakers == 0 || self.n_utterances_per_speaker == 0 {
            return Err(VqcpcError::config(
                "n_speakers and n_utterances_per_speaker must be nonzero",
            ));
        }
        if self.n_prediction_steps == 0 {
            return Err(VqcpcError::config("n_prediction_steps must be at least 1"));
        }
        if self.n_negatives == 0 {
            return Err(VqcpcError::config("n_negatives must be at least 1"));
        }
        if self.c_dim != self.z_dim {
            // The step predictors operate in z_dim, so the context network
            // must emit vectors of the same width.
            return Err(VqcpcError::config(format!(
                "c_dim ({}) must equal z_dim ({})",
                self.c_dim, self.z_dim
            )));
        }
        if self.z_dim % self.num_heads != 0 {
            return Err(VqcpcError::config(format!(
                "z_dim ({}) must be divisible by num_heads ({})",
                self.z_dim, self.num_heads
            )));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(VqcpcError::config(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        Ok(())
    }
}

/// Top-level configuration combining both subsystems
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VqcpcConfig {
    /// Vector quantizer settings
    pub quantizer: VqConfig,
    /// CPC loss settings
    pub cpc: CpcConfig,
}

impl VqcpcConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate().map_err(|e| {
            VqcpcError::config_with_path(e.to_string(), path)
        })?;
        Ok(config)
    }

    /// Validate both sections
    pub fn validate(&self) -> Result<()> {
        self.quantizer.validate()?;
        self.cpc.validate()?;
        if self.quantizer.channels() != self.cpc.z_dim {
            return Err(VqcpcError::config(format!(
                "quantizer output channels ({}) must equal cpc z_dim ({})",
                self.quantizer.channels(),
                self.cpc.z_dim
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = VqcpcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantizer.channels(), 256);
        assert_eq!(config.cpc.batch_size(), 64);
    }

    #[test]
    fn test_rejects_mismatched_dims() {
        let mut config = CpcConfig::default();
        config.c_dim = 128;
        assert!(config.validate().is_err());

        let mut config = CpcConfig::default();
        config.z_dim = 250; // not divisible by 8 heads
        config.c_dim = 250;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_decay() {
        let mut config = VqConfig::default();
        config.decay = 1.0;
        assert!(config.validate().is_err());
        config.decay = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_with_defaults() {
        // Omitted fields fall back to their serde defaults.
        let json = r#"{
            "quantizer": { "num_groups": 2, "num_codes": 64, "code_dim": 32 },
            "cpc": {
                "n_speakers": 4, "n_utterances_per_speaker": 2,
                "n_prediction_steps": 3, "n_negatives": 9,
                "z_dim": 64, "c_dim": 64
            }
        }"#;
        let config: VqcpcConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.quantizer.decay, 0.999);
        assert_eq!(config.cpc.num_heads, 8);
        assert_eq!(config.cpc.seed, 42);
    }
}
