//! Sinusoidal positional encoding
//!
//! Precomputed host-side table added to the context sequence before the
//! step predictors. Dropout is applied only under an explicit training
//! flag.

use candle_core::{Device, Tensor};
use candle_nn::Dropout;

use crate::core::error::{Result, VqcpcError};

/// Fixed sinusoidal positional encoding with dropout
#[derive(Debug, Clone)]
pub struct PositionalEncoding {
    pe: Tensor, // (max_len, d_model)
    dropout: Dropout,
    max_len: usize,
}

impl PositionalEncoding {
    /// Build the encoding table for sequences up to `max_len`
    pub fn new(d_model: usize, max_len: usize, dropout: f32, device: &Device) -> Result<Self> {
        let mut pe = vec![0f32; max_len * d_model];
        for pos in 0..max_len {
            for i in (0..d_model).step_by(2) {
                let div = (-(i as f64) * (10000f64).ln() / d_model as f64).exp();
                let angle = pos as f64 * div;
                pe[pos * d_model + i] = angle.sin() as f32;
                if i + 1 < d_model {
                    pe[pos * d_model + i + 1] = angle.cos() as f32;
                }
            }
        }
        let pe = Tensor::from_vec(pe, (max_len, d_model), device)?;
        Ok(Self {
            pe,
            dropout: Dropout::new(dropout),
            max_len,
        })
    }

    /// Add the encoding to `x` (B, T, d_model)
    pub fn forward(&self, x: &Tensor, training: bool) -> Result<Tensor> {
        let (_b, t, _d) = x.dims3()?;
        if t > self.max_len {
            return Err(VqcpcError::shape(
                "positional_encoding",
                format!("sequence length {t} exceeds max_len {}", self.max_len),
            ));
        }
        let pe = self.pe.narrow(0, 0, t)?.unsqueeze(0)?; // (1, T, d_model)
        let x = x.broadcast_add(&pe)?;
        Ok(self.dropout.forward(&x, training)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_values() {
        let device = Device::Cpu;
        let enc = PositionalEncoding::new(4, 8, 0.0, &device).unwrap();

        // Position 0 is [sin 0, cos 0, sin 0, cos 0] = [0, 1, 0, 1].
        let row0 = enc.pe.narrow(0, 0, 1).unwrap();
        let row0 = row0.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(row0, vec![0.0, 1.0, 0.0, 1.0]);

        // Position 1, dim 0 is sin(1).
        let row1 = enc.pe.narrow(0, 1, 1).unwrap();
        let row1 = row1.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!((row1[0] - 1f32.sin()).abs() < 1e-6);
        assert!((row1[1] - 1f32.cos()).abs() < 1e-6);
    }

    #[test]
    fn test_forward_adds_encoding() {
        let device = Device::Cpu;
        let enc = PositionalEncoding::new(4, 8, 0.1, &device).unwrap();
        let x = Tensor::zeros((2, 3, 4), candle_core::DType::F32, &device).unwrap();

        // Eval mode: dropout disabled, output equals the table rows.
        let out = enc.forward(&x, false).unwrap();
        let expected = enc.pe.narrow(0, 0, 3).unwrap();
        let out0 = out.narrow(0, 0, 1).unwrap().squeeze(0).unwrap();
        let diff = (out0 - expected)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_rejects_overlong_sequence() {
        let device = Device::Cpu;
        let enc = PositionalEncoding::new(4, 8, 0.0, &device).unwrap();
        let x = Tensor::zeros((1, 9, 4), candle_core::DType::F32, &device).unwrap();
        assert!(enc.forward(&x, false).is_err());
    }
}
