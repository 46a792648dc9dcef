//! End-to-end pipeline tests: quantize -> context -> contrastive loss
//!
//! The context network is out of scope, so the quantized sequence stands
//! in for the context (their dims match by construction).

use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use vqcpc::{CodebookState, CpcConfig, CpcLoss, VectorQuantizer, VqConfig, VqcpcConfig};

fn pipeline_config() -> VqcpcConfig {
    VqcpcConfig {
        quantizer: VqConfig {
            num_groups: 2,
            num_codes: 16,
            code_dim: 8,
            ..Default::default()
        },
        cpc: CpcConfig {
            n_speakers: 1,
            n_utterances_per_speaker: 2,
            n_prediction_steps: 2,
            n_negatives: 3,
            z_dim: 16,
            c_dim: 16,
            num_heads: 2,
            ff_dim: 32,
            max_len: 32,
            seed: 5,
            ..Default::default()
        },
    }
}

#[test]
fn test_full_pipeline() -> Result<()> {
    let config = pipeline_config();
    config.validate()?;
    let device = Device::Cpu;

    let quantizer = VectorQuantizer::new(config.quantizer.clone())?;
    let mut codebook = CodebookState::new(&config.quantizer, &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut cpc = CpcLoss::new(config.cpc.clone(), vb.pp("cpc"))?;

    // Encoder output: (B=2, C=16, L=12).
    let x = Tensor::randn(0.0f32, 1.0, (2, 16, 12), &device)?;
    let (z, commitment, perplexity) = quantizer.quantize(&mut codebook, &x, true)?;
    assert_eq!(z.dims(), &[2, 16, 12]);
    assert!(commitment.to_scalar::<f32>()? >= 0.0);
    assert!(perplexity >= 2.0 - 1e-4); // at least 1 per group
    assert!(perplexity <= 32.0 + 1e-4); // at most M per group

    // Hand the quantized sequence onward as (B, L, C).
    let z = z.transpose(1, 2)?.contiguous()?;
    let c = z.clone();

    let (loss, accuracies) = cpc.forward(&z, &c, true)?;
    let loss = loss.to_scalar::<f32>()?;
    assert!(loss >= 0.0 && loss.is_finite());
    assert_eq!(accuracies.len(), 2);
    for acc in accuracies {
        assert!((0.0..=1.0).contains(&acc));
    }
    Ok(())
}

#[test]
fn test_codebook_invariants_over_steps() -> Result<()> {
    let config = pipeline_config();
    let device = Device::Cpu;

    let quantizer = VectorQuantizer::new(config.quantizer.clone())?;
    let mut codebook = CodebookState::new(&config.quantizer, &device)?;

    for step in 0..4 {
        let x = Tensor::randn(0.0f32, 1.0, (2, 16, 12), &device)?;
        quantizer.quantize(&mut codebook, &x, true)?;

        // codebook == weight_sum / usage_count after every update.
        let reconciled = codebook
            .weight_sum()
            .broadcast_div(&codebook.usage_count().unsqueeze(2)?)?;
        let diff = (codebook.codebook() - reconciled)?
            .abs()?
            .max_all()?
            .to_scalar::<f32>()?;
        assert!(diff < 1e-5, "step {step}: reconciliation drift {diff}");

        // Laplace smoothing keeps every count strictly positive.
        let min_count = codebook.usage_count().min_all()?.to_scalar::<f32>()?;
        assert!(min_count > 0.0, "step {step}: count collapsed to zero");
    }
    Ok(())
}

#[test]
fn test_gradients_flow_to_encoder_and_predictors() -> Result<()> {
    // The straight-through estimator must route gradients around the
    // discrete assignment back to the encoder output.
    let config = pipeline_config();
    let device = Device::Cpu;

    let quantizer = VectorQuantizer::new(config.quantizer.clone())?;
    let mut codebook = CodebookState::new(&config.quantizer, &device)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let mut cpc = CpcLoss::new(config.cpc.clone(), vb.pp("cpc"))?;

    let x = candle_core::Var::randn(0.0f32, 1.0, (2, 16, 12), &device)?;
    let (z, commitment, _) = quantizer.quantize(&mut codebook, x.as_tensor(), true)?;
    let z = z.transpose(1, 2)?.contiguous()?;
    let c = z.clone();

    let (cpc_loss, _) = cpc.forward(&z, &c, true)?;
    let total = (cpc_loss + commitment)?;
    let grads = total.backward()?;

    let x_grad = grads
        .get(x.as_tensor())
        .expect("encoder input should receive gradient");
    let grad_norm = x_grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
    assert!(grad_norm > 0.0, "straight-through gradient vanished");

    // Predictor parameters are trainable Vars and must receive gradients.
    let vars = varmap.all_vars();
    assert!(!vars.is_empty());
    let touched = vars.iter().any(|v| grads.get(v.as_tensor()).is_some());
    assert!(touched, "no predictor parameter received gradient");
    Ok(())
}

#[test]
fn test_checkpoint_roundtrip_through_tensors() -> Result<()> {
    let config = pipeline_config();
    let device = Device::Cpu;

    let quantizer = VectorQuantizer::new(config.quantizer.clone())?;
    let mut codebook = CodebookState::new(&config.quantizer, &device)?;
    let x = Tensor::randn(0.0f32, 1.0, (2, 16, 12), &device)?;
    quantizer.quantize(&mut codebook, &x, true)?;

    // Persist through named tensors and rebuild.
    let tensors = codebook.to_tensors();
    let restored = CodebookState::from_tensors(
        tensors["codebook"].clone(),
        tensors["usage_count"].clone(),
        tensors["weight_sum"].clone(),
    )?;

    // The restored state quantizes identically in eval mode.
    let mut restored = restored;
    let probe = Tensor::randn(0.0f32, 1.0, (1, 16, 6), &device)?;
    let (a, _, _) = quantizer.quantize(&mut codebook, &probe, false)?;
    let (b, _, _) = quantizer.quantize(&mut restored, &probe, false)?;
    let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
    assert!(diff < 1e-6);
    Ok(())
}
