//! Structured negative sampling for the CPC loss
//!
//! Negatives are drawn within the same speaker only: a distractor may
//! come from another utterance, another time position, or both, but
//! never from another speaker. The utterance axis is drawn once per
//! (utterance, negative-slot) pair and shared across speakers and time;
//! the time axis is drawn per (speaker, utterance, slot, position) as a
//! nonzero offset added modulo the window length, so a sampled position
//! can never collide with the true future position. No rejection
//! sampling is needed.
//!
//! Index generation is plain host-side arithmetic, independent of the
//! tensor backend, so it is testable without touching candle's RNG.

use candle_core::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::error::{Result, VqcpcError};

/// Negative index set for one horizon
///
/// Dimensions: `s` speakers, `u` utterances per speaker, `n` negatives,
/// `t` window length.
#[derive(Debug, Clone)]
pub struct NegativeIndices {
    utterance: Vec<u32>, // (u, n) row-major, shared across speakers/time
    time: Vec<u32>,      // (s, u, n, t) row-major
    s: usize,
    u: usize,
    n: usize,
    t: usize,
}

impl NegativeIndices {
    /// Utterance drawn for `(utt, slot)`; identical for every speaker
    pub fn utterance_at(&self, utt: usize, slot: usize) -> u32 {
        self.utterance[utt * self.n + slot]
    }

    /// Time position drawn for `(spk, utt, slot, pos)`
    pub fn time_at(&self, spk: usize, utt: usize, slot: usize, pos: usize) -> u32 {
        self.time[((spk * self.u + utt) * self.n + slot) * self.t + pos]
    }

    /// (speakers, utterances, negatives, window length)
    pub fn dims(&self) -> (usize, usize, usize, usize) {
        (self.s, self.u, self.n, self.t)
    }

    /// Gather negative latents from the speaker-grouped target tensor.
    ///
    /// `z_shift` has shape (S, U, T', D); the result is (S, U, n, T', D)
    /// where entry (s, u, i, t, :) is `z_shift[s, utterance(u, i),
    /// time(s, u, i, t), :]`.
    pub fn gather(&self, z_shift: &Tensor) -> Result<Tensor> {
        let (s, u, t, d) = z_shift.dims4()?;
        if (s, u, t) != (self.s, self.u, self.t) {
            return Err(VqcpcError::shape(
                "negative_gather",
                format!(
                    "z_shift {:?} does not match sampled dims ({}, {}, {}, _)",
                    z_shift.dims(),
                    self.s,
                    self.u,
                    self.t
                ),
            ));
        }

        let flat = z_shift.reshape((s * u * t, d))?;
        let mut ids = Vec::with_capacity(s * u * self.n * t);
        for spk in 0..s {
            for utt in 0..u {
                for slot in 0..self.n {
                    let neg_utt = self.utterance_at(utt, slot) as usize;
                    for pos in 0..t {
                        let neg_t = self.time_at(spk, utt, slot, pos) as usize;
                        ids.push(((spk * u + neg_utt) * t + neg_t) as u32);
                    }
                }
            }
        }
        let ids = Tensor::from_vec(ids, s * u * self.n * t, z_shift.device())?;
        let negatives = flat.index_select(&ids, 0)?;
        Ok(negatives.reshape((s, u, self.n, t, d))?)
    }
}

/// Seeded sampler producing [`NegativeIndices`]
#[derive(Debug)]
pub struct NegativeSampler {
    rng: StdRng,
}

impl NegativeSampler {
    /// Create a sampler with a fixed seed
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Draw negative indices for `s` speakers, `u` utterances, window
    /// length `t` and `n` negatives per position. Sampling is with
    /// replacement, so `n` may exceed `u`. Requires `t >= 2`: with a
    /// single frame no time position differs from the target.
    pub fn sample(&mut self, s: usize, u: usize, t: usize, n: usize) -> Result<NegativeIndices> {
        if t < 2 {
            return Err(VqcpcError::sampling(format!(
                "window length must be at least 2 to sample a distinct time, got {t}"
            )));
        }
        if s == 0 || u == 0 || n == 0 {
            return Err(VqcpcError::sampling(format!(
                "speakers ({s}), utterances ({u}) and negatives ({n}) must be nonzero"
            )));
        }

        let utterance: Vec<u32> = (0..u * n)
            .map(|_| self.rng.gen_range(0..u as u32))
            .collect();

        // Nonzero offset plus modulo keeps the draw off the true position.
        let mut time = Vec::with_capacity(s * u * n * t);
        for _ in 0..s * u * n {
            for pos in 0..t as u32 {
                let offset = self.rng.gen_range(1..t as u32);
                time.push((pos + offset) % t as u32);
            }
        }

        Ok(NegativeIndices {
            utterance,
            time,
            s,
            u,
            n,
            t,
        })
    }
}
