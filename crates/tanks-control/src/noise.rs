// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Measurement Noise
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Multiplicative Gaussian sensor noise: y = x + N(0, (level·|x|)²),
//! clamped back into the physical bounds of each state.

use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tanks_types::constants::N_STATES;
use tanks_types::error::{TankError, TankResult};

pub struct MeasurementNoise {
    level: f64,
    bounds: [[f64; 2]; N_STATES],
    rng: StdRng,
}

impl MeasurementNoise {
    /// `seed = None` draws from OS entropy.
    pub fn new(level: f64, bounds: [[f64; 2]; N_STATES], seed: Option<u64>) -> TankResult<Self> {
        if !level.is_finite() || level < 0.0 {
            return Err(TankError::InvalidArgument(format!(
                "noise level must be finite and >= 0, got {level}"
            )));
        }
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(MeasurementNoise { level, bounds, rng })
    }

    pub fn level(&self) -> f64 {
        self.level
    }

    /// Noisy copy of an 8-state vector.
    pub fn apply(&mut self, state: &Array1<f64>) -> Array1<f64> {
        let mut out = state.clone();
        for (i, v) in out.iter_mut().enumerate() {
            let sigma = self.level * v.abs();
            if sigma > 0.0 {
                *v += self.rng.sample::<f64, _>(StandardNormal) * sigma;
            }
            if let Some([lo, hi]) = self.bounds.get(i) {
                *v = v.clamp(*lo, *hi);
            }
        }
        out
    }
}
