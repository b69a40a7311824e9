// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Discretization
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Zero-order-hold discretization of continuous LTI models.
//!
//! For dx/dt = A·x + B·u with u held over [kT, (k+1)T):
//!   x[k+1] = Ad·x[k] + Bd·u[k],  Ad = e^{AT},  Bd = ∫₀ᵀ e^{Aτ} dτ · B
//!
//! Both blocks come out of one exponential of the augmented matrix
//!   exp([[A, B], [0, 0]]·T) = [[Ad, Bd], [0, I]].

use crate::linalg::expm;
use ndarray::{s, Array1, Array2};
use tanks_types::error::{TankError, TankResult};

/// Discrete-time linear model x[k+1] = Ad·x[k] + Bd·u[k].
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteModel {
    pub ad: Array2<f64>,
    pub bd: Array2<f64>,
    /// Sample period T [s].
    pub sample_time: f64,
}

impl DiscreteModel {
    pub fn n_states(&self) -> usize {
        self.ad.nrows()
    }

    pub fn n_inputs(&self) -> usize {
        self.bd.ncols()
    }

    /// One-step prediction.
    pub fn predict(&self, x: &Array1<f64>, u: &Array1<f64>) -> Array1<f64> {
        self.ad.dot(x) + self.bd.dot(u)
    }
}

/// Select rows/cols of a matrix by index.
pub fn select(m: &Array2<f64>, rows: &[usize], cols: &[usize]) -> TankResult<Array2<f64>> {
    let (nr, nc) = m.dim();
    if let Some(&r) = rows.iter().find(|&&r| r >= nr) {
        return Err(TankError::InvalidArgument(format!(
            "row index {r} out of range for {nr} rows"
        )));
    }
    if let Some(&c) = cols.iter().find(|&&c| c >= nc) {
        return Err(TankError::InvalidArgument(format!(
            "column index {c} out of range for {nc} columns"
        )));
    }
    Ok(Array2::from_shape_fn((rows.len(), cols.len()), |(i, j)| {
        m[[rows[i], cols[j]]]
    }))
}

/// Zero-order-hold discretization of (A, B) at sample period `sample_time`.
pub fn zoh(a: &Array2<f64>, b: &Array2<f64>, sample_time: f64) -> TankResult<DiscreteModel> {
    let n = a.nrows();
    if a.ncols() != n {
        return Err(TankError::InvalidArgument(format!(
            "A must be square, got {}x{}",
            n,
            a.ncols()
        )));
    }
    if b.nrows() != n {
        return Err(TankError::InvalidArgument(format!(
            "B must have {n} rows, got {}",
            b.nrows()
        )));
    }
    if !sample_time.is_finite() || sample_time <= 0.0 {
        return Err(TankError::InvalidArgument(format!(
            "sample time must be > 0, got {sample_time}"
        )));
    }
    let m = b.ncols();

    let mut aug = Array2::zeros((n + m, n + m));
    aug.slice_mut(s![..n, ..n]).assign(&(a * sample_time));
    aug.slice_mut(s![..n, n..]).assign(&(b * sample_time));
    let e = expm(&aug)?;

    Ok(DiscreteModel {
        ad: e.slice(s![..n, ..n]).to_owned(),
        bd: e.slice(s![..n, n..]).to_owned(),
        sample_time,
    })
}
