// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Linear Algebra
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Linear algebra utilities.
//!
//! Cholesky factorization, pivoted LU solve and the matrix exponential.
//! Sized for the dense systems of the MPC (tens to a few hundred unknowns).

use ndarray::{Array1, Array2};
use tanks_types::error::{TankError, TankResult};

/// Taylor terms used by `expm` after scaling.
const EXPM_TAYLOR_TERMS: usize = 18;

/// `expm` scales the matrix until its ∞-norm is below this value.
const EXPM_SCALE_TARGET: f64 = 0.5;

/// Pivot magnitude below which LU declares the matrix singular.
const LU_PIVOT_EPS: f64 = 1e-300;

/// Maximum absolute row sum.
pub fn inf_norm(a: &Array2<f64>) -> f64 {
    a.rows()
        .into_iter()
        .map(|row| row.iter().map(|v| v.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Maximum absolute entry of a vector.
pub fn max_abs(v: &Array1<f64>) -> f64 {
    v.iter().fold(0.0, |m, x| m.max(x.abs()))
}

/// Lower-triangular Cholesky factor L with A = L·Lᵀ.
///
/// Only the lower triangle of `a` is read. Fails on a non-positive pivot.
pub fn cholesky(a: &Array2<f64>) -> TankResult<Array2<f64>> {
    let (n, m) = a.dim();
    if n != m {
        return Err(TankError::LinAlg(format!(
            "cholesky needs a square matrix, got {n}x{m}"
        )));
    }
    let mut l = Array2::zeros((n, n));
    for j in 0..n {
        let mut diag = a[[j, j]];
        for k in 0..j {
            diag -= l[[j, k]] * l[[j, k]];
        }
        if diag <= 0.0 || !diag.is_finite() {
            return Err(TankError::LinAlg(format!(
                "matrix not positive definite at pivot {j} (value {diag:e})"
            )));
        }
        let ljj = diag.sqrt();
        l[[j, j]] = ljj;
        for i in (j + 1)..n {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = sum / ljj;
        }
    }
    Ok(l)
}

/// Solve (L·Lᵀ)·x = b given the Cholesky factor L.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    // Forward: L·y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    // Backward: Lᵀ·x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solve A·x = b by Gaussian elimination with partial pivoting.
pub fn lu_solve(a: &Array2<f64>, b: &Array1<f64>) -> TankResult<Array1<f64>> {
    let (n, m) = a.dim();
    if n != m || b.len() != n {
        return Err(TankError::LinAlg(format!(
            "lu_solve dimension mismatch: A is {n}x{m}, b has {}",
            b.len()
        )));
    }
    let mut lu = a.clone();
    let mut x = b.clone();
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&i, &j| {
                lu[[i, col]]
                    .abs()
                    .partial_cmp(&lu[[j, col]].abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(col);
        if lu[[pivot_row, col]].abs() < LU_PIVOT_EPS || !lu[[pivot_row, col]].is_finite() {
            return Err(TankError::LinAlg(format!("singular matrix at column {col}")));
        }
        if pivot_row != col {
            for k in 0..n {
                lu.swap([col, k], [pivot_row, k]);
            }
            x.swap(col, pivot_row);
        }
        let pivot = lu[[col, col]];
        for row in (col + 1)..n {
            let factor = lu[[row, col]] / pivot;
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                lu[[row, k]] -= factor * lu[[col, k]];
            }
            x[row] -= factor * x[col];
        }
    }
    for i in (0..n).rev() {
        let mut sum = x[i];
        for k in (i + 1)..n {
            sum -= lu[[i, k]] * x[k];
        }
        x[i] = sum / lu[[i, i]];
    }
    Ok(x)
}

/// Matrix exponential e^A by scaling and squaring with a truncated Taylor series.
pub fn expm(a: &Array2<f64>) -> TankResult<Array2<f64>> {
    let (n, m) = a.dim();
    if n != m {
        return Err(TankError::LinAlg(format!(
            "expm needs a square matrix, got {n}x{m}"
        )));
    }
    let norm = inf_norm(a);
    if !norm.is_finite() {
        return Err(TankError::LinAlg("expm input is not finite".to_string()));
    }
    let mut squarings = 0u32;
    let mut scaled_norm = norm;
    while scaled_norm > EXPM_SCALE_TARGET {
        scaled_norm /= 2.0;
        squarings += 1;
    }
    let scaled = a / 2f64.powi(squarings as i32);

    let mut result = Array2::eye(n);
    let mut term = Array2::eye(n);
    for k in 1..=EXPM_TAYLOR_TERMS {
        term = term.dot(&scaled) / k as f64;
        result = result + &term;
    }
    for _ in 0..squarings {
        result = result.dot(&result);
    }
    Ok(result)
}
