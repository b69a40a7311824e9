// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Quadratic Programming
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Dense convex quadratic programming.
//!
//! Problem form:
//!   minimize   ½ xᵀ H x + cᵀ x
//!   subject to G x ≤ h
//!
//! `QpSolver` is the seam the controllers depend on. `InteriorPointSolver`
//! implements it with Mehrotra's predictor–corrector primal–dual method on
//! the normal equations (H + Gᵀ W G) Δx = rhs, W = diag(z / s).
//!
//! The problem is Ruiz-equilibrated before the iteration starts, so the
//! stopping test compares each residual against the scaled data it is built
//! from. Once the iterate is primal feasible with small complementarity, the
//! active set is read off (z > s) and the equality-constrained KKT system on
//! it is solved directly; the polished point is kept when it stays feasible
//! with non-negative multipliers.

use crate::linalg::{cholesky, cholesky_solve, lu_solve, max_abs};
use ndarray::{Array1, Array2};
use tanks_types::error::{TankError, TankResult};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 200;

/// Default tolerance on scaled residuals and pairwise complementarity.
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

/// Fraction of the distance to the boundary taken per step.
const STEP_FRACTION: f64 = 0.99;

/// Per-entry relative diagonal regularization of the normal equations.
const REGULARIZATION: f64 = 1e-12;

/// Thresholds for the Farkas infeasibility certificate on normalized z.
const CERT_DUAL_TOL: f64 = 1e-9;
const CERT_GAP_TOL: f64 = 1e-6;

/// Ruiz equilibration passes.
const EQUILIBRATION_PASSES: usize = 10;

/// Multiplier-block regularization of the polishing KKT system.
const POLISH_REGULARIZATION: f64 = 1e-12;

/// Iterative refinement passes of the polishing solve.
const POLISH_REFINEMENT_PASSES: usize = 3;

/// Relative feasibility and multiplier-sign slack accepted after polishing.
const POLISH_TOL: f64 = 1e-9;

/// Dense QP: min ½xᵀHx + cᵀx  s.t.  Gx ≤ h.
#[derive(Debug, Clone)]
pub struct QpProblem {
    /// H (n×n), symmetric positive semidefinite.
    pub hessian: Array2<f64>,
    /// c (n).
    pub linear: Array1<f64>,
    /// G (m×n).
    pub constraints: Array2<f64>,
    /// h (m).
    pub bounds: Array1<f64>,
}

impl QpProblem {
    pub fn new(
        hessian: Array2<f64>,
        linear: Array1<f64>,
        constraints: Array2<f64>,
        bounds: Array1<f64>,
    ) -> TankResult<Self> {
        let n = linear.len();
        if hessian.dim() != (n, n) {
            return Err(TankError::InvalidArgument(format!(
                "hessian must be {n}x{n}, got {:?}",
                hessian.dim()
            )));
        }
        if constraints.ncols() != n || constraints.nrows() != bounds.len() {
            return Err(TankError::InvalidArgument(format!(
                "constraints must be {}x{n}, got {:?}",
                bounds.len(),
                constraints.dim()
            )));
        }
        let finite = hessian
            .iter()
            .chain(linear.iter())
            .chain(constraints.iter())
            .chain(bounds.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(TankError::InvalidArgument(
                "QP data contains non-finite values".to_string(),
            ));
        }
        Ok(QpProblem {
            hessian,
            linear,
            constraints,
            bounds,
        })
    }

    pub fn n_vars(&self) -> usize {
        self.linear.len()
    }

    pub fn n_constraints(&self) -> usize {
        self.bounds.len()
    }

    /// ½xᵀHx + cᵀx
    pub fn objective(&self, x: &Array1<f64>) -> f64 {
        0.5 * x.dot(&self.hessian.dot(x)) + self.linear.dot(x)
    }

    /// Largest positive entry of Gx − h (0 when feasible).
    pub fn max_violation(&self, x: &Array1<f64>) -> f64 {
        (self.constraints.dot(x) - &self.bounds)
            .iter()
            .fold(0.0, |m, v| m.max(*v))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpStatus {
    Optimal,
    MaxIterations,
    Infeasible,
    NumericalError,
}

#[derive(Debug, Clone)]
pub struct QpSolution {
    pub status: QpStatus,
    /// Last iterate; only meaningful when `status == Optimal`.
    pub x: Array1<f64>,
    pub iterations: usize,
    pub objective: f64,
}

impl QpSolution {
    pub fn is_optimal(&self) -> bool {
        self.status == QpStatus::Optimal
    }
}

/// Convex QP backend.
///
/// `Err` is reserved for malformed input; solver trouble is reported
/// through `QpSolution::status`.
pub trait QpSolver {
    fn solve(&self, problem: &QpProblem) -> TankResult<QpSolution>;
}

/// Mehrotra predictor–corrector interior-point solver.
#[derive(Debug, Clone)]
pub struct InteriorPointSolver {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl Default for InteriorPointSolver {
    fn default() -> Self {
        InteriorPointSolver {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Row-sparse copy of G; MPC constraint rows touch few variables.
struct SparseRows {
    rows: Vec<Vec<(usize, f64)>>,
    n: usize,
}

impl SparseRows {
    fn from_dense(g: &Array2<f64>) -> Self {
        let rows = g
            .rows()
            .into_iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .filter(|(_, v)| **v != 0.0)
                    .map(|(j, v)| (j, *v))
                    .collect()
            })
            .collect();
        SparseRows { rows, n: g.ncols() }
    }

    /// G·x
    fn mul(&self, x: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(
            self.rows
                .iter()
                .map(|row| row.iter().map(|&(j, v)| v * x[j]).sum::<f64>()),
        )
    }

    /// Gᵀ·y
    fn mul_t(&self, y: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.n);
        for (row, &yi) in self.rows.iter().zip(y.iter()) {
            if yi == 0.0 {
                continue;
            }
            for &(j, v) in row {
                out[j] += v * yi;
            }
        }
        out
    }

    /// H + Gᵀ·diag(w)·G
    fn normal_matrix(&self, h: &Array2<f64>, w: &Array1<f64>) -> Array2<f64> {
        let mut k = h.clone();
        for (row, &wi) in self.rows.iter().zip(w.iter()) {
            for &(a, va) in row {
                let scaled = wi * va;
                for &(b, vb) in row {
                    k[[a, b]] += scaled * vb;
                }
            }
        }
        k
    }
}

/// Equilibrated copy of a problem: H̄ = DHD, c̄ = Dc, Ḡ = EGD, h̄ = Eh.
/// Original variables are recovered as x = D x̄.
struct Scaled {
    hessian: Array2<f64>,
    linear: Array1<f64>,
    g: SparseRows,
    bounds: Array1<f64>,
    columns: Array1<f64>,
}

impl Scaled {
    fn equilibrate(problem: &QpProblem) -> Self {
        let n = problem.n_vars();
        let m = problem.n_constraints();
        let mut hessian = problem.hessian.clone();
        let mut linear = problem.linear.clone();
        let mut constraints = problem.constraints.clone();
        let mut bounds = problem.bounds.clone();
        let mut columns = Array1::<f64>::ones(n);
        let inv_sqrt = |v: f64| if v > 0.0 { 1.0 / v.sqrt() } else { 1.0 };

        for _ in 0..EQUILIBRATION_PASSES {
            let d = Array1::from_iter((0..n).map(|j| {
                let h_col = hessian.column(j).iter().fold(0.0_f64, |a, v| a.max(v.abs()));
                let g_col = constraints.column(j).iter().fold(0.0_f64, |a, v| a.max(v.abs()));
                inv_sqrt(h_col.max(g_col))
            }));
            let e = Array1::from_iter((0..m).map(|i| {
                inv_sqrt(constraints.row(i).iter().fold(0.0_f64, |a, v| a.max(v.abs())))
            }));
            for ((i, j), v) in hessian.indexed_iter_mut() {
                *v *= d[i] * d[j];
            }
            for ((i, j), v) in constraints.indexed_iter_mut() {
                *v *= e[i] * d[j];
            }
            linear *= &d;
            bounds *= &e;
            columns *= &d;
        }

        Scaled {
            hessian,
            linear,
            g: SparseRows::from_dense(&constraints),
            bounds,
            columns,
        }
    }

    fn unscale(&self, x: &Array1<f64>) -> Array1<f64> {
        x * &self.columns
    }

    /// Solve the KKT system of the active rows {i : zᵢ > sᵢ}
    ///   [ H̄   Āᵀ ] [x]   [−c̄]
    ///   [ Ā  −δI ] [λ] = [ h̄_A]
    /// and keep the point only if it is feasible with λ ≥ 0.
    fn polish(&self, s: &Array1<f64>, z: &Array1<f64>) -> Option<Array1<f64>> {
        let n = self.linear.len();
        let active: Vec<usize> = (0..s.len()).filter(|&i| z[i] > s[i]).collect();
        let size = n + active.len();
        let mut kkt = Array2::<f64>::zeros((size, size));
        let mut rhs = Array1::<f64>::zeros(size);
        kkt.slice_mut(ndarray::s![..n, ..n]).assign(&self.hessian);
        rhs.slice_mut(ndarray::s![..n]).assign(&(-&self.linear));
        for (a, &row) in active.iter().enumerate() {
            for &(j, v) in &self.g.rows[row] {
                kkt[[n + a, j]] = v;
                kkt[[j, n + a]] = v;
            }
            kkt[[n + a, n + a]] = -POLISH_REGULARIZATION;
            rhs[n + a] = self.bounds[row];
        }

        // Refine against the unregularized system so δ does not leak into
        // the active rows.
        let mut exact = kkt.clone();
        for a in 0..active.len() {
            exact[[n + a, n + a]] = 0.0;
        }
        let mut solution = lu_solve(&kkt, &rhs).ok()?;
        for _ in 0..POLISH_REFINEMENT_PASSES {
            let residual = &rhs - &exact.dot(&solution);
            solution = solution + lu_solve(&kkt, &residual).ok()?;
        }
        if solution.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let x = solution.slice(ndarray::s![..n]).to_owned();
        let feasible_tol = POLISH_TOL * (1.0 + max_abs(&self.bounds));
        let feasible = (self.g.mul(&x) - &self.bounds)
            .iter()
            .all(|v| *v <= feasible_tol);
        let sign_tol = POLISH_TOL * (1.0 + max_abs(z));
        let dual_sign = solution.iter().skip(n).all(|l| *l >= -sign_tol);
        (feasible && dual_sign).then_some(x)
    }
}

enum Factor {
    Cholesky(Array2<f64>),
    Dense(Array2<f64>),
}

impl Factor {
    fn new(mut k: Array2<f64>) -> Self {
        for i in 0..k.nrows() {
            let d = k[[i, i]].abs().max(1.0);
            k[[i, i]] += REGULARIZATION * d;
        }
        match cholesky(&k) {
            Ok(l) => Factor::Cholesky(l),
            Err(_) => Factor::Dense(k),
        }
    }

    fn solve(&self, rhs: &Array1<f64>) -> TankResult<Array1<f64>> {
        match self {
            Factor::Cholesky(l) => Ok(cholesky_solve(l, rhs)),
            Factor::Dense(k) => lu_solve(k, rhs),
        }
    }
}

/// Largest α ≤ 1 with v + α·dv ≥ 0.
fn max_step(v: &Array1<f64>, dv: &Array1<f64>) -> f64 {
    v.iter()
        .zip(dv.iter())
        .filter(|(_, d)| **d < 0.0)
        .map(|(x, d)| -x / d)
        .fold(1.0, f64::min)
}

/// Shift v so that its smallest entry is at least 1 when any entry is ≤ 0.
fn shift_positive(v: Array1<f64>) -> Array1<f64> {
    let min = v.iter().cloned().fold(f64::INFINITY, f64::min);
    if min > 0.0 {
        v
    } else {
        v + (1.0 - min)
    }
}

struct Direction {
    dx: Array1<f64>,
    ds: Array1<f64>,
    dz: Array1<f64>,
}

impl InteriorPointSolver {
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        InteriorPointSolver {
            max_iterations,
            tolerance,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn direction(
        factor: &Factor,
        g: &SparseRows,
        s: &Array1<f64>,
        z: &Array1<f64>,
        w: &Array1<f64>,
        r_dual: &Array1<f64>,
        r_primal: &Array1<f64>,
        r_comp: &Array1<f64>,
    ) -> TankResult<Direction> {
        let r_comp_over_s = r_comp / s;
        let inner = w * r_primal - &r_comp_over_s;
        let rhs = -(r_dual + &g.mul_t(&inner));
        let dx = factor.solve(&rhs)?;
        let dz = w * &(g.mul(&dx) + r_primal) - &r_comp_over_s;
        let ds = -(r_comp + &(s * &dz)) / z;
        Ok(Direction { dx, ds, dz })
    }

    /// Least-squares start: solve (H + GᵀG) x = Gᵀh − c, then take
    /// s = h − Gx and z = Gx − h, each shifted into the positive orthant.
    fn starting_point(scaled: &Scaled) -> TankResult<(Array1<f64>, Array1<f64>, Array1<f64>)> {
        let g = &scaled.g;
        let ones = Array1::ones(scaled.bounds.len());
        let factor = Factor::new(g.normal_matrix(&scaled.hessian, &ones));
        let x = factor.solve(&(g.mul_t(&scaled.bounds) - &scaled.linear))?;
        let residual = &scaled.bounds - &g.mul(&x);
        let s = shift_positive(residual.clone());
        let z = shift_positive(-residual);
        Ok((x, s, z))
    }

    fn finish(problem: &QpProblem, status: QpStatus, x: Array1<f64>, iterations: usize) -> QpSolution {
        let objective = problem.objective(&x);
        QpSolution {
            status,
            x,
            iterations,
            objective,
        }
    }
}

impl QpSolver for InteriorPointSolver {
    fn solve(&self, problem: &QpProblem) -> TankResult<QpSolution> {
        let n = problem.n_vars();
        let m = problem.n_constraints();

        if m == 0 {
            let factor = Factor::new(problem.hessian.clone());
            return match factor.solve(&(-&problem.linear)) {
                Ok(sol) => Ok(Self::finish(problem, QpStatus::Optimal, sol, 1)),
                Err(_) => Ok(Self::finish(problem, QpStatus::NumericalError, Array1::zeros(n), 1)),
            };
        }

        let scaled = Scaled::equilibrate(problem);
        let (h_mat, c, g, h) = (&scaled.hessian, &scaled.linear, &scaled.g, &scaled.bounds);

        let (mut x, mut s, mut z) = match Self::starting_point(&scaled) {
            Ok(start) => start,
            Err(_) => {
                return Ok(Self::finish(problem, QpStatus::NumericalError, Array1::zeros(n), 0))
            }
        };

        let h_norm = max_abs(h);
        let c_norm = max_abs(c);
        let done = |status: QpStatus, x: &Array1<f64>, iter: usize| {
            Self::finish(problem, status, scaled.unscale(x), iter)
        };

        for iter in 0..self.max_iterations {
            let hx = h_mat.dot(&x);
            let gx = g.mul(&x);
            let gtz = g.mul_t(&z);
            let r_dual = &hx + c + &gtz;
            let r_primal = &gx + &s - h;
            let mu = s.dot(&z) / m as f64;
            let complementarity = s
                .iter()
                .zip(z.iter())
                .fold(0.0_f64, |acc, (si, zi)| acc.max(si * zi));

            if !(mu.is_finite() && x.iter().all(|v| v.is_finite())) {
                return Ok(done(QpStatus::NumericalError, &x, iter));
            }
            let primal_scale = 1.0 + max_abs(&gx).max(h_norm);
            let dual_scale = 1.0 + max_abs(&hx).max(c_norm).max(max_abs(&gtz));
            if max_abs(&r_primal) <= self.tolerance * primal_scale
                && complementarity <= self.tolerance
            {
                if let Some(polished) = scaled.polish(&s, &z) {
                    return Ok(done(QpStatus::Optimal, &polished, iter));
                }
                if max_abs(&r_dual) <= self.tolerance * dual_scale {
                    return Ok(done(QpStatus::Optimal, &x, iter));
                }
            }

            // Farkas certificate: z ≥ 0, Gᵀz = 0, hᵀz < 0.
            let z_sum = z.sum();
            if z_sum > 0.0 {
                let z_hat = &z / z_sum;
                if max_abs(&g.mul_t(&z_hat)) <= CERT_DUAL_TOL && h.dot(&z_hat) < -CERT_GAP_TOL {
                    return Ok(done(QpStatus::Infeasible, &x, iter));
                }
            }

            let w = &z / &s;
            let factor = Factor::new(g.normal_matrix(h_mat, &w));

            // Predictor (affine scaling).
            let r_comp_aff = &s * &z;
            let aff = match Self::direction(&factor, g, &s, &z, &w, &r_dual, &r_primal, &r_comp_aff) {
                Ok(d) => d,
                Err(_) => return Ok(done(QpStatus::NumericalError, &x, iter)),
            };
            let alpha_aff = max_step(&s, &aff.ds).min(max_step(&z, &aff.dz));
            let s_aff = &s + &(&aff.ds * alpha_aff);
            let z_aff = &z + &(&aff.dz * alpha_aff);
            let mu_aff = s_aff.dot(&z_aff) / m as f64;
            let sigma = (mu_aff / mu).powi(3).clamp(0.0, 1.0);

            // Corrector with centering.
            let r_comp = &r_comp_aff + &(&aff.ds * &aff.dz) - sigma * mu;
            let dir = match Self::direction(&factor, g, &s, &z, &w, &r_dual, &r_primal, &r_comp) {
                Ok(d) => d,
                Err(_) => return Ok(done(QpStatus::NumericalError, &x, iter)),
            };
            let alpha = (STEP_FRACTION * max_step(&s, &dir.ds).min(max_step(&z, &dir.dz))).min(1.0);
            if !alpha.is_finite() || alpha <= 0.0 {
                return Ok(done(QpStatus::NumericalError, &x, iter));
            }

            x = x + &(&dir.dx * alpha);
            s = s + &(&dir.ds * alpha);
            z = z + &(&dir.dz * alpha);
        }

        log::debug!(
            "interior point stopped after {} iterations without convergence",
            self.max_iterations
        );
        Ok(done(QpStatus::MaxIterations, &x, self.max_iterations))
    }
}
