// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Property-Based Tests (proptest) for tanks-math
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for tanks-math using proptest.
//!
//! Covers: Cholesky and LU solves, ZOH closed form for diagonal models,
//! interior-point solutions of box-constrained QPs.

use ndarray::{Array1, Array2};
use proptest::prelude::*;
use tanks_math::discretize::zoh;
use tanks_math::linalg::{cholesky, cholesky_solve, lu_solve, max_abs};
use tanks_math::qp::{InteriorPointSolver, QpProblem, QpSolver};

/// Symmetric, strictly diagonally dominant matrix from a seed vector.
fn spd_matrix(n: usize, seed: &[f64]) -> Array2<f64> {
    let mut a = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..i {
            let v = seed[(i * 7 + j) % seed.len()] * 0.5;
            a[[i, j]] = v;
            a[[j, i]] = v;
        }
    }
    for i in 0..n {
        let off: f64 = (0..n).filter(|&j| j != i).map(|j| a[[i, j]].abs()).sum();
        a[[i, i]] = off + 1.0 + seed[i % seed.len()].abs();
    }
    a
}

// ── Dense Solves ─────────────────────────────────────────────────────

proptest! {
    /// Cholesky solve of an SPD system satisfies A·x = b.
    #[test]
    fn cholesky_solves_spd(
        n in 2usize..12,
        seed in prop::collection::vec(-1.0f64..1.0, 16),
    ) {
        let a = spd_matrix(n, &seed);
        let b = Array1::from_iter((0..n).map(|i| (i as f64 + 0.5).cos()));
        let l = cholesky(&a).unwrap();
        let x = cholesky_solve(&l, &b);
        let r = a.dot(&x) - &b;
        prop_assert!(max_abs(&r) < 1e-10, "residual {}", max_abs(&r));
    }

    /// LU and Cholesky agree on SPD systems.
    #[test]
    fn lu_matches_cholesky(
        n in 2usize..12,
        seed in prop::collection::vec(-1.0f64..1.0, 16),
    ) {
        let a = spd_matrix(n, &seed);
        let b = Array1::from_iter((0..n).map(|i| i as f64 - 3.0));
        let x_lu = lu_solve(&a, &b).unwrap();
        let x_ch = cholesky_solve(&cholesky(&a).unwrap(), &b);
        prop_assert!(max_abs(&(x_lu - x_ch)) < 1e-9);
    }
}

// ── Discretization ───────────────────────────────────────────────────

proptest! {
    /// Diagonal models discretize to Ad = e^{λT}, Bd = (e^{λT} − 1)/λ · B.
    #[test]
    fn zoh_diagonal_closed_form(
        l1 in -0.01f64..-1e-4,
        l2 in -0.01f64..-1e-4,
        t in 0.5f64..20.0,
        b1 in -1.0f64..1.0,
        b2 in -1.0f64..1.0,
    ) {
        let a = Array2::from_diag(&Array1::from_vec(vec![l1, l2]));
        let b = Array2::from_shape_vec((2, 1), vec![b1, b2]).unwrap();
        let d = zoh(&a, &b, t).unwrap();
        for (i, (lambda, bi)) in [(l1, b1), (l2, b2)].into_iter().enumerate() {
            let ad = (lambda * t).exp();
            let bd = (ad - 1.0) / lambda * bi;
            prop_assert!((d.ad[[i, i]] - ad).abs() < 1e-10);
            prop_assert!((d.bd[[i, 0]] - bd).abs() < 1e-10,
                "Bd[{}] = {}, expected {}", i, d.bd[[i, 0]], bd);
        }
        prop_assert!(d.ad[[0, 1]].abs() < 1e-14);
    }
}

// ── Interior Point ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// For separable box QPs the optimum is the clipped unconstrained minimizer.
    #[test]
    fn box_qp_matches_clipping(
        targets in prop::collection::vec(-3.0f64..3.0, 1..8),
        weights in prop::collection::vec(0.1f64..100.0, 8),
        half_width in 0.2f64..2.0,
    ) {
        let n = targets.len();
        let mut h_mat = Array2::zeros((n, n));
        let mut c = Array1::zeros(n);
        let mut g = Array2::zeros((2 * n, n));
        let mut h = Array1::zeros(2 * n);
        for i in 0..n {
            h_mat[[i, i]] = weights[i];
            c[i] = -weights[i] * targets[i];
            g[[2 * i, i]] = 1.0;
            h[2 * i] = half_width;
            g[[2 * i + 1, i]] = -1.0;
            h[2 * i + 1] = half_width;
        }
        let problem = QpProblem::new(h_mat, c, g, h).unwrap();
        let sol = InteriorPointSolver::default().solve(&problem).unwrap();
        prop_assert!(sol.is_optimal(), "status {:?}", sol.status);
        for i in 0..n {
            let expected = targets[i].clamp(-half_width, half_width);
            prop_assert!((sol.x[i] - expected).abs() < 1e-5,
                "x[{}] = {}, expected {}", i, sol.x[i], expected);
        }
    }
}
