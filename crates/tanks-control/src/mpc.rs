// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — MPC
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Offset-free model predictive control of one process tank.
//!
//! Sub-model: x = [h, C], u = [water, brine, outlet], deviation coordinates
//! around the equilibrium, ZOH-discretized at the control period.
//!
//! Condensed QP over z = [u₀ … u_{Nc−1}, ε₁ … ε_Np]:
//!   x_k = p_k + Γ_k U                      (u held at u_{Nc−1} after Nc)
//!   E_k = E₀ + Σ_{i≤k} (x_i − r) = e_k + Ψ_k U
//!   J   = Σ_k (x_k − r)ᵀQ(x_k − r) + Σ_j u_jᵀR u_j + Σ_k E_kᵀ I E_k + ρ Σ_k ε_k
//! subject to
//!   h_min − ε_k ≤ h_k ≤ h_max + ε_k,  ε_k ≥ 0
//!   C_min ≤ C_k ≤ C_max
//!   x_k,i ≤ r_i (1 + overshoot)        when r_i > 0
//!   x_k,i ≥ r_i (1 − undershoot)       when r_i < 0
//!   u_min ≤ u_j ≤ u_max
//!   |u₀ − u_prev| ≤ Δ,  |u_j − u_{j−1}| ≤ Δ
//!
//! Failure ladder: full horizons → halved horizons → conservative blend
//! toward equilibrium. Construction or solver errors hold the previous action.

use crate::constraints::ActuatorLimit;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tanks_math::discretize::{select, zoh, DiscreteModel};
use tanks_math::qp::{QpProblem, QpSolver};
use tanks_types::config::{MpcConfig, PlantConfig};
use tanks_types::constants::{PROCESS_INPUTS, PROCESS_STATES};
use tanks_types::error::{TankError, TankResult};
use tanks_types::state::TankId;

/// Which rung of the failure ladder produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveRung {
    Optimal,
    ReducedHorizon,
    Conservative,
    HeldPrevious,
}

impl SolveRung {
    pub fn is_degraded(self) -> bool {
        self != SolveRung::Optimal
    }
}

/// Mutable memory of one MPC loop, carried between solves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpcState {
    /// Accumulated tracking error [level, concentration] (deviation frame).
    pub integral_error: [f64; PROCESS_STATES],
    /// Last applied `[water, brine, outlet]` (absolute).
    pub previous_action: [f64; PROCESS_INPUTS],
}

impl MpcState {
    pub fn new(previous_action: [f64; PROCESS_INPUTS]) -> Self {
        MpcState {
            integral_error: [0.0; PROCESS_STATES],
            previous_action,
        }
    }

    pub fn reset_integrator(&mut self) {
        self.integral_error = [0.0; PROCESS_STATES];
    }
}

/// Result of one `MpcController::solve`.
#[derive(Debug, Clone, PartialEq)]
pub struct MpcStep {
    /// `[water, brine, outlet]` to apply (absolute).
    pub action: [f64; PROCESS_INPUTS],
    pub state: MpcState,
    pub rung: SolveRung,
    /// Solver iterations summed over the attempts of this call.
    pub iterations: usize,
}

/// Horizon-independent pieces of one prediction.
struct Prediction {
    /// p_k, k = 1..Np
    free: Vec<[f64; PROCESS_STATES]>,
    /// Γ_k, k = 1..Np (2 × 3Nc)
    gamma: Vec<Array2<f64>>,
}

/// MPC for one process tank. Immutable after construction.
#[derive(Debug, Clone)]
pub struct MpcController {
    tank: TankId,
    model: DiscreteModel,
    x_eq: [f64; PROCESS_STATES],
    u_eq: [f64; PROCESS_INPUTS],
    weights: MpcConfig,
    limits: [ActuatorLimit; PROCESS_INPUTS],
    level_band: [f64; 2],
    concentration_band: [f64; 2],
}

impl MpcController {
    /// Extract the tank's 2×3 sub-model from the plant linearization and
    /// discretize it at the control period.
    pub fn new(config: &PlantConfig, tank: TankId) -> TankResult<Self> {
        let states = tank.process_state_indices().ok_or_else(|| {
            TankError::InvalidArgument(format!("{tank} is not a process tank"))
        })?;
        let inputs = tank.process_control_indices().ok_or_else(|| {
            TankError::InvalidArgument(format!("{tank} is not a process tank"))
        })?;
        let a = select(&config.a_matrix()?, &states, &states)?;
        let b = select(&config.b_matrix()?, &states, &inputs)?;
        let model = zoh(&a, &b, config.timing.control_period)?;
        log::info!(
            "MPC {tank}: Np={} Nc={} Ts={}s Ad=diag({:.6}, {:.6})",
            config.mpc.prediction_horizon,
            config.mpc.control_horizon,
            config.timing.control_period,
            model.ad[[0, 0]],
            model.ad[[1, 1]]
        );
        Ok(MpcController {
            tank,
            model,
            x_eq: config.process_equilibrium_state(),
            u_eq: config.process_equilibrium_controls(),
            weights: config.mpc.clone(),
            limits: ActuatorLimit::process_tank(config),
            level_band: [config.limits.level_min, config.limits.level_max],
            concentration_band: [config.limits.concentration_min, config.limits.concentration_max],
        })
    }

    pub fn tank(&self) -> TankId {
        self.tank
    }

    pub fn model(&self) -> &DiscreteModel {
        &self.model
    }

    pub fn equilibrium_action(&self) -> [f64; PROCESS_INPUTS] {
        self.u_eq
    }

    /// Fresh loop memory sitting at the equilibrium action.
    pub fn initial_state(&self) -> MpcState {
        MpcState::new(self.u_eq)
    }

    /// One receding-horizon step.
    ///
    /// `measured` and `reference` are absolute `[level, concentration]`.
    /// Never fails: solver trouble walks down the ladder instead.
    pub fn solve(
        &self,
        solver: &dyn QpSolver,
        measured: [f64; PROCESS_STATES],
        reference: [f64; PROCESS_STATES],
        state: &MpcState,
    ) -> MpcStep {
        let x0 = [measured[0] - self.x_eq[0], measured[1] - self.x_eq[1]];
        let r = [reference[0] - self.x_eq[0], reference[1] - self.x_eq[1]];
        let np = self.weights.prediction_horizon;
        let nc = self.weights.control_horizon;

        let first = match self.attempt(solver, x0, r, state, np, nc) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("MPC {}: solve failed ({e}), holding previous action", self.tank);
                return MpcStep {
                    action: state.previous_action,
                    state: state.clone(),
                    rung: SolveRung::HeldPrevious,
                    iterations: 0,
                };
            }
        };
        if let (Some(action), iterations) = first {
            let mut next = state.clone();
            next.integral_error[0] += x0[0] - r[0];
            next.integral_error[1] += x0[1] - r[1];
            next.previous_action = action;
            return MpcStep {
                action,
                state: next,
                rung: SolveRung::Optimal,
                iterations,
            };
        }
        let mut iterations = first.1;

        let np_red = (np / 2).max(self.weights.min_prediction_horizon);
        let nc_red = (nc / 2).max(self.weights.min_control_horizon).min(np_red);
        log::warn!(
            "MPC {}: non-optimal solve, retrying with Np={np_red} Nc={nc_red}",
            self.tank
        );
        match self.attempt(solver, x0, r, state, np_red, nc_red) {
            Ok((Some(action), it)) => {
                let mut next = state.clone();
                next.previous_action = action;
                return MpcStep {
                    action,
                    state: next,
                    rung: SolveRung::ReducedHorizon,
                    iterations: iterations + it,
                };
            }
            Ok((None, it)) => iterations += it,
            Err(e) => log::warn!("MPC {}: reduced solve failed ({e})", self.tank),
        }

        let action = self.conservative_action(&state.previous_action);
        log::warn!(
            "MPC {}: falling back to conservative blend {:?}",
            self.tank,
            action
        );
        let mut next = state.clone();
        next.previous_action = action;
        MpcStep {
            action,
            state: next,
            rung: SolveRung::Conservative,
            iterations,
        }
    }

    /// `previous·f + equilibrium·(1 − f)`, clipped to the actuator ranges.
    pub fn conservative_action(&self, previous: &[f64; PROCESS_INPUTS]) -> [f64; PROCESS_INPUTS] {
        let f = self.weights.conservative_blend;
        std::array::from_fn(|j| self.limits[j].clamp(previous[j] * f + self.u_eq[j] * (1.0 - f)))
    }

    /// Build and solve once. `Ok((None, _))` means the solver did not reach
    /// an optimum.
    fn attempt(
        &self,
        solver: &dyn QpSolver,
        x0: [f64; PROCESS_STATES],
        r: [f64; PROCESS_STATES],
        state: &MpcState,
        np: usize,
        nc: usize,
    ) -> TankResult<(Option<[f64; PROCESS_INPUTS]>, usize)> {
        let problem = self.formulate(x0, r, state, np, nc)?;
        let solution = solver.solve(&problem)?;
        if !solution.is_optimal() || solution.x.iter().any(|v| !v.is_finite()) {
            log::debug!(
                "MPC {}: QP status {:?} after {} iterations (Np={np}, Nc={nc})",
                self.tank,
                solution.status,
                solution.iterations
            );
            return Ok((None, solution.iterations));
        }
        let action = std::array::from_fn(|j| {
            let requested = self.limits[j].clamp(self.u_eq[j] + solution.x[j]);
            self.limits[j].enforce(requested, state.previous_action[j])
        });
        Ok((Some(action), solution.iterations))
    }

    fn predict(&self, x0: [f64; PROCESS_STATES], np: usize, nc: usize) -> Prediction {
        let ad = &self.model.ad;
        let bd = &self.model.bd;
        let mut free = Vec::with_capacity(np);
        let mut gamma = Vec::with_capacity(np);
        let mut p = Array1::from_vec(x0.to_vec());
        let mut g = Array2::<f64>::zeros((PROCESS_STATES, PROCESS_INPUTS * nc));
        for k in 1..=np {
            p = ad.dot(&p);
            g = ad.dot(&g);
            let block = (k - 1).min(nc - 1) * PROCESS_INPUTS;
            for i in 0..PROCESS_STATES {
                for j in 0..PROCESS_INPUTS {
                    g[[i, block + j]] += bd[[i, j]];
                }
            }
            free.push([p[0], p[1]]);
            gamma.push(g.clone());
        }
        Prediction { free, gamma }
    }

    /// Assemble the condensed QP for the given horizons.
    pub fn formulate(
        &self,
        x0: [f64; PROCESS_STATES],
        r: [f64; PROCESS_STATES],
        state: &MpcState,
        np: usize,
        nc: usize,
    ) -> TankResult<QpProblem> {
        if np == 0 || nc == 0 || nc > np {
            return Err(TankError::InvalidArgument(format!(
                "invalid horizons Np={np}, Nc={nc}"
            )));
        }
        let w = &self.weights;
        let nu = PROCESS_INPUTS * nc;
        let nz = nu + np;
        let pred = self.predict(x0, np, nc);

        // ── Cost ─────────────────────────────────────────────────────
        let mut hessian = Array2::<f64>::zeros((nz, nz));
        let mut linear = Array1::<f64>::zeros(nz);
        let mut psi = Array2::<f64>::zeros((PROCESS_STATES, nu));
        let mut e = state.integral_error;
        for (p, g) in pred.free.iter().zip(pred.gamma.iter()) {
            psi = psi + g;
            for i in 0..PROCESS_STATES {
                e[i] += p[i] - r[i];
                let track = p[i] - r[i];
                for a in 0..nu {
                    let ga = g[[i, a]];
                    let sa = psi[[i, a]];
                    if ga == 0.0 && sa == 0.0 {
                        continue;
                    }
                    linear[a] += 2.0 * (w.q[i] * ga * track + w.i[i] * sa * e[i]);
                    for b in 0..nu {
                        hessian[[a, b]] +=
                            2.0 * (w.q[i] * ga * g[[i, b]] + w.i[i] * sa * psi[[i, b]]);
                    }
                }
            }
        }
        for j in 0..nc {
            for m in 0..PROCESS_INPUTS {
                let a = PROCESS_INPUTS * j + m;
                hessian[[a, a]] += 2.0 * w.r[m];
            }
        }
        for k in 0..np {
            linear[nu + k] = w.slack_weight;
        }

        // ── Constraints G z ≤ h ──────────────────────────────────────
        let mut rows: Vec<(Vec<(usize, f64)>, f64)> = Vec::new();
        let row_of = |g: &Array2<f64>, i: usize, sign: f64| -> Vec<(usize, f64)> {
            (0..nu)
                .filter(|&a| g[[i, a]] != 0.0)
                .map(|a| (a, sign * g[[i, a]]))
                .collect()
        };
        let level_hi = self.level_band[1] - self.x_eq[0];
        let level_lo = self.level_band[0] - self.x_eq[0];
        let conc_hi = self.concentration_band[1] - self.x_eq[1];
        let conc_lo = self.concentration_band[0] - self.x_eq[1];
        for (k, (p, g)) in pred.free.iter().zip(pred.gamma.iter()).enumerate() {
            let slack = nu + k;
            // Soft level band.
            let mut upper = row_of(g, 0, 1.0);
            upper.push((slack, -1.0));
            rows.push((upper, level_hi - p[0]));
            let mut lower = row_of(g, 0, -1.0);
            lower.push((slack, -1.0));
            rows.push((lower, p[0] - level_lo));
            // Hard concentration band.
            rows.push((row_of(g, 1, 1.0), conc_hi - p[1]));
            rows.push((row_of(g, 1, -1.0), p[1] - conc_lo));
            // Overshoot ceiling / undershoot floor per axis.
            for i in 0..PROCESS_STATES {
                if r[i] > 0.0 {
                    rows.push((row_of(g, i, 1.0), r[i] * (1.0 + w.overshoot_limit) - p[i]));
                } else if r[i] < 0.0 {
                    rows.push((row_of(g, i, -1.0), p[i] - r[i] * (1.0 - w.undershoot_limit)));
                }
            }
            rows.push((vec![(slack, -1.0)], 0.0));
        }
        let prev_dev: [f64; PROCESS_INPUTS] =
            std::array::from_fn(|m| state.previous_action[m] - self.u_eq[m]);
        for j in 0..nc {
            for m in 0..PROCESS_INPUTS {
                let a = PROCESS_INPUTS * j + m;
                let lim = &self.limits[m];
                rows.push((vec![(a, 1.0)], lim.max_value - self.u_eq[m]));
                rows.push((vec![(a, -1.0)], self.u_eq[m] - lim.min_value));
                if lim.max_step.is_finite() {
                    if j == 0 {
                        rows.push((vec![(a, 1.0)], lim.max_step + prev_dev[m]));
                        rows.push((vec![(a, -1.0)], lim.max_step - prev_dev[m]));
                    } else {
                        let before = a - PROCESS_INPUTS;
                        rows.push((vec![(a, 1.0), (before, -1.0)], lim.max_step));
                        rows.push((vec![(a, -1.0), (before, 1.0)], lim.max_step));
                    }
                }
            }
        }

        let mut constraints = Array2::<f64>::zeros((rows.len(), nz));
        let mut bounds = Array1::<f64>::zeros(rows.len());
        for (row, (entries, rhs)) in rows.into_iter().enumerate() {
            for (col, v) in entries {
                constraints[[row, col]] = v;
            }
            bounds[row] = rhs;
        }
        QpProblem::new(hessian, linear, constraints, bounds)
    }
}
