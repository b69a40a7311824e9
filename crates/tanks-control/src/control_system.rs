// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Control System
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Routing facade over the five controllers: one MPC per process tank,
//! one PI per reservoir. Named measurements and references in, the full
//! 11-actuator map out.

use crate::mpc::{MpcController, MpcState, SolveRung};
use crate::pi::PiController;
use ndarray::Array1;
use std::sync::Arc;
use tanks_math::qp::{InteriorPointSolver, QpSolver};
use tanks_types::config::PlantConfig;
use tanks_types::constants::N_CONTROLS;
use tanks_types::error::{TankError, TankResult};
use tanks_types::state::{
    control_key, controls_from_map, state_key, Actuator, NamedValues, TankId, Variable,
};

/// Ladder outcome of one MPC in one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpcDiagnostic {
    pub tank: TankId,
    pub rung: SolveRung,
    pub iterations: usize,
}

/// Output of one control cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlOutput {
    /// All 11 actuators keyed `tank_x_actuator`.
    pub controls: NamedValues,
    /// Same values in control-vector order.
    pub vector: Array1<f64>,
    pub diagnostics: Vec<MpcDiagnostic>,
}

pub struct ControlSystem {
    config: Arc<PlantConfig>,
    mpcs: [MpcController; 3],
    mpc_states: [MpcState; 3],
    pis: [PiController; 2],
    solver: Box<dyn QpSolver + Send>,
}

fn lookup(map: &NamedValues, key: &str, what: &str) -> TankResult<f64> {
    map.get(key)
        .copied()
        .ok_or_else(|| TankError::InvalidArgument(format!("missing {what} '{key}'")))
}

impl ControlSystem {
    /// Controllers with the default interior-point QP backend.
    pub fn new(config: Arc<PlantConfig>) -> TankResult<Self> {
        Self::with_solver(config, Box::new(InteriorPointSolver::default()))
    }

    pub fn with_solver(
        config: Arc<PlantConfig>,
        solver: Box<dyn QpSolver + Send>,
    ) -> TankResult<Self> {
        let mpcs = [
            MpcController::new(&config, TankId::C)?,
            MpcController::new(&config, TankId::D)?,
            MpcController::new(&config, TankId::E)?,
        ];
        let mpc_states = [
            mpcs[0].initial_state(),
            mpcs[1].initial_state(),
            mpcs[2].initial_state(),
        ];
        let ts = config.timing.control_period;
        let valve = config.actuator_bounds(Actuator::SupplyValve);
        let pis = [
            PiController::new(&config.pi, ts, valve),
            PiController::new(&config.pi, ts, valve),
        ];
        log::info!("control system ready: 3 MPC (C, D, E), 2 PI (A, B), Ts={ts}s");
        Ok(ControlSystem {
            config,
            mpcs,
            mpc_states,
            pis,
            solver,
        })
    }

    /// Run every controller once.
    ///
    /// `measured` and `references` must contain every level and
    /// concentration key they are asked for.
    pub fn compute(
        &mut self,
        measured: &NamedValues,
        references: &NamedValues,
    ) -> TankResult<ControlOutput> {
        let mut controls = NamedValues::new();

        for (p, tank) in TankId::RESERVOIRS.into_iter().enumerate() {
            let key = state_key(tank, Variable::Level);
            let y = lookup(measured, &key, "measurement")?;
            let r = lookup(references, &key, "reference")?;
            let u = self.pis[p].step(r, y);
            controls.insert(control_key(tank, Actuator::SupplyValve), u);
        }

        let mut diagnostics = Vec::with_capacity(3);
        for (p, tank) in TankId::PROCESS.into_iter().enumerate() {
            let level_key = state_key(tank, Variable::Level);
            let conc_key = state_key(tank, Variable::Concentration);
            let y = [
                lookup(measured, &level_key, "measurement")?,
                lookup(measured, &conc_key, "measurement")?,
            ];
            let r = [
                lookup(references, &level_key, "reference")?,
                lookup(references, &conc_key, "reference")?,
            ];
            let step = self.mpcs[p].solve(self.solver.as_ref(), y, r, &self.mpc_states[p]);
            self.mpc_states[p] = step.state;
            for (actuator, value) in Actuator::PROCESS.into_iter().zip(step.action) {
                controls.insert(control_key(tank, actuator), value);
            }
            diagnostics.push(MpcDiagnostic {
                tank,
                rung: step.rung,
                iterations: step.iterations,
            });
        }

        let vector = controls_from_map(&controls, &self.config.equilibrium_controls())?;
        log::debug!("control cycle: {:?}", vector.to_vec());
        Ok(ControlOutput {
            controls,
            vector,
            diagnostics,
        })
    }

    /// Seed each MPC's previous action from a full control vector.
    pub fn prime(&mut self, controls: &Array1<f64>) -> TankResult<()> {
        if controls.len() != N_CONTROLS {
            return Err(TankError::InvalidArgument(format!(
                "control vector must have {N_CONTROLS} entries, got {}",
                controls.len()
            )));
        }
        for (state, tank) in self.mpc_states.iter_mut().zip(TankId::PROCESS) {
            if let Some(idx) = tank.process_control_indices() {
                state.previous_action = idx.map(|i| controls[i]);
            }
        }
        Ok(())
    }

    /// Zero the integral accumulator of a process tank's MPC.
    pub fn reset_integrator(&mut self, tank: TankId) -> TankResult<()> {
        let p = tank.process_index().ok_or_else(|| {
            TankError::InvalidArgument(format!("{tank} has no MPC integrator"))
        })?;
        self.mpc_states[p].reset_integrator();
        log::info!("MPC {tank}: integrator reset");
        Ok(())
    }

    pub fn mpc_state(&self, tank: TankId) -> Option<&MpcState> {
        tank.process_index().map(|p| &self.mpc_states[p])
    }

    pub fn mpc(&self, tank: TankId) -> Option<&MpcController> {
        tank.process_index().map(|p| &self.mpcs[p])
    }

    pub fn pi(&self, tank: TankId) -> Option<&PiController> {
        match tank {
            TankId::A => Some(&self.pis[0]),
            TankId::B => Some(&self.pis[1]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tanks_types::state::state_to_map;

    fn system() -> ControlSystem {
        ControlSystem::new(Arc::new(PlantConfig::default())).unwrap()
    }

    #[test]
    fn test_equilibrium_cycle_produces_full_map() {
        let mut cs = system();
        let eq = state_to_map(&PlantConfig::default().equilibrium_state());
        let out = cs.compute(&eq, &eq).unwrap();
        assert_eq!(out.controls.len(), N_CONTROLS);
        assert_eq!(out.vector.len(), N_CONTROLS);
        assert_eq!(out.diagnostics.len(), 3);
        // PI with zero error outputs 0 on the supply valves.
        assert!(out.controls["tank_a_supply_valve"].abs() < 1e-12);
        let outlet = out.controls["tank_d_outlet_valve"];
        assert!((outlet - 0.5).abs() < 1e-4, "outlet {outlet}");
        assert!(out.diagnostics.iter().all(|d| d.rung == SolveRung::Optimal));
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut cs = system();
        let mut eq = state_to_map(&PlantConfig::default().equilibrium_state());
        let refs = eq.clone();
        eq.remove("tank_e_concentration");
        assert!(cs.compute(&eq, &refs).is_err());
    }

    #[test]
    fn test_reservoir_pi_reacts_to_low_level() {
        let mut cs = system();
        let refs = state_to_map(&PlantConfig::default().equilibrium_state());
        let mut measured = refs.clone();
        measured.insert("tank_b_level".to_string(), 1.45);
        let out = cs.compute(&measured, &refs).unwrap();
        assert!(out.controls["tank_b_supply_valve"] > 0.7);
        assert!(cs.pi(TankId::B).unwrap().integral() > 0.0);
    }

    #[test]
    fn test_reset_integrator_routes_to_tank() {
        let mut cs = system();
        let refs = state_to_map(&PlantConfig::default().equilibrium_state());
        let mut measured = refs.clone();
        measured.insert("tank_d_level".to_string(), 1.4);
        cs.compute(&measured, &refs).unwrap();
        assert!(cs.mpc_state(TankId::D).unwrap().integral_error[0] < 0.0);
        cs.reset_integrator(TankId::D).unwrap();
        assert_eq!(cs.mpc_state(TankId::D).unwrap().integral_error, [0.0, 0.0]);
        assert!(cs.reset_integrator(TankId::A).is_err());
    }

    #[test]
    fn test_prime_sets_previous_actions() {
        let mut cs = system();
        let u = Array1::from_iter((0..N_CONTROLS).map(|i| i as f64 / 20.0));
        cs.prime(&u).unwrap();
        assert_eq!(cs.mpc_state(TankId::E).unwrap().previous_action, [0.4, 0.45, 0.5]);
        assert!(cs.prime(&Array1::zeros(3)).is_err());
    }
}
