// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Property-Based Tests (proptest) for tanks-control
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Property-based tests for tanks-control using proptest.
//!
//! Covers: actuator rate limits across solve sequences, actuator bounds
//! when the QP cannot be solved, PI output range, command wire format.

use proptest::prelude::*;
use tanks_control::constraints::ActuatorLimit;
use tanks_control::mpc::{MpcController, MpcState, SolveRung};
use tanks_control::pi::PiController;
use tanks_control::realtime::{Command, SetpointCommand};
use tanks_math::qp::{InteriorPointSolver, QpProblem, QpSolution, QpSolver, QpStatus};
use tanks_types::config::PlantConfig;
use tanks_types::error::TankResult;
use tanks_types::state::{Actuator, TankId};

/// Reports every problem as infeasible.
struct RefusingSolver;

impl QpSolver for RefusingSolver {
    fn solve(&self, problem: &QpProblem) -> TankResult<QpSolution> {
        Ok(QpSolution {
            status: QpStatus::Infeasible,
            x: ndarray::Array1::zeros(problem.n_vars()),
            iterations: 1,
            objective: f64::NAN,
        })
    }
}

fn limits() -> [ActuatorLimit; 3] {
    ActuatorLimit::process_tank(&PlantConfig::default())
}

fn assert_admissible(action: &[f64; 3], previous: &[f64; 3]) -> Result<(), TestCaseError> {
    for (j, limit) in limits().iter().enumerate() {
        prop_assert!(
            action[j] >= limit.min_value - 1e-12 && action[j] <= limit.max_value + 1e-12,
            "actuator {} = {} outside [{}, {}]",
            j,
            action[j],
            limit.min_value,
            limit.max_value
        );
        prop_assert!(
            (action[j] - previous[j]).abs() <= limit.max_step + 1e-9,
            "actuator {} moved {} > {}",
            j,
            (action[j] - previous[j]).abs(),
            limit.max_step
        );
    }
    Ok(())
}

// ── Rate Limits ──────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// Every solve in a sequence moves each actuator by at most its rate
    /// limit relative to the previously applied action.
    #[test]
    fn rate_limits_hold_over_solve_sequence(
        tank in prop::sample::select(vec![TankId::C, TankId::D, TankId::E]),
        levels in prop::collection::vec(0.5f64..2.5, 3),
        concentrations in prop::collection::vec(60.0f64..300.0, 3),
        target_level in 0.8f64..2.2,
        target_concentration in 100.0f64..260.0,
    ) {
        let cfg = PlantConfig::default();
        let mpc = MpcController::new(&cfg, tank).unwrap();
        let solver = InteriorPointSolver::default();
        let mut state = mpc.initial_state();
        for (h, c) in levels.iter().zip(&concentrations) {
            let previous = state.previous_action;
            let step = mpc.solve(&solver, [*h, *c], [target_level, target_concentration], &state);
            assert_admissible(&step.action, &previous)?;
            prop_assert_eq!(step.state.previous_action, step.action);
            state = step.state;
        }
    }
}

// ── Degraded Paths ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With the solver refusing every problem the conservative blend still
    /// lands inside the actuator ranges and rate limits.
    #[test]
    fn conservative_blend_stays_admissible(
        previous in prop::collection::vec(0.0f64..=1.0, 3),
        level in 0.3f64..2.7,
        concentration in 0.0f64..360.0,
    ) {
        let mpc = MpcController::new(&PlantConfig::default(), TankId::D).unwrap();
        let previous = [previous[0], previous[1], previous[2]];
        let state = MpcState::new(previous);
        let step = mpc.solve(&RefusingSolver, [level, concentration], [1.5, 180.0], &state);
        prop_assert_eq!(step.rung, SolveRung::Conservative);
        prop_assert_eq!(step.state.integral_error, [0.0, 0.0]);
        assert_admissible(&step.action, &previous)?;
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]

    /// A concentration far above the hard ceiling makes the QP genuinely
    /// infeasible; the ladder still returns an admissible action.
    #[test]
    fn infeasible_constraints_degrade_gracefully(
        concentration in 420.0f64..600.0,
        level in 1.0f64..2.0,
    ) {
        let mpc = MpcController::new(&PlantConfig::default(), TankId::C).unwrap();
        let state = mpc.initial_state();
        let previous = state.previous_action;
        let step = mpc.solve(
            &InteriorPointSolver::default(),
            [level, concentration],
            [1.5, 180.0],
            &state,
        );
        prop_assert!(step.rung.is_degraded(), "rung {:?}", step.rung);
        assert_admissible(&step.action, &previous)?;
    }
}

// ── PI ───────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Output always within the valve range; integral within anti-windup.
    #[test]
    fn pi_output_and_integral_bounded(
        errors in prop::collection::vec((0.0f64..3.0, 0.0f64..3.0), 1..200),
    ) {
        let cfg = PlantConfig::default();
        let valve = cfg.actuator_bounds(Actuator::SupplyValve);
        let mut pi = PiController::new(&cfg.pi, cfg.timing.control_period, valve);
        for (setpoint, measured) in errors {
            let u = pi.step(setpoint, measured);
            prop_assert!((0.0..=1.0).contains(&u), "u = {}", u);
            prop_assert!(pi.integral().abs() <= cfg.pi.integral_limit + 1e-12);
        }
    }
}

// ── Command Wire Format ──────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn setpoint_command_parses(
        tank in prop::sample::select(vec!["tank_a", "tank_b", "tank_c", "tank_d", "tank_e"]),
        variable in prop::sample::select(vec!["level", "concentration"]),
        value in -1e3f64..1e3,
    ) {
        let json = serde_json::json!({
            "type": "setpoint",
            "data": {"tank_id": tank, "variable": variable, "value": value},
        });
        let command: Command = serde_json::from_value(json).unwrap();
        prop_assert_eq!(
            command,
            Command::Setpoint(SetpointCommand {
                tank_id: tank.to_string(),
                variable: variable.to_string(),
                value,
            })
        );
    }
}
