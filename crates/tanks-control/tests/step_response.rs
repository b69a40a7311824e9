// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Closed-Loop Step Response
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Setpoint steps on tank C (+0.2 m level, ±30 concentration), driven
//! through the orchestrator on a simulated clock.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tanks_control::mpc::SolveRung;
use tanks_control::realtime::{Command, RealtimeOrchestrator, SessionConfig, SetpointCommand};
use tanks_types::config::PlantConfig;
use tanks_types::state::Actuator;

const STEP: f64 = 0.2;

struct Trace {
    levels: Vec<f64>,
    concentrations: Vec<f64>,
    actions: Vec<[f64; 3]>,
    other_levels: Vec<[f64; 2]>,
    rungs: Vec<SolveRung>,
}

fn run_step(duration: f64) -> Trace {
    let target = PlantConfig::default().equilibrium.process_level + STEP;
    run_setpoint("level", target, duration)
}

fn run_setpoint(variable: &str, target: f64, duration: f64) -> Trace {
    let cfg = Arc::new(PlantConfig::default());
    let mut orch = RealtimeOrchestrator::new(Arc::clone(&cfg)).unwrap();
    let t0 = Instant::now();
    orch.initialize(SessionConfig::canonical(&cfg, 5.0), t0)
        .unwrap();

    orch.apply(
        Command::Setpoint(SetpointCommand {
            tank_id: "tank_c".to_string(),
            variable: variable.to_string(),
            value: target,
        }),
        t0,
    );

    let dt = cfg.timing.integration_step;
    let polls = (duration / dt).round() as usize;
    let mut trace = Trace {
        levels: Vec::new(),
        concentrations: Vec::new(),
        actions: Vec::new(),
        other_levels: Vec::new(),
        rungs: Vec::new(),
    };
    for k in 1..=polls {
        let now = t0 + Duration::from_secs_f64(k as f64 * dt);
        let tick = orch.poll(now).unwrap();
        if tick.control_ran {
            trace.rungs.extend(tick.diagnostics.iter().map(|d| d.rung));
            let snap = orch.snapshot();
            trace.levels.push(snap.variables["tank_c_level"]);
            trace.concentrations.push(snap.variables["tank_c_concentration"]);
            trace.actions.push([
                snap.controls["tank_c_water_pump"],
                snap.controls["tank_c_brine_pump"],
                snap.controls["tank_c_outlet_valve"],
            ]);
            trace
                .other_levels
                .push([snap.variables["tank_d_level"], snap.variables["tank_e_level"]]);
        }
    }
    trace
}

#[test]
fn level_step_tracks_without_overshoot() {
    let cfg = PlantConfig::default();
    let trace = run_step(300.0);
    let h_eq = cfg.equilibrium.process_level;
    let ceiling = h_eq + STEP * (1.0 + cfg.mpc.overshoot_limit);

    assert_eq!(trace.levels.len(), 60);
    let peak = trace.levels.iter().cloned().fold(f64::MIN, f64::max);
    assert!(peak <= ceiling + 5e-3, "peak {peak} above ceiling {ceiling}");

    // Monotone rise until close to the target.
    for pair in trace.levels.windows(2) {
        if pair[0] < h_eq + STEP - 0.01 {
            assert!(
                pair[1] >= pair[0] - 1e-3,
                "level fell from {} to {} during the rise",
                pair[0],
                pair[1]
            );
        }
    }
    let last = *trace.levels.last().unwrap();
    assert!(last > h_eq + 0.5 * STEP, "level only reached {last}");
    assert!(trace.levels[0] < last);

    for c in &trace.concentrations {
        assert!((c - 180.0).abs() < 5.0, "concentration drifted to {c}");
    }
    for [d, e] in &trace.other_levels {
        assert!((d - h_eq).abs() < 0.02 && (e - h_eq).abs() < 0.02);
    }
}

#[test]
fn level_step_respects_actuator_limits() {
    let cfg = PlantConfig::default();
    let trace = run_step(120.0);
    let mut previous = [
        cfg.equilibrium.water_pump,
        cfg.equilibrium.brine_pump,
        cfg.equilibrium.outlet_valve,
    ];
    for action in &trace.actions {
        for (j, actuator) in Actuator::PROCESS.into_iter().enumerate() {
            let [lo, hi] = cfg.actuator_bounds(actuator);
            assert!(action[j] >= lo && action[j] <= hi);
            let moved = (action[j] - previous[j]).abs();
            assert!(
                moved <= cfg.rate_limit(actuator) + 1e-9,
                "{} moved {moved}",
                actuator.name()
            );
        }
        previous = *action;
    }
    // The first move must raise net inflow.
    let first = trace.actions[0];
    let pumps_eq = cfg.equilibrium.water_pump + cfg.equilibrium.brine_pump;
    assert!(first[0] + first[1] > pumps_eq || first[2] < cfg.equilibrium.outlet_valve);
}

#[test]
fn concentration_steps_stay_on_optimal_rung() {
    let cfg = PlantConfig::default();
    let c_eq = cfg.equilibrium.process_concentration;
    for delta in [30.0, -30.0] {
        let trace = run_setpoint("concentration", c_eq + delta, 600.0);
        assert_eq!(trace.rungs.len(), 3 * 120);
        let degraded = trace.rungs.iter().filter(|r| r.is_degraded()).count();
        assert_eq!(degraded, 0, "{degraded} degraded solves for a {delta:+} step");

        // Settles inside the 1% band beyond the reference, never past it.
        let bound = c_eq + delta * (1.0 + cfg.mpc.overshoot_limit);
        let last = *trace.concentrations.last().unwrap();
        assert!(
            (last - (c_eq + delta)).abs() <= delta.abs() * cfg.mpc.overshoot_limit + 0.05,
            "concentration settled at {last}"
        );
        for c in &trace.concentrations {
            assert!((c - c_eq) * delta.signum() <= (bound - c_eq) * delta.signum() + 0.05);
        }
        for h in &trace.levels {
            assert!((h - cfg.equilibrium.process_level).abs() < 0.05, "level drifted to {h}");
        }
    }
}
