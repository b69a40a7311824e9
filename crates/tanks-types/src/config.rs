// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Config
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
use crate::constants::{N_CONTROLS, N_STATES, PROCESS_INPUTS, PROCESS_STATES};
use crate::error::{TankError, TankResult};
use crate::state::{Actuator, TankId};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Plant parameter set.
/// Maps 1:1 to config/plant.json. Built once, shared read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantConfig {
    pub plant_name: String,
    pub timing: TimingConfig,
    /// Reservoirs A (water) and B (brine), in that order.
    pub reservoirs: [ReservoirConfig; 2],
    /// Process tanks C, D, E, in that order.
    pub process_tanks: [ProcessTankConfig; 3],
    /// Concentration of the brine supply [kg/m³].
    pub brine_concentration: f64,
    pub equilibrium: EquilibriumConfig,
    pub limits: LimitsConfig,
    pub linear_model: LinearModelConfig,
    pub mpc: MpcConfig,
    pub pi: PiConfig,
    #[serde(default)]
    pub realtime: RealtimeTuning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Fixed RK4 micro-step [s].
    pub integration_step: f64,
    /// MPC / PI sample period [s].
    pub control_period: f64,
    /// Nominal simulation horizon [s].
    pub simulation_horizon: f64,
}

/// Cylindrical utility reservoir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    pub name: String,
    pub radius: f64,
    pub max_height: f64,
    /// Supply valve gain: Q_in = gain · u [m³/s].
    pub supply_valve_gain: f64,
}

/// Frustum (truncated-cone) process tank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessTankConfig {
    pub name: String,
    pub bottom_radius: f64,
    pub top_radius: f64,
    pub max_height: f64,
    /// Torricelli discharge coefficient: Q_out = kv · u3 · √h [m^2.5/s].
    pub outlet_valve_coefficient: f64,
    /// Water pump gain: Q = kp · u1 [m³/s].
    pub water_pump_gain: f64,
    /// Brine pump gain: Q = kp · u2 [m³/s].
    pub brine_pump_gain: f64,
}

/// Nominal operating point used as linearization point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumConfig {
    pub reservoir_level: f64,
    pub process_level: f64,
    pub process_concentration: f64,
    pub supply_valve: f64,
    pub water_pump: f64,
    pub brine_pump: f64,
    pub outlet_valve: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Safe process level band [m]; softened by the MPC slack.
    pub level_min: f64,
    pub level_max: f64,
    pub concentration_min: f64,
    pub concentration_max: f64,
    pub supply_valve: [f64; 2],
    pub water_pump: [f64; 2],
    pub brine_pump: [f64; 2],
    pub outlet_valve: [f64; 2],
    /// Maximum change per control cycle.
    pub rate: RateLimits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimits {
    pub water_pump: f64,
    pub brine_pump: f64,
    pub outlet_valve: f64,
}

/// Continuous linearization dx/dt = A·x + B·u around the equilibrium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModelConfig {
    /// 8×8, row-major.
    pub a: Vec<Vec<f64>>,
    /// 8×11, row-major.
    pub b: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MpcConfig {
    pub prediction_horizon: usize,
    pub control_horizon: usize,
    /// Tracking weight diag [level, concentration].
    pub q: [f64; PROCESS_STATES],
    /// Effort weight diag [water, brine, outlet].
    pub r: [f64; PROCESS_INPUTS],
    /// Integral-error weight diag [level, concentration].
    pub i: [f64; PROCESS_STATES],
    pub slack_weight: f64,
    pub overshoot_limit: f64,
    pub undershoot_limit: f64,
    pub min_prediction_horizon: usize,
    pub min_control_horizon: usize,
    /// Weight of the previous action in the conservative fallback.
    pub conservative_blend: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiConfig {
    pub kp: f64,
    pub ki: f64,
    /// Integral term is clamped to ±integral_limit.
    pub integral_limit: f64,
}

/// Session-level tuning (optional in JSON config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeTuning {
    /// Samples kept per variable in the telemetry history (default: 4096).
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Relative setpoint change above which the MPC integrator is reset (default: 0.05).
    #[serde(default = "default_integrator_reset_threshold")]
    pub integrator_reset_threshold: f64,
}

fn default_history_capacity() -> usize {
    4096
}
fn default_integrator_reset_threshold() -> f64 {
    0.05
}

impl Default for RealtimeTuning {
    fn default() -> Self {
        RealtimeTuning {
            history_capacity: default_history_capacity(),
            integrator_reset_threshold: default_integrator_reset_threshold(),
        }
    }
}

/// λ_h: linearized level pole [1/s].
const LAMBDA_LEVEL: f64 = -0.00104;
/// λ_C: linearized concentration pole [1/s].
const LAMBDA_CONCENTRATION: f64 = -0.00270;

fn default_a_matrix() -> Vec<Vec<f64>> {
    let diag = [
        0.0,
        0.0,
        LAMBDA_LEVEL,
        LAMBDA_CONCENTRATION,
        LAMBDA_LEVEL,
        LAMBDA_CONCENTRATION,
        LAMBDA_LEVEL,
        LAMBDA_CONCENTRATION,
    ];
    (0..N_STATES)
        .map(|i| {
            let mut row = vec![0.0; N_STATES];
            row[i] = diag[i];
            row
        })
        .collect()
}

fn default_b_matrix() -> Vec<Vec<f64>> {
    let mut b = vec![vec![0.0; N_CONTROLS]; N_STATES];
    // Reservoirs: supply in, pump draws out.
    b[0][0] = 0.00499;
    b[1][1] = 0.00499;
    for p in 0..3 {
        b[0][2 + 3 * p] = -0.000831;
        b[1][3 + 3 * p] = -0.000831;
        let (h, c) = (2 + 2 * p, 3 + 2 * p);
        b[h][2 + 3 * p] = 0.00255;
        b[h][3 + 3 * p] = 0.00255;
        b[h][4 + 3 * p] = -0.00624;
        b[c][2 + 3 * p] = -0.396;
        b[c][3 + 3 * p] = 0.396;
    }
    b
}

fn default_process_tank(name: &str) -> ProcessTankConfig {
    ProcessTankConfig {
        name: name.to_string(),
        bottom_radius: 0.75,
        top_radius: 1.25,
        max_height: 3.0,
        outlet_valve_coefficient: 0.016,
        water_pump_gain: 0.008,
        brine_pump_gain: 0.008,
    }
}

fn default_reservoir(name: &str) -> ReservoirConfig {
    ReservoirConfig {
        name: name.to_string(),
        radius: 1.75,
        max_height: 3.0,
        supply_valve_gain: 0.048,
    }
}

impl Default for PlantConfig {
    fn default() -> Self {
        PlantConfig {
            plant_name: "Five-Tank Brine Mixer".to_string(),
            timing: TimingConfig {
                integration_step: 0.5,
                control_period: 5.0,
                simulation_horizon: 3000.0,
            },
            reservoirs: [default_reservoir("A"), default_reservoir("B")],
            process_tanks: [
                default_process_tank("C"),
                default_process_tank("D"),
                default_process_tank("E"),
            ],
            brine_concentration: 360.0,
            equilibrium: EquilibriumConfig {
                reservoir_level: 1.5,
                process_level: 1.5,
                process_concentration: 180.0,
                supply_valve: 0.306,
                water_pump: 0.6125,
                brine_pump: 0.6125,
                outlet_valve: 0.5,
            },
            limits: LimitsConfig {
                level_min: 0.3,
                level_max: 2.7,
                concentration_min: 0.0,
                concentration_max: 360.0,
                supply_valve: [0.0, 1.0],
                water_pump: [0.0, 1.0],
                brine_pump: [0.0, 1.0],
                outlet_valve: [0.0, 1.0],
                rate: RateLimits {
                    water_pump: 0.5,
                    brine_pump: 0.5,
                    outlet_valve: 0.4,
                },
            },
            linear_model: LinearModelConfig {
                a: default_a_matrix(),
                b: default_b_matrix(),
            },
            mpc: MpcConfig {
                prediction_horizon: 40,
                control_horizon: 20,
                q: [300.0, 1000.0],
                r: [500.0, 500.0, 1000.0],
                i: [75.0, 250.0],
                slack_weight: 1e6,
                overshoot_limit: 0.01,
                undershoot_limit: 0.01,
                min_prediction_horizon: 10,
                min_control_horizon: 5,
                conservative_blend: 0.9,
            },
            pi: PiConfig {
                kp: 15.0,
                ki: 0.25,
                integral_limit: 10.0,
            },
            realtime: RealtimeTuning::default(),
        }
    }
}

fn ensure_positive(value: f64, what: &str) -> TankResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(TankError::ConfigError(format!(
            "{what} must be finite and > 0, got {value}"
        )));
    }
    Ok(())
}

fn ensure_band(band: [f64; 2], what: &str) -> TankResult<()> {
    if !(band[0].is_finite() && band[1].is_finite()) || band[0] > band[1] {
        return Err(TankError::ConfigError(format!(
            "{what} bounds must be finite with min <= max, got {band:?}"
        )));
    }
    Ok(())
}

fn to_array2(rows: &[Vec<f64>], shape: (usize, usize), what: &str) -> TankResult<Array2<f64>> {
    if rows.len() != shape.0 || rows.iter().any(|r| r.len() != shape.1) {
        return Err(TankError::ConfigError(format!(
            "{what} must be {}x{}",
            shape.0, shape.1
        )));
    }
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec(shape, flat).map_err(|e| TankError::ConfigError(e.to_string()))
}

impl PlantConfig {
    /// Load from JSON file.
    pub fn from_file(path: &str) -> TankResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject non-physical parameter sets.
    pub fn validate(&self) -> TankResult<()> {
        ensure_positive(self.timing.integration_step, "timing.integration_step")?;
        ensure_positive(self.timing.control_period, "timing.control_period")?;
        for r in &self.reservoirs {
            ensure_positive(r.radius, "reservoir radius")?;
            ensure_positive(r.max_height, "reservoir max_height")?;
            ensure_positive(r.supply_valve_gain, "reservoir supply_valve_gain")?;
        }
        for t in &self.process_tanks {
            ensure_positive(t.bottom_radius, "process bottom_radius")?;
            ensure_positive(t.top_radius, "process top_radius")?;
            ensure_positive(t.max_height, "process max_height")?;
            ensure_positive(t.outlet_valve_coefficient, "process outlet_valve_coefficient")?;
            ensure_positive(t.water_pump_gain, "process water_pump_gain")?;
            ensure_positive(t.brine_pump_gain, "process brine_pump_gain")?;
        }
        ensure_positive(self.brine_concentration, "brine_concentration")?;

        let l = &self.limits;
        ensure_band([l.level_min, l.level_max], "limits.level")?;
        ensure_band([l.concentration_min, l.concentration_max], "limits.concentration")?;
        ensure_band(l.supply_valve, "limits.supply_valve")?;
        ensure_band(l.water_pump, "limits.water_pump")?;
        ensure_band(l.brine_pump, "limits.brine_pump")?;
        ensure_band(l.outlet_valve, "limits.outlet_valve")?;
        ensure_positive(l.rate.water_pump, "limits.rate.water_pump")?;
        ensure_positive(l.rate.brine_pump, "limits.rate.brine_pump")?;
        ensure_positive(l.rate.outlet_valve, "limits.rate.outlet_valve")?;

        let m = &self.mpc;
        if m.prediction_horizon == 0 || m.control_horizon == 0 {
            return Err(TankError::ConfigError(
                "mpc horizons must be >= 1".to_string(),
            ));
        }
        if m.control_horizon > m.prediction_horizon {
            return Err(TankError::ConfigError(format!(
                "mpc control_horizon ({}) must not exceed prediction_horizon ({})",
                m.control_horizon, m.prediction_horizon
            )));
        }
        if m.min_prediction_horizon == 0
            || m.min_control_horizon == 0
            || m.min_control_horizon > m.min_prediction_horizon
        {
            return Err(TankError::ConfigError(
                "mpc minimum horizons must be >= 1 with min_control <= min_prediction".to_string(),
            ));
        }
        if m.q.iter().chain(m.r.iter()).chain(m.i.iter()).any(|w| !w.is_finite() || *w < 0.0) {
            return Err(TankError::ConfigError(
                "mpc weights must be finite and >= 0".to_string(),
            ));
        }
        ensure_positive(m.slack_weight, "mpc.slack_weight")?;
        if !(0.0..=1.0).contains(&m.conservative_blend) {
            return Err(TankError::ConfigError(format!(
                "mpc.conservative_blend must be in [0, 1], got {}",
                m.conservative_blend
            )));
        }
        if m.overshoot_limit < 0.0 || m.undershoot_limit < 0.0 {
            return Err(TankError::ConfigError(
                "mpc overshoot/undershoot limits must be >= 0".to_string(),
            ));
        }
        if self.pi.integral_limit < 0.0 {
            return Err(TankError::ConfigError(
                "pi.integral_limit must be >= 0".to_string(),
            ));
        }
        self.a_matrix()?;
        self.b_matrix()?;
        Ok(())
    }

    /// Continuous A (8×8).
    pub fn a_matrix(&self) -> TankResult<Array2<f64>> {
        to_array2(&self.linear_model.a, (N_STATES, N_STATES), "linear_model.a")
    }

    /// Continuous B (8×11).
    pub fn b_matrix(&self) -> TankResult<Array2<f64>> {
        to_array2(&self.linear_model.b, (N_STATES, N_CONTROLS), "linear_model.b")
    }

    /// Equilibrium state in vector order.
    pub fn equilibrium_state(&self) -> Array1<f64> {
        let e = &self.equilibrium;
        Array1::from_vec(vec![
            e.reservoir_level,
            e.reservoir_level,
            e.process_level,
            e.process_concentration,
            e.process_level,
            e.process_concentration,
            e.process_level,
            e.process_concentration,
        ])
    }

    /// Equilibrium actuator vector in vector order.
    pub fn equilibrium_controls(&self) -> Array1<f64> {
        let e = &self.equilibrium;
        let mut u = Vec::with_capacity(N_CONTROLS);
        u.push(e.supply_valve);
        u.push(e.supply_valve);
        for _ in 0..3 {
            u.extend_from_slice(&[e.water_pump, e.brine_pump, e.outlet_valve]);
        }
        Array1::from_vec(u)
    }

    /// Equilibrium `[level, concentration]` of a process tank.
    pub fn process_equilibrium_state(&self) -> [f64; PROCESS_STATES] {
        [
            self.equilibrium.process_level,
            self.equilibrium.process_concentration,
        ]
    }

    /// Equilibrium `[water, brine, outlet]` of a process tank.
    pub fn process_equilibrium_controls(&self) -> [f64; PROCESS_INPUTS] {
        let e = &self.equilibrium;
        [e.water_pump, e.brine_pump, e.outlet_valve]
    }

    /// `[min, max]` of an actuator.
    pub fn actuator_bounds(&self, actuator: Actuator) -> [f64; 2] {
        match actuator {
            Actuator::SupplyValve => self.limits.supply_valve,
            Actuator::WaterPump => self.limits.water_pump,
            Actuator::BrinePump => self.limits.brine_pump,
            Actuator::OutletValve => self.limits.outlet_valve,
        }
    }

    /// Maximum change per control cycle; supply valves are not rate limited.
    pub fn rate_limit(&self, actuator: Actuator) -> f64 {
        match actuator {
            Actuator::SupplyValve => f64::INFINITY,
            Actuator::WaterPump => self.limits.rate.water_pump,
            Actuator::BrinePump => self.limits.rate.brine_pump,
            Actuator::OutletValve => self.limits.rate.outlet_valve,
        }
    }

    /// Physical maximum height of a tank [m].
    pub fn max_height(&self, tank: TankId) -> f64 {
        match tank {
            TankId::A => self.reservoirs[0].max_height,
            TankId::B => self.reservoirs[1].max_height,
            other => {
                let p = other.process_index().unwrap_or(0);
                self.process_tanks[p].max_height
            }
        }
    }

    /// Per-component `[min, max]` of the 8-state vector.
    pub fn state_bounds(&self) -> [[f64; 2]; N_STATES] {
        let mut bounds = [[0.0, 0.0]; N_STATES];
        bounds[0] = [0.0, self.reservoirs[0].max_height];
        bounds[1] = [0.0, self.reservoirs[1].max_height];
        for (p, tank) in self.process_tanks.iter().enumerate() {
            bounds[2 + 2 * p] = [0.0, tank.max_height];
            bounds[3 + 2 * p] = [0.0, self.brine_concentration];
        }
        bounds
    }
}
