// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Five-Tank System
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Composition of the two reservoirs and three process tanks.
//!
//! Reservoir A feeds every water pump, reservoir B every brine pump. Each
//! reservoir outflow is recomputed from the pump commands on every step.

use crate::tanks::{CylindricalTank, FrustumTank};
use ndarray::Array1;
use std::str::FromStr;
use std::sync::Arc;
use tanks_types::config::PlantConfig;
use tanks_types::constants::{N_CONTROLS, N_STATES, TIME_EPSILON};
use tanks_types::error::{TankError, TankResult};
use tanks_types::state::{
    controls_from_map, state_from_map, state_to_map, NamedValues, TankId, CONTROL_LAYOUT,
};

/// Numerical integration scheme used by `TankSystem::advance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntegrationMethod {
    /// Coupled RK4 repeated at the configured micro-step.
    #[default]
    Rk4,
    /// One explicit Euler step over the whole interval.
    Euler,
}

impl FromStr for IntegrationMethod {
    type Err = TankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rk4" => Ok(IntegrationMethod::Rk4),
            "euler" => Ok(IntegrationMethod::Euler),
            other => Err(TankError::InvalidArgument(format!(
                "unknown integration method '{other}', expected 'rk4' or 'euler'"
            ))),
        }
    }
}

/// Input accepted by `TankSystem::set_state`.
#[derive(Debug, Clone, PartialEq)]
pub enum StateInput {
    /// Full 8-state vector.
    Vector(Array1<f64>),
    /// Partial map; absent keys keep their current value.
    Named(NamedValues),
}

/// Supply and draw of one reservoir [m³/s].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReservoirFlows {
    pub inflow: f64,
    pub outflow: f64,
}

/// Nonlinear five-tank plant.
#[derive(Debug, Clone)]
pub struct TankSystem {
    config: Arc<PlantConfig>,
    reservoirs: [CylindricalTank; 2],
    process: [FrustumTank; 3],
    last_controls: Array1<f64>,
    elapsed: f64,
}

impl TankSystem {
    /// Plant at the configured equilibrium with equilibrium actuators.
    pub fn new(config: Arc<PlantConfig>) -> Self {
        let eq = &config.equilibrium;
        let reservoirs = [
            CylindricalTank::new(&config.reservoirs[0], eq.reservoir_level),
            CylindricalTank::new(&config.reservoirs[1], eq.reservoir_level),
        ];
        let process = [0, 1, 2].map(|p| {
            FrustumTank::new(
                &config.process_tanks[p],
                config.brine_concentration,
                eq.process_level,
                eq.process_concentration,
            )
        });
        let last_controls = config.equilibrium_controls();
        TankSystem {
            config,
            reservoirs,
            process,
            last_controls,
            elapsed: 0.0,
        }
    }

    pub fn config(&self) -> &PlantConfig {
        &self.config
    }

    /// `[hA, hB, hC, CC, hD, CD, hE, CE]`
    pub fn get_state(&self) -> Array1<f64> {
        let mut x = Array1::zeros(N_STATES);
        x[0] = self.reservoirs[0].level;
        x[1] = self.reservoirs[1].level;
        for (p, tank) in self.process.iter().enumerate() {
            x[2 + 2 * p] = tank.level;
            x[3 + 2 * p] = tank.concentration;
        }
        x
    }

    pub fn state_map(&self) -> NamedValues {
        state_to_map(&self.get_state())
    }

    /// Clamp each state component to its physical bounds.
    pub fn clamp_state(&self, state: &Array1<f64>) -> Array1<f64> {
        let bounds = self.config.state_bounds();
        Array1::from_iter(
            state
                .iter()
                .zip(bounds.iter())
                .map(|(&v, &[lo, hi])| v.clamp(lo, hi)),
        )
    }

    /// Clamp each actuator command to its configured range.
    pub fn clamp_controls(&self, controls: &Array1<f64>) -> Array1<f64> {
        Array1::from_iter(controls.iter().zip(CONTROL_LAYOUT.iter()).map(
            |(&u, &(_, actuator))| {
                let [lo, hi] = self.config.actuator_bounds(actuator);
                u.clamp(lo, hi)
            },
        ))
    }

    /// Overwrite the plant state; returns the clamped state actually stored.
    pub fn set_state(&mut self, input: StateInput) -> TankResult<Array1<f64>> {
        let raw = match input {
            StateInput::Vector(v) => {
                if v.len() != N_STATES {
                    return Err(TankError::InvalidArgument(format!(
                        "state vector must have {N_STATES} entries, got {}",
                        v.len()
                    )));
                }
                v
            }
            StateInput::Named(map) => state_from_map(&map, &self.get_state())?,
        };
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(TankError::InvalidArgument(
                "state contains non-finite values".to_string(),
            ));
        }
        let x = self.clamp_state(&raw);
        self.reservoirs[0].level = x[0];
        self.reservoirs[1].level = x[1];
        for (p, tank) in self.process.iter_mut().enumerate() {
            tank.level = x[2 + 2 * p];
            tank.concentration = x[3 + 2 * p];
        }
        Ok(x)
    }

    /// Control vector from a named map; absent keys fall back to the last
    /// applied controls.
    pub fn controls_from_map(&self, values: &NamedValues) -> TankResult<Array1<f64>> {
        controls_from_map(values, &self.last_controls)
    }

    /// Integrate the plant over `dt` seconds with `controls` held constant.
    ///
    /// Controls are clamped to their actuator bounds first. `dt == 0` leaves
    /// the plant untouched. Argument errors leave the plant untouched too.
    pub fn advance(
        &mut self,
        controls: &[f64],
        dt: f64,
        method: IntegrationMethod,
    ) -> TankResult<Array1<f64>> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(TankError::InvalidArgument(format!(
                "dt must be finite and >= 0, got {dt}"
            )));
        }
        if controls.len() != N_CONTROLS {
            return Err(TankError::InvalidArgument(format!(
                "control vector must have {N_CONTROLS} entries, got {}",
                controls.len()
            )));
        }
        if controls.iter().any(|u| !u.is_finite()) {
            return Err(TankError::InvalidArgument(
                "control vector contains non-finite values".to_string(),
            ));
        }
        if dt == 0.0 {
            return Ok(self.get_state());
        }

        let u = self.clamp_controls(&Array1::from_vec(controls.to_vec()));
        match method {
            IntegrationMethod::Rk4 => {
                let step = self.config.timing.integration_step;
                let mut remaining = dt;
                let mut micro_steps = 0usize;
                while remaining > TIME_EPSILON {
                    let h = step.min(remaining);
                    self.step(&u, h, IntegrationMethod::Rk4);
                    remaining -= h;
                    micro_steps += 1;
                }
                log::debug!("advanced {dt}s in {micro_steps} RK4 micro-steps");
            }
            IntegrationMethod::Euler => self.step(&u, dt, IntegrationMethod::Euler),
        }
        self.last_controls = u;
        self.elapsed += dt;
        Ok(self.get_state())
    }

    fn step(&mut self, u: &Array1<f64>, dt: f64, method: IntegrationMethod) {
        let flows = self.flows_for(u);
        for (tank, flow) in self.reservoirs.iter_mut().zip(flows.iter()) {
            match method {
                IntegrationMethod::Rk4 => tank.step_rk4(flow.inflow, flow.outflow, dt),
                IntegrationMethod::Euler => tank.step_euler(flow.inflow, flow.outflow, dt),
            }
        }
        for (p, tank) in self.process.iter_mut().enumerate() {
            let cmd = [u[2 + 3 * p], u[3 + 3 * p], u[4 + 3 * p]];
            match method {
                IntegrationMethod::Rk4 => tank.step_rk4(cmd, dt),
                IntegrationMethod::Euler => tank.step_euler(cmd, dt),
            }
        }
    }

    fn flows_for(&self, u: &Array1<f64>) -> [ReservoirFlows; 2] {
        let water_draw: f64 = self
            .process
            .iter()
            .enumerate()
            .map(|(p, t)| t.water_flow(u[2 + 3 * p]))
            .sum();
        let brine_draw: f64 = self
            .process
            .iter()
            .enumerate()
            .map(|(p, t)| t.brine_flow(u[3 + 3 * p]))
            .sum();
        [
            ReservoirFlows {
                inflow: self.reservoirs[0].inflow(u[0]),
                outflow: water_draw,
            },
            ReservoirFlows {
                inflow: self.reservoirs[1].inflow(u[1]),
                outflow: brine_draw,
            },
        ]
    }

    /// Reservoir A and B flows under the last applied controls.
    pub fn reservoir_flows(&self) -> [ReservoirFlows; 2] {
        self.flows_for(&self.last_controls)
    }

    pub fn last_controls(&self) -> &Array1<f64> {
        &self.last_controls
    }

    /// Simulated time integrated so far [s].
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn reservoir(&self, tank: TankId) -> Option<&CylindricalTank> {
        match tank {
            TankId::A => Some(&self.reservoirs[0]),
            TankId::B => Some(&self.reservoirs[1]),
            _ => None,
        }
    }

    pub fn process_tank(&self, tank: TankId) -> Option<&FrustumTank> {
        tank.process_index().map(|p| &self.process[p])
    }
}
