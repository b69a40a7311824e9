// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Tank Geometry and Dynamics
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Single-tank models.
//!
//! Cylindrical reservoir (level only):
//!   dh/dt = (Q_in − Q_out) / (π r²)
//!
//! Frustum process tank (level and concentration):
//!   r(h) = r_b + (r_t − r_b)/h_max · h
//!   A(h) = π r(h)²
//!   V(h) = π h/3 · (r_b² + r_b r(h) + r(h)²)
//!   dh/dt = (Q_w + Q_b − kv u₃ √h) / A(h)
//!   dC/dt = (Q_b C_brine − (Q_w + Q_b) C) / V(h)

use std::f64::consts::PI;
use tanks_types::config::{ProcessTankConfig, ReservoirConfig};
use tanks_types::constants::{AREA_EPSILON, VOLUME_EPSILON};

/// Cylindrical utility reservoir.
#[derive(Debug, Clone, PartialEq)]
pub struct CylindricalTank {
    pub radius: f64,
    pub max_height: f64,
    pub supply_valve_gain: f64,
    pub level: f64,
}

impl CylindricalTank {
    pub fn new(cfg: &ReservoirConfig, level: f64) -> Self {
        let mut tank = CylindricalTank {
            radius: cfg.radius,
            max_height: cfg.max_height,
            supply_valve_gain: cfg.supply_valve_gain,
            level,
        };
        tank.clamp();
        tank
    }

    pub fn area(&self) -> f64 {
        PI * self.radius * self.radius
    }

    /// Stored liquid volume [m³].
    pub fn volume(&self) -> f64 {
        self.area() * self.level
    }

    /// Supply inflow for a valve command [m³/s].
    pub fn inflow(&self, supply_valve: f64) -> f64 {
        self.supply_valve_gain * supply_valve
    }

    pub fn level_derivative(&self, inflow: f64, outflow: f64) -> f64 {
        let area = self.area();
        if area < AREA_EPSILON {
            return 0.0;
        }
        (inflow - outflow) / area
    }

    /// One RK4 step with flows held constant over `dt`.
    pub fn step_rk4(&mut self, inflow: f64, outflow: f64, dt: f64) {
        // Flows do not depend on level, so every stage sees the same slope.
        let k1 = self.level_derivative(inflow, outflow);
        let k2 = self.level_derivative(inflow, outflow);
        let k3 = self.level_derivative(inflow, outflow);
        let k4 = self.level_derivative(inflow, outflow);
        self.level += dt / 6.0 * (k1 + 2.0 * k2 + 2.0 * k3 + k4);
        self.clamp();
    }

    pub fn step_euler(&mut self, inflow: f64, outflow: f64, dt: f64) {
        self.level += dt * self.level_derivative(inflow, outflow);
        self.clamp();
    }

    pub fn clamp(&mut self) {
        self.level = self.level.clamp(0.0, self.max_height);
    }
}

/// Frustum-shaped process tank fed by a water pump and a brine pump and
/// drained by a Torricelli outlet valve.
#[derive(Debug, Clone, PartialEq)]
pub struct FrustumTank {
    pub bottom_radius: f64,
    pub top_radius: f64,
    pub max_height: f64,
    pub outlet_valve_coefficient: f64,
    pub water_pump_gain: f64,
    pub brine_pump_gain: f64,
    pub brine_concentration: f64,
    pub level: f64,
    pub concentration: f64,
}

impl FrustumTank {
    pub fn new(
        cfg: &ProcessTankConfig,
        brine_concentration: f64,
        level: f64,
        concentration: f64,
    ) -> Self {
        let mut tank = FrustumTank {
            bottom_radius: cfg.bottom_radius,
            top_radius: cfg.top_radius,
            max_height: cfg.max_height,
            outlet_valve_coefficient: cfg.outlet_valve_coefficient,
            water_pump_gain: cfg.water_pump_gain,
            brine_pump_gain: cfg.brine_pump_gain,
            brine_concentration,
            level,
            concentration,
        };
        tank.clamp();
        tank
    }

    /// Radius at height `h` [m].
    pub fn radius_at(&self, h: f64) -> f64 {
        self.bottom_radius + (self.top_radius - self.bottom_radius) / self.max_height * h
    }

    /// Cross-section area at height `h` [m²].
    pub fn area_at(&self, h: f64) -> f64 {
        let r = self.radius_at(h);
        PI * r * r
    }

    /// Liquid volume up to height `h` [m³].
    pub fn volume_at(&self, h: f64) -> f64 {
        let rb = self.bottom_radius;
        let r = self.radius_at(h);
        PI * h / 3.0 * (rb * rb + rb * r + r * r)
    }

    pub fn water_flow(&self, water_pump: f64) -> f64 {
        self.water_pump_gain * water_pump
    }

    pub fn brine_flow(&self, brine_pump: f64) -> f64 {
        self.brine_pump_gain * brine_pump
    }

    /// Torricelli discharge; zero for non-positive levels.
    pub fn outlet_flow(&self, h: f64, outlet_valve: f64) -> f64 {
        self.outlet_valve_coefficient * outlet_valve * h.max(0.0).sqrt()
    }

    /// dh/dt at height `h` for actuators `[water, brine, outlet]`.
    pub fn level_derivative(&self, h: f64, u: [f64; 3]) -> f64 {
        let area = self.area_at(h);
        if area < AREA_EPSILON {
            return 0.0;
        }
        let q_in = self.water_flow(u[0]) + self.brine_flow(u[1]);
        (q_in - self.outlet_flow(h, u[2])) / area
    }

    /// dC/dt at height `h` and concentration `c`.
    pub fn concentration_derivative(&self, h: f64, c: f64, u: [f64; 3]) -> f64 {
        let volume = self.volume_at(h);
        if volume < VOLUME_EPSILON {
            return 0.0;
        }
        let q_water = self.water_flow(u[0]);
        let q_brine = self.brine_flow(u[1]);
        (q_brine * self.brine_concentration - (q_water + q_brine) * c) / volume
    }

    /// One coupled RK4 step.
    ///
    /// Level stages run first with concentration frozen. Concentration
    /// stages then reuse the level stage points h₀, h₀+k₁dt/2, h₀+k₂dt/2,
    /// h₀+k₃dt while advancing C with the usual RK4 weights.
    pub fn step_rk4(&mut self, u: [f64; 3], dt: f64) {
        let h0 = self.level;
        let c0 = self.concentration;

        let k1h = self.level_derivative(h0, u);
        let k2h = self.level_derivative(h0 + 0.5 * dt * k1h, u);
        let k3h = self.level_derivative(h0 + 0.5 * dt * k2h, u);
        let k4h = self.level_derivative(h0 + dt * k3h, u);
        let stage_levels = [h0, h0 + 0.5 * dt * k1h, h0 + 0.5 * dt * k2h, h0 + dt * k3h];

        let k1c = self.concentration_derivative(stage_levels[0], c0, u);
        let k2c = self.concentration_derivative(stage_levels[1], c0 + 0.5 * dt * k1c, u);
        let k3c = self.concentration_derivative(stage_levels[2], c0 + 0.5 * dt * k2c, u);
        let k4c = self.concentration_derivative(stage_levels[3], c0 + dt * k3c, u);

        self.level = h0 + dt / 6.0 * (k1h + 2.0 * k2h + 2.0 * k3h + k4h);
        self.concentration = c0 + dt / 6.0 * (k1c + 2.0 * k2c + 2.0 * k3c + k4c);
        self.clamp();
    }

    pub fn step_euler(&mut self, u: [f64; 3], dt: f64) {
        let dh = self.level_derivative(self.level, u);
        let dc = self.concentration_derivative(self.level, self.concentration, u);
        self.level += dt * dh;
        self.concentration += dt * dc;
        self.clamp();
    }

    pub fn clamp(&mut self) {
        self.level = self.level.clamp(0.0, self.max_height);
        self.concentration = self.concentration.clamp(0.0, self.brine_concentration);
    }
}
