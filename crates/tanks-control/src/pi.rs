// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — PI
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! PI level controller for the utility reservoirs.
//!
//! u = Kp·e + Ki·∫e dt, with the integral clamped to ±integral_limit and
//! the output clamped to the supply valve range.

use tanks_types::config::PiConfig;

/// Reservoir level PI controller.
#[derive(Debug, Clone)]
pub struct PiController {
    pub kp: f64,
    pub ki: f64,
    pub integral_limit: f64,
    /// Sample period Ts [s].
    pub sample_time: f64,
    pub output_min: f64,
    pub output_max: f64,
    integral: f64,
}

impl PiController {
    pub fn new(config: &PiConfig, sample_time: f64, output_bounds: [f64; 2]) -> Self {
        PiController {
            kp: config.kp,
            ki: config.ki,
            integral_limit: config.integral_limit,
            sample_time,
            output_min: output_bounds[0],
            output_max: output_bounds[1],
            integral: 0.0,
        }
    }

    /// One PI step. Returns the valve command.
    pub fn step(&mut self, setpoint: f64, measured: f64) -> f64 {
        let error = setpoint - measured;
        self.integral = (self.integral + error * self.sample_time)
            .clamp(-self.integral_limit, self.integral_limit);
        (self.kp * error + self.ki * self.integral).clamp(self.output_min, self.output_max)
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Reset accumulated state.
    pub fn reset(&mut self) {
        self.integral = 0.0;
    }
}
