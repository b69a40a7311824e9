// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Actuator Constraints
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Actuator range and per-cycle rate limits.

use tanks_types::config::PlantConfig;
use tanks_types::state::Actuator;

/// Range and rate limit of one actuator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActuatorLimit {
    pub min_value: f64,
    pub max_value: f64,
    /// Maximum change per control cycle.
    pub max_step: f64,
}

impl ActuatorLimit {
    pub fn new(min: f64, max: f64, max_step: f64) -> Self {
        Self {
            min_value: min,
            max_value: max,
            max_step,
        }
    }

    pub fn from_config(config: &PlantConfig, actuator: Actuator) -> Self {
        let [min, max] = config.actuator_bounds(actuator);
        Self::new(min, max, config.rate_limit(actuator))
    }

    /// Limits for `[water, brine, outlet]` of a process tank.
    pub fn process_tank(config: &PlantConfig) -> [ActuatorLimit; 3] {
        Actuator::PROCESS.map(|a| Self::from_config(config, a))
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min_value, self.max_value)
    }

    /// Rate-limit `requested` around `previous`, then clamp to range.
    pub fn enforce(&self, requested: f64, previous: f64) -> f64 {
        let delta = (requested - previous).clamp(-self.max_step, self.max_step);
        self.clamp(previous + delta)
    }
}
