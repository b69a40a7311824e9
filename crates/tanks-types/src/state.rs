// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — State
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! State and control vocabulary shared by the model, the controllers and
//! the session layer.
//!
//! Vector order is fixed: states `[hA, hB, hC, CC, hD, CD, hE, CE]`,
//! controls `[uA, uB, uC1, uC2, uC3, uD1, uD2, uD3, uE1, uE2, uE3]`.
//! Named maps use `{tank_id}_level`, `{tank_id}_concentration` and
//! `{tank_id}_{actuator}` keys, e.g. `tank_c_level`, `tank_c_brine_pump`.

use crate::constants::{N_CONTROLS, N_STATES};
use crate::error::{TankError, TankResult};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named scalar values keyed by state or control key.
pub type NamedValues = BTreeMap<String, f64>;

/// The five tanks of the plant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TankId {
    A,
    B,
    C,
    D,
    E,
}

impl TankId {
    pub const ALL: [TankId; 5] = [TankId::A, TankId::B, TankId::C, TankId::D, TankId::E];
    pub const RESERVOIRS: [TankId; 2] = [TankId::A, TankId::B];
    pub const PROCESS: [TankId; 3] = [TankId::C, TankId::D, TankId::E];

    /// External identifier, e.g. `tank_c`.
    pub fn key(self) -> &'static str {
        match self {
            TankId::A => "tank_a",
            TankId::B => "tank_b",
            TankId::C => "tank_c",
            TankId::D => "tank_d",
            TankId::E => "tank_e",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.key() == key)
    }

    pub fn is_process(self) -> bool {
        matches!(self, TankId::C | TankId::D | TankId::E)
    }

    /// Position among the process tanks (C=0, D=1, E=2).
    pub fn process_index(self) -> Option<usize> {
        match self {
            TankId::C => Some(0),
            TankId::D => Some(1),
            TankId::E => Some(2),
            _ => None,
        }
    }

    /// Indices of `[level, concentration]` in the 8-state vector.
    pub fn process_state_indices(self) -> Option<[usize; 2]> {
        self.process_index().map(|p| [2 + 2 * p, 3 + 2 * p])
    }

    /// Indices of `[water, brine, outlet]` in the 11-control vector.
    pub fn process_control_indices(self) -> Option<[usize; 3]> {
        self.process_index().map(|p| [2 + 3 * p, 3 + 3 * p, 4 + 3 * p])
    }
}

impl fmt::Display for TankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Measured process variable of a tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variable {
    Level,
    Concentration,
}

impl Variable {
    pub fn name(self) -> &'static str {
        match self {
            Variable::Level => "level",
            Variable::Concentration => "concentration",
        }
    }
}

/// Actuator attached to a tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Actuator {
    SupplyValve,
    WaterPump,
    BrinePump,
    OutletValve,
}

impl Actuator {
    pub const PROCESS: [Actuator; 3] = [Actuator::WaterPump, Actuator::BrinePump, Actuator::OutletValve];

    pub fn name(self) -> &'static str {
        match self {
            Actuator::SupplyValve => "supply_valve",
            Actuator::WaterPump => "water_pump",
            Actuator::BrinePump => "brine_pump",
            Actuator::OutletValve => "outlet_valve",
        }
    }
}

/// State vector layout.
pub const STATE_LAYOUT: [(TankId, Variable); N_STATES] = [
    (TankId::A, Variable::Level),
    (TankId::B, Variable::Level),
    (TankId::C, Variable::Level),
    (TankId::C, Variable::Concentration),
    (TankId::D, Variable::Level),
    (TankId::D, Variable::Concentration),
    (TankId::E, Variable::Level),
    (TankId::E, Variable::Concentration),
];

/// Control vector layout.
pub const CONTROL_LAYOUT: [(TankId, Actuator); N_CONTROLS] = [
    (TankId::A, Actuator::SupplyValve),
    (TankId::B, Actuator::SupplyValve),
    (TankId::C, Actuator::WaterPump),
    (TankId::C, Actuator::BrinePump),
    (TankId::C, Actuator::OutletValve),
    (TankId::D, Actuator::WaterPump),
    (TankId::D, Actuator::BrinePump),
    (TankId::D, Actuator::OutletValve),
    (TankId::E, Actuator::WaterPump),
    (TankId::E, Actuator::BrinePump),
    (TankId::E, Actuator::OutletValve),
];

pub fn state_key(tank: TankId, variable: Variable) -> String {
    format!("{}_{}", tank.key(), variable.name())
}

pub fn control_key(tank: TankId, actuator: Actuator) -> String {
    format!("{}_{}", tank.key(), actuator.name())
}

/// State keys in vector order.
pub fn state_keys() -> Vec<String> {
    STATE_LAYOUT.iter().map(|&(t, v)| state_key(t, v)).collect()
}

/// Control keys in vector order.
pub fn control_keys() -> Vec<String> {
    CONTROL_LAYOUT.iter().map(|&(t, a)| control_key(t, a)).collect()
}

pub fn state_index(key: &str) -> Option<usize> {
    STATE_LAYOUT
        .iter()
        .position(|&(t, v)| state_key(t, v) == key)
}

pub fn control_index(key: &str) -> Option<usize> {
    CONTROL_LAYOUT
        .iter()
        .position(|&(t, a)| control_key(t, a) == key)
}

/// Convert an 8-state vector to a named map.
pub fn state_to_map(state: &Array1<f64>) -> NamedValues {
    STATE_LAYOUT
        .iter()
        .zip(state.iter())
        .map(|(&(t, v), &x)| (state_key(t, v), x))
        .collect()
}

/// Convert an 11-control vector to a named map.
pub fn controls_to_map(controls: &Array1<f64>) -> NamedValues {
    CONTROL_LAYOUT
        .iter()
        .zip(controls.iter())
        .map(|(&(t, a), &u)| (control_key(t, a), u))
        .collect()
}

/// Build a state vector from a named map, keeping `fallback` for absent keys.
/// Unknown keys are rejected.
pub fn state_from_map(values: &NamedValues, fallback: &Array1<f64>) -> TankResult<Array1<f64>> {
    if fallback.len() != N_STATES {
        return Err(TankError::InvalidArgument(format!(
            "fallback state must have {N_STATES} entries, got {}",
            fallback.len()
        )));
    }
    let mut out = fallback.clone();
    for (key, &value) in values {
        let idx = state_index(key)
            .ok_or_else(|| TankError::InvalidArgument(format!("unknown state key '{key}'")))?;
        out[idx] = value;
    }
    Ok(out)
}

/// Build a control vector from a named map, keeping `fallback` for absent keys.
/// Unknown keys are rejected.
pub fn controls_from_map(values: &NamedValues, fallback: &Array1<f64>) -> TankResult<Array1<f64>> {
    if fallback.len() != N_CONTROLS {
        return Err(TankError::InvalidArgument(format!(
            "fallback control must have {N_CONTROLS} entries, got {}",
            fallback.len()
        )));
    }
    let mut out = fallback.clone();
    for (key, &value) in values {
        let idx = control_index(key)
            .ok_or_else(|| TankError::InvalidArgument(format!("unknown control key '{key}'")))?;
        out[idx] = value;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_keys_order() {
        let keys = state_keys();
        assert_eq!(keys.len(), N_STATES);
        assert_eq!(keys[0], "tank_a_level");
        assert_eq!(keys[3], "tank_c_concentration");
        assert_eq!(keys[7], "tank_e_concentration");
    }

    #[test]
    fn test_control_keys_order() {
        let keys = control_keys();
        assert_eq!(keys.len(), N_CONTROLS);
        assert_eq!(keys[0], "tank_a_supply_valve");
        assert_eq!(keys[4], "tank_c_outlet_valve");
        assert_eq!(keys[9], "tank_e_brine_pump");
    }

    #[test]
    fn test_process_indices_match_layout() {
        for tank in TankId::PROCESS {
            let [h, c] = tank.process_state_indices().unwrap();
            assert_eq!(STATE_LAYOUT[h], (tank, Variable::Level));
            assert_eq!(STATE_LAYOUT[c], (tank, Variable::Concentration));
            let [u1, u2, u3] = tank.process_control_indices().unwrap();
            assert_eq!(CONTROL_LAYOUT[u1], (tank, Actuator::WaterPump));
            assert_eq!(CONTROL_LAYOUT[u2], (tank, Actuator::BrinePump));
            assert_eq!(CONTROL_LAYOUT[u3], (tank, Actuator::OutletValve));
        }
        assert!(TankId::A.process_state_indices().is_none());
    }

    #[test]
    fn test_state_map_roundtrip_partial() {
        let base = Array1::from_vec(vec![1.5, 1.5, 1.5, 180.0, 1.5, 180.0, 1.5, 180.0]);
        let mut partial = NamedValues::new();
        partial.insert("tank_d_concentration".to_string(), 200.0);
        let merged = state_from_map(&partial, &base).unwrap();
        assert_eq!(merged[5], 200.0);
        assert_eq!(merged[3], 180.0);
        let map = state_to_map(&merged);
        assert_eq!(map["tank_d_concentration"], 200.0);
        assert_eq!(map.len(), N_STATES);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let base = Array1::zeros(N_CONTROLS);
        let mut bad = NamedValues::new();
        bad.insert("tank_f_water_pump".to_string(), 0.5);
        assert!(controls_from_map(&bad, &base).is_err());
        assert!(state_from_map(&bad, &Array1::zeros(N_STATES)).is_err());
    }

    #[test]
    fn test_tank_id_from_key() {
        assert_eq!(TankId::from_key("tank_b"), Some(TankId::B));
        assert_eq!(TankId::from_key("tank_z"), None);
        assert_eq!(TankId::C.to_string(), "tank_c");
    }
}
