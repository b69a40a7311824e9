// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Constants
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
/// Number of dynamic states: hA, hB, hC, CC, hD, CD, hE, CE.
pub const N_STATES: usize = 8;

/// Number of actuators: uA, uB, then (water, brine, outlet) for C, D, E.
pub const N_CONTROLS: usize = 11;

/// States per process-tank sub-model: [level, concentration].
pub const PROCESS_STATES: usize = 2;

/// Inputs per process-tank sub-model: [water pump, brine pump, outlet valve].
pub const PROCESS_INPUTS: usize = 3;

/// Cross-section area below which the level derivative is forced to zero [m²].
pub const AREA_EPSILON: f64 = 1e-9;

/// Liquid volume below which the concentration derivative is forced to zero [m³].
pub const VOLUME_EPSILON: f64 = 1e-9;

/// Leftover integration time that is dropped instead of taking a micro-step [s].
pub const TIME_EPSILON: f64 = 1e-9;
