// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Tanks Control
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Control loops and session orchestration.
//!
//! MPC per process tank, PI per reservoir, the routing facade, measurement
//! noise, telemetry history and the real-time orchestrator.

pub mod constraints;
pub mod control_system;
pub mod mpc;
pub mod noise;
pub mod pi;
pub mod realtime;
pub mod telemetry;
