// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — Real-Time Orchestrator
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Real-time session: plant, controllers and telemetry on one clock.
//!
//! Three due-timestamps share a single cooperative timer:
//!   physics   every `integration_step` (advance by the elapsed time)
//!   control   every `control_period`
//!   telemetry every `sampling_interval`
//!
//! [`RealtimeOrchestrator::poll`] is synchronous and takes `now`
//! explicitly; [`run_session`] drives it from a tokio task. Commands are
//! applied only between polls.

use crate::control_system::{ControlSystem, MpcDiagnostic};
use crate::noise::MeasurementNoise;
use crate::telemetry::{TelemetryFrame, TelemetryHistory};
use ndarray::Array1;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tanks_model::system::{IntegrationMethod, StateInput, TankSystem};
use tanks_types::config::PlantConfig;
use tanks_types::constants::TIME_EPSILON;
use tanks_types::error::{TankError, TankResult};
use tanks_types::state::{
    controls_from_map, controls_to_map, state_from_map, state_to_map, NamedValues, TankId,
};
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::sync::mpsc::{Sender, UnboundedReceiver};

/// Operating point a session starts from and resets to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquilibriumPoint {
    /// Keyed by tank id (`tank_a` … `tank_e`).
    pub levels: NamedValues,
    /// Keyed by process tank id (`tank_c` … `tank_e`).
    pub concentrations: NamedValues,
    /// Keyed `tank_x_actuator`.
    pub controls: NamedValues,
}

impl EquilibriumPoint {
    pub fn from_config(config: &PlantConfig) -> Self {
        let eq = &config.equilibrium;
        let levels = TankId::ALL
            .into_iter()
            .map(|t| {
                let h = if t.is_process() {
                    eq.process_level
                } else {
                    eq.reservoir_level
                };
                (t.key().to_string(), h)
            })
            .collect();
        let concentrations = TankId::PROCESS
            .into_iter()
            .map(|t| (t.key().to_string(), eq.process_concentration))
            .collect();
        EquilibriumPoint {
            levels,
            concentrations,
            controls: controls_to_map(&config.equilibrium_controls()),
        }
    }

    /// Flatten to state keys (`tank_c_level`, `tank_c_concentration`, …).
    pub fn state_map(&self) -> NamedValues {
        let levels = self
            .levels
            .iter()
            .map(|(tank, h)| (format!("{tank}_level"), *h));
        let concentrations = self
            .concentrations
            .iter()
            .map(|(tank, c)| (format!("{tank}_concentration"), *c));
        levels.chain(concentrations).collect()
    }
}

/// Initialization payload of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub equilibrium_point: EquilibriumPoint,
    /// Telemetry period [s].
    pub sampling_interval: f64,
    #[serde(default)]
    pub enable_noise: bool,
    #[serde(default)]
    pub noise_level: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SessionConfig {
    /// Session at the plant's configured equilibrium, noise off.
    pub fn canonical(config: &PlantConfig, sampling_interval: f64) -> Self {
        SessionConfig {
            equilibrium_point: EquilibriumPoint::from_config(config),
            sampling_interval,
            enable_noise: false,
            noise_level: 0.0,
            seed: None,
        }
    }

    pub fn validate(&self) -> TankResult<()> {
        if !self.sampling_interval.is_finite() || self.sampling_interval <= 0.0 {
            return Err(TankError::ConfigError(format!(
                "sampling_interval must be > 0, got {}",
                self.sampling_interval
            )));
        }
        if self.enable_noise && (!self.noise_level.is_finite() || self.noise_level < 0.0) {
            return Err(TankError::ConfigError(format!(
                "noise_level must be >= 0, got {}",
                self.noise_level
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetpointCommand {
    pub tank_id: String,
    pub variable: String,
    pub value: f64,
}

/// Commands accepted from the transport, `{"type": …, "data": {…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Command {
    Setpoint(SetpointCommand),
    Pause {},
    Resume {},
    Reset {},
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Uninitialized,
    Running,
    Paused,
    Stopped,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: Option<String>,
    pub phase: SessionPhase,
    pub is_running: bool,
    pub is_paused: bool,
    pub variables: NamedValues,
    pub setpoints: NamedValues,
    pub controls: NamedValues,
}

/// What one `poll` did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tick {
    pub control_ran: bool,
    pub diagnostics: Vec<MpcDiagnostic>,
    /// Seconds integrated, if physics advanced.
    pub physics_dt: Option<f64>,
    pub telemetry: Option<TelemetryFrame>,
}

/// Cooperative stop flag, checked at the top of each poll.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Session {
    id: String,
    plant: TankSystem,
    control: ControlSystem,
    noise: Option<MeasurementNoise>,
    equilibrium_state: Array1<f64>,
    equilibrium_controls: Array1<f64>,
    variables: NamedValues,
    setpoints: NamedValues,
    controls: NamedValues,
    control_vector: Array1<f64>,
    sampling: Duration,
    started_at: Instant,
    last_control: Instant,
    last_physics: Instant,
    next_telemetry: Instant,
}

impl Session {
    fn measure(&mut self) -> NamedValues {
        let x = self.plant.get_state();
        match self.noise.as_mut() {
            Some(noise) => state_to_map(&noise.apply(&x)),
            None => state_to_map(&x),
        }
    }

    fn rebase(&mut self, now: Instant) {
        self.last_control = now;
        self.last_physics = now;
        self.next_telemetry = now;
    }
}

fn seconds_between(later: Instant, earlier: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

fn period(seconds: f64, what: &str) -> TankResult<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| TankError::ConfigError(format!("{what} = {seconds}: {e}")))
}

fn new_session_id() -> String {
    let id: u128 = rand::thread_rng().gen();
    format!("{id:032x}")
}

/// Owns one plant and one control system for the lifetime of a session.
pub struct RealtimeOrchestrator {
    config: Arc<PlantConfig>,
    session: Option<Session>,
    phase: SessionPhase,
    history: TelemetryHistory,
    cancel: CancelHandle,
    control_period: Duration,
    integration_step: Duration,
}

impl RealtimeOrchestrator {
    pub fn new(config: Arc<PlantConfig>) -> TankResult<Self> {
        config.validate()?;
        let control_period = period(config.timing.control_period, "control_period")?;
        let integration_step = period(config.timing.integration_step, "integration_step")?;
        let history = TelemetryHistory::new(config.realtime.history_capacity);
        Ok(RealtimeOrchestrator {
            config,
            session: None,
            phase: SessionPhase::Uninitialized,
            history,
            cancel: CancelHandle::default(),
            control_period,
            integration_step,
        })
    }

    /// Start a session at the given equilibrium; returns its id.
    ///
    /// Replaces any previous session.
    pub fn initialize(&mut self, session: SessionConfig, now: Instant) -> TankResult<String> {
        session.validate()?;
        let sampling = period(session.sampling_interval, "sampling_interval")?;
        let equilibrium_state = state_from_map(
            &session.equilibrium_point.state_map(),
            &self.config.equilibrium_state(),
        )?;
        let equilibrium_controls = controls_from_map(
            &session.equilibrium_point.controls,
            &self.config.equilibrium_controls(),
        )?;

        let mut plant = TankSystem::new(Arc::clone(&self.config));
        let equilibrium_state = plant.set_state(StateInput::Vector(equilibrium_state))?;
        let equilibrium_controls = plant.clamp_controls(&equilibrium_controls);
        let mut control = ControlSystem::new(Arc::clone(&self.config))?;
        control.prime(&equilibrium_controls)?;
        let noise = if session.enable_noise {
            Some(MeasurementNoise::new(
                session.noise_level,
                self.config.state_bounds(),
                session.seed,
            )?)
        } else {
            None
        };

        let id = new_session_id();
        let variables = state_to_map(&equilibrium_state);
        self.session = Some(Session {
            id: id.clone(),
            plant,
            control,
            noise,
            setpoints: variables.clone(),
            variables,
            controls: controls_to_map(&equilibrium_controls),
            control_vector: equilibrium_controls.clone(),
            equilibrium_state,
            equilibrium_controls,
            sampling,
            started_at: now,
            last_control: now,
            last_physics: now,
            next_telemetry: now,
        });
        self.history.clear();
        self.phase = SessionPhase::Running;
        log::info!(
            "session {id} initialized: sampling={}s, noise={}",
            session.sampling_interval,
            if session.enable_noise {
                session.noise_level
            } else {
                0.0
            }
        );
        Ok(id)
    }

    /// Run whatever is due at `now`: control, then physics, then telemetry.
    pub fn poll(&mut self, now: Instant) -> TankResult<Tick> {
        let mut tick = Tick::default();
        if self.cancel.is_cancelled() && self.phase != SessionPhase::Stopped {
            log::info!("cancellation observed");
            self.shutdown();
        }
        if self.phase != SessionPhase::Running {
            return Ok(tick);
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(tick);
        };

        let control_period = self.control_period.as_secs_f64();
        if seconds_between(now, session.last_control) >= control_period - TIME_EPSILON {
            let measured = session.measure();
            let output = session.control.compute(&measured, &session.setpoints)?;
            for d in output.diagnostics.iter().filter(|d| d.rung.is_degraded()) {
                log::warn!(
                    "MPC {}: {:?} after {} iterations",
                    d.tank,
                    d.rung,
                    d.iterations
                );
            }
            session.controls = output.controls;
            session.control_vector = output.vector;
            session.last_control = now;
            tick.control_ran = true;
            tick.diagnostics = output.diagnostics;
        }

        let integration_step = self.integration_step.as_secs_f64();
        let dt = seconds_between(now, session.last_physics);
        if dt >= integration_step - TIME_EPSILON {
            let controls = session.control_vector.to_vec();
            session.plant.advance(&controls, dt, IntegrationMethod::Rk4)?;
            session.last_physics = now;
            tick.physics_dt = Some(dt);
            log::debug!("physics advanced by {dt:.3}s");
        }

        session.variables = session.measure();

        if now >= session.next_telemetry {
            let frame = TelemetryFrame {
                timestamp: seconds_between(now, session.started_at),
                variables: session.variables.clone(),
                setpoints: session.setpoints.clone(),
                controls: session.controls.clone(),
            };
            self.history.record(&frame);
            session.next_telemetry = now + session.sampling;
            tick.telemetry = Some(frame);
        }
        Ok(tick)
    }

    /// Earliest instant at which `poll` has work, while running.
    pub fn next_due(&self) -> Option<Instant> {
        if self.phase != SessionPhase::Running {
            return None;
        }
        self.session.as_ref().map(|s| {
            (s.last_control + self.control_period)
                .min(s.last_physics + self.integration_step)
                .min(s.next_telemetry)
        })
    }

    /// Overwrite the setpoint `{tank_id}_{variable}`. Unknown keys and
    /// non-finite values are ignored; returns whether it was applied.
    pub fn update_setpoint(&mut self, tank_id: &str, variable: &str, value: f64) -> bool {
        let threshold = self.config.realtime.integrator_reset_threshold;
        let Some(session) = self.session.as_mut() else {
            log::warn!("setpoint {tank_id}_{variable} ignored: no session");
            return false;
        };
        let key = format!("{tank_id}_{variable}");
        if !value.is_finite() {
            log::warn!("setpoint {key} ignored: non-finite value {value}");
            return false;
        }
        let Some(current) = session.setpoints.get_mut(&key) else {
            log::warn!("setpoint {key} ignored: unknown key");
            return false;
        };
        let previous = std::mem::replace(current, value);
        log::info!("setpoint {key}: {previous} -> {value}");

        if let Some(tank) = TankId::from_key(tank_id).filter(|t| t.is_process()) {
            let reference = state_to_map(&session.equilibrium_state)
                .get(&key)
                .map_or(0.0, |v| v.abs());
            if (value - previous).abs() > threshold * reference {
                if let Err(e) = session.control.reset_integrator(tank) {
                    log::warn!("integrator reset for {tank} failed: {e}");
                }
            }
        }
        true
    }

    pub fn pause(&mut self) -> TankResult<()> {
        match self.phase {
            SessionPhase::Running => {
                self.phase = SessionPhase::Paused;
                log::info!("session paused");
                Ok(())
            }
            SessionPhase::Paused => Ok(()),
            phase => Err(TankError::Session(format!("cannot pause from {phase:?}"))),
        }
    }

    /// Continue from `now` as if no time had passed while paused.
    pub fn resume(&mut self, now: Instant) -> TankResult<()> {
        match self.phase {
            SessionPhase::Paused => {
                if let Some(session) = self.session.as_mut() {
                    session.rebase(now);
                }
                self.phase = SessionPhase::Running;
                log::info!("session resumed");
                Ok(())
            }
            SessionPhase::Running => Ok(()),
            phase => Err(TankError::Session(format!("cannot resume from {phase:?}"))),
        }
    }

    /// Restore plant, setpoints and actuators to the equilibrium point.
    /// Controller accumulators are left as they are.
    pub fn reset(&mut self, now: Instant) -> TankResult<()> {
        if !matches!(self.phase, SessionPhase::Running | SessionPhase::Paused) {
            return Err(TankError::Session(format!(
                "cannot reset from {:?}",
                self.phase
            )));
        }
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| TankError::Session("no active session".to_string()))?;
        session
            .plant
            .set_state(StateInput::Vector(session.equilibrium_state.clone()))?;
        session.setpoints = state_to_map(&session.equilibrium_state);
        session.variables = session.setpoints.clone();
        session.control_vector = session.equilibrium_controls.clone();
        session.controls = controls_to_map(&session.equilibrium_controls);
        session.rebase(now);
        self.history.clear();
        log::info!("session {} reset to equilibrium", session.id);
        Ok(())
    }

    /// Stop the session. Model and controller state stay in memory.
    pub fn shutdown(&mut self) {
        if self.phase != SessionPhase::Stopped {
            self.phase = SessionPhase::Stopped;
            log::info!("session shut down");
        }
    }

    pub fn apply(&mut self, command: Command, now: Instant) {
        let result = match command {
            Command::Setpoint(cmd) => {
                self.update_setpoint(&cmd.tank_id, &cmd.variable, cmd.value);
                Ok(())
            }
            Command::Pause {} => self.pause(),
            Command::Resume {} => self.resume(now),
            Command::Reset {} => self.reset(now),
        };
        if let Err(e) = result {
            log::warn!("command ignored: {e}");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (session_id, variables, setpoints, controls) = match &self.session {
            Some(s) => (
                Some(s.id.clone()),
                s.variables.clone(),
                s.setpoints.clone(),
                s.controls.clone(),
            ),
            None => Default::default(),
        };
        SessionSnapshot {
            session_id,
            phase: self.phase,
            is_running: matches!(self.phase, SessionPhase::Running | SessionPhase::Paused),
            is_paused: self.phase == SessionPhase::Paused,
            variables,
            setpoints,
            controls,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.id.as_str())
    }

    pub fn history(&self) -> &TelemetryHistory {
        &self.history
    }

    pub fn plant(&self) -> Option<&TankSystem> {
        self.session.as_ref().map(|s| &s.plant)
    }

    pub fn control_system(&self) -> Option<&ControlSystem> {
        self.session.as_ref().map(|s| &s.control)
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wake-up period when nothing is due (paused or idle).
    fn idle_interval(&self) -> Duration {
        self.session
            .as_ref()
            .map_or(self.control_period, |s| s.sampling)
    }
}

/// Drive an initialized orchestrator until shutdown, cancellation or
/// transport disconnect (command channel closed). Telemetry is sent with
/// `try_send`; a full or closed channel drops the frame and the session
/// keeps running.
pub async fn run_session(
    mut orchestrator: RealtimeOrchestrator,
    mut commands: UnboundedReceiver<Command>,
    telemetry: Sender<TelemetryFrame>,
) -> RealtimeOrchestrator {
    if orchestrator.phase() == SessionPhase::Uninitialized {
        log::warn!("run_session called without an initialized session");
        return orchestrator;
    }
    let now = || tokio::time::Instant::now().into_std();
    let mut telemetry_dropped = false;

    loop {
        if orchestrator.cancel.is_cancelled() {
            orchestrator.shutdown();
            break;
        }
        loop {
            match commands.try_recv() {
                Ok(command) => orchestrator.apply(command, now()),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log::info!("command channel closed");
                    orchestrator.shutdown();
                    return orchestrator;
                }
            }
        }
        if orchestrator.phase() == SessionPhase::Stopped {
            break;
        }

        match orchestrator.poll(now()) {
            Ok(tick) => {
                if let Some(frame) = tick.telemetry {
                    match telemetry.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            log::debug!("telemetry frame dropped: channel full")
                        }
                        Err(TrySendError::Closed(_)) => {
                            if !telemetry_dropped {
                                log::warn!("telemetry receiver closed; frames are dropped");
                                telemetry_dropped = true;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                log::error!("session step failed: {e}");
                orchestrator.shutdown();
                break;
            }
        }

        let wake = orchestrator
            .next_due()
            .unwrap_or_else(|| now() + orchestrator.idle_interval());
        tokio::select! {
            _ = tokio::time::sleep_until(tokio::time::Instant::from_std(wake)) => {}
            command = commands.recv() => match command {
                Some(command) => orchestrator.apply(command, now()),
                None => {
                    log::info!("command channel closed");
                    orchestrator.shutdown();
                    break;
                }
            },
        }
    }
    orchestrator
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn config() -> Arc<PlantConfig> {
        Arc::new(PlantConfig::default())
    }

    fn at(t0: Instant, seconds: f64) -> Instant {
        t0 + Duration::from_secs_f64(seconds)
    }

    fn started(sampling: f64) -> (RealtimeOrchestrator, Instant) {
        let cfg = config();
        let mut orch = RealtimeOrchestrator::new(Arc::clone(&cfg)).unwrap();
        let t0 = Instant::now();
        orch.initialize(SessionConfig::canonical(&cfg, sampling), t0)
            .unwrap();
        (orch, t0)
    }

    #[test]
    fn test_initialize_sets_equilibrium() {
        let (orch, _) = started(1.0);
        let snap = orch.snapshot();
        assert_eq!(snap.phase, SessionPhase::Running);
        assert!(snap.is_running && !snap.is_paused);
        assert_eq!(snap.session_id.as_deref().map(str::len), Some(32));
        assert_eq!(snap.variables.len(), 8);
        assert_eq!(snap.variables, snap.setpoints);
        assert_eq!(snap.variables["tank_d_concentration"], 180.0);
        assert_eq!(snap.controls.len(), 11);
        assert_eq!(snap.controls["tank_e_outlet_valve"], 0.5);
    }

    #[test]
    fn test_uninitialized_poll_is_idle() {
        let mut orch = RealtimeOrchestrator::new(config()).unwrap();
        let tick = orch.poll(Instant::now()).unwrap();
        assert_eq!(tick, Tick::default());
        assert!(orch.next_due().is_none());
        assert!(orch.pause().is_err());
        assert!(!orch.update_setpoint("tank_c", "level", 1.7));
    }

    #[test]
    fn test_invalid_session_rejected() {
        let cfg = config();
        let mut orch = RealtimeOrchestrator::new(Arc::clone(&cfg)).unwrap();
        let mut session = SessionConfig::canonical(&cfg, 0.0);
        assert!(orch.initialize(session.clone(), Instant::now()).is_err());
        session.sampling_interval = 1.0;
        session
            .equilibrium_point
            .levels
            .insert("tank_z".to_string(), 1.0);
        assert!(orch.initialize(session, Instant::now()).is_err());
        assert_eq!(orch.phase(), SessionPhase::Uninitialized);
    }

    #[test]
    fn test_three_timing_domains() {
        let (mut orch, t0) = started(2.0);
        let first = orch.poll(t0).unwrap();
        assert!(!first.control_ran);
        assert_eq!(first.physics_dt, None);
        assert_eq!(first.telemetry.map(|f| f.timestamp), Some(0.0));

        let tick = orch.poll(at(t0, 0.5)).unwrap();
        assert!((tick.physics_dt.unwrap() - 0.5).abs() < 1e-9);
        assert!(tick.telemetry.is_none());

        let tick = orch.poll(at(t0, 5.0)).unwrap();
        assert!(tick.control_ran);
        assert_eq!(tick.diagnostics.len(), 3);
        assert!((tick.physics_dt.unwrap() - 4.5).abs() < 1e-9);
        let frame = tick.telemetry.unwrap();
        assert!((frame.timestamp - 5.0).abs() < 1e-9);
        assert_eq!(orch.history().len(), 2);

        let due = orch.next_due().unwrap();
        assert_eq!(due, at(t0, 5.5));
    }

    #[test]
    fn test_equilibrium_session_stays_put() {
        let (mut orch, t0) = started(5.0);
        for k in 0..=120 {
            orch.poll(at(t0, k as f64 * 0.5)).unwrap();
        }
        let x = orch.plant().unwrap().get_state();
        let eq = PlantConfig::default().equilibrium_state();
        // The reservoir PIs carry no bias, so A and B sag until the integral
        // takes over.
        for i in 0..8 {
            let tol = if i < 2 { 0.02 } else { 0.01 };
            let rel = (x[i] - eq[i]).abs() / eq[i];
            assert!(rel < tol, "state {i} drifted: {} vs {}", x[i], eq[i]);
        }
    }

    #[test]
    fn test_pause_resume_rebases_time() {
        let (mut orch, t0) = started(1.0);
        orch.poll(at(t0, 0.5)).unwrap();
        orch.pause().unwrap();
        let frozen = orch.plant().unwrap().get_state();
        let idle = orch.poll(at(t0, 50.0)).unwrap();
        assert_eq!(idle, Tick::default());
        assert_eq!(orch.plant().unwrap().get_state(), frozen);
        assert!(orch.snapshot().is_paused);

        orch.resume(at(t0, 100.0)).unwrap();
        let tick = orch.poll(at(t0, 100.5)).unwrap();
        let dt = tick.physics_dt.unwrap();
        assert!((dt - 0.5).abs() < 1e-9, "advanced by {dt}s after resume");
        assert!(!tick.control_ran);
    }

    #[test]
    fn test_reset_restores_equilibrium_keeps_accumulators() {
        let (mut orch, t0) = started(1.0);
        assert!(orch.update_setpoint("tank_c", "level", 1.55));
        for k in 1..=20 {
            orch.poll(at(t0, k as f64 * 0.5)).unwrap();
        }
        let integral = orch
            .control_system()
            .unwrap()
            .mpc_state(TankId::C)
            .unwrap()
            .integral_error;
        assert_ne!(integral, [0.0, 0.0]);

        orch.reset(at(t0, 10.0)).unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.setpoints["tank_c_level"], 1.5);
        assert_eq!(snap.variables, snap.setpoints);
        assert_eq!(snap.controls["tank_c_water_pump"], 0.6125);
        assert!(orch.history().is_empty());
        assert_eq!(
            orch.plant().unwrap().get_state(),
            PlantConfig::default().equilibrium_state()
        );
        let after = orch
            .control_system()
            .unwrap()
            .mpc_state(TankId::C)
            .unwrap()
            .integral_error;
        assert_eq!(after, integral);
        assert_eq!(orch.phase(), SessionPhase::Running);
    }

    #[test]
    fn test_unknown_setpoint_is_noop() {
        let (mut orch, _) = started(1.0);
        let before = orch.snapshot().setpoints;
        assert!(!orch.update_setpoint("tank_z", "level", 1.0));
        assert!(!orch.update_setpoint("tank_c", "temperature", 1.0));
        assert!(!orch.update_setpoint("tank_a", "concentration", 100.0));
        assert!(!orch.update_setpoint("tank_c", "level", f64::NAN));
        assert_eq!(orch.snapshot().setpoints, before);
    }

    #[test]
    fn test_material_setpoint_change_resets_integrator() {
        let (mut orch, t0) = started(1.0);
        // 0.05 m < 5% of 1.5 m: no reset
        assert!(orch.update_setpoint("tank_c", "level", 1.55));
        orch.poll(at(t0, 5.0)).unwrap();
        let state = |o: &RealtimeOrchestrator| {
            o.control_system()
                .unwrap()
                .mpc_state(TankId::C)
                .unwrap()
                .integral_error
        };
        assert_ne!(state(&orch), [0.0, 0.0]);
        assert!(orch.update_setpoint("tank_c", "level", 1.56));
        assert_ne!(state(&orch), [0.0, 0.0]);
        assert!(orch.update_setpoint("tank_c", "level", 1.75));
        assert_eq!(state(&orch), [0.0, 0.0]);
    }

    #[test]
    fn test_cancel_stops_at_next_poll() {
        let (mut orch, t0) = started(1.0);
        orch.cancel_handle().cancel();
        let tick = orch.poll(at(t0, 1.0)).unwrap();
        assert_eq!(tick, Tick::default());
        assert_eq!(orch.phase(), SessionPhase::Stopped);
        assert!(orch.resume(at(t0, 2.0)).is_err());
        assert!(orch.reset(at(t0, 2.0)).is_err());
    }

    #[test]
    fn test_noise_perturbs_measurements_only() {
        let cfg = config();
        let mut orch = RealtimeOrchestrator::new(Arc::clone(&cfg)).unwrap();
        let mut session = SessionConfig::canonical(&cfg, 1.0);
        session.enable_noise = true;
        session.noise_level = 0.01;
        session.seed = Some(11);
        let t0 = Instant::now();
        orch.initialize(session, t0).unwrap();
        let frame = orch.poll(t0).unwrap().telemetry.unwrap();
        assert_ne!(frame.variables, frame.setpoints);
        assert_eq!(orch.plant().unwrap().get_state(), cfg.equilibrium_state());
    }

    #[test]
    fn test_command_wire_format() {
        let setpoint: Command = serde_json::from_str(
            r#"{"type": "setpoint", "data": {"tank_id": "tank_c", "variable": "level", "value": 1.7}}"#,
        )
        .unwrap();
        assert_eq!(
            setpoint,
            Command::Setpoint(SetpointCommand {
                tank_id: "tank_c".to_string(),
                variable: "level".to_string(),
                value: 1.7,
            })
        );
        let pause: Command = serde_json::from_str(r#"{"type": "pause", "data": {}}"#).unwrap();
        assert_eq!(pause, Command::Pause {});
        let reset = serde_json::to_value(Command::Reset {}).unwrap();
        assert_eq!(reset["type"], "reset");
        assert!(serde_json::from_str::<Command>(r#"{"type": "explode", "data": {}}"#).is_err());
    }

    #[test]
    fn test_apply_routes_commands() {
        let (mut orch, t0) = started(1.0);
        orch.apply(Command::Pause {}, t0);
        assert_eq!(orch.phase(), SessionPhase::Paused);
        orch.apply(Command::Resume {}, at(t0, 1.0));
        assert_eq!(orch.phase(), SessionPhase::Running);
        orch.apply(
            Command::Setpoint(SetpointCommand {
                tank_id: "tank_e".to_string(),
                variable: "concentration".to_string(),
                value: 200.0,
            }),
            at(t0, 1.0),
        );
        assert_eq!(orch.snapshot().setpoints["tank_e_concentration"], 200.0);
        orch.apply(Command::Reset {}, at(t0, 2.0));
        assert_eq!(orch.snapshot().setpoints["tank_e_concentration"], 180.0);
    }

    fn spawn_session(
        sampling: f64,
    ) -> (
        CancelHandle,
        mpsc::UnboundedSender<Command>,
        mpsc::Receiver<TelemetryFrame>,
        tokio::task::JoinHandle<RealtimeOrchestrator>,
    ) {
        let cfg = config();
        let mut orch = RealtimeOrchestrator::new(Arc::clone(&cfg)).unwrap();
        orch.initialize(
            SessionConfig::canonical(&cfg, sampling),
            tokio::time::Instant::now().into_std(),
        )
        .unwrap();
        let cancel = orch.cancel_handle();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (tel_tx, tel_rx) = mpsc::channel(1024);
        let handle = tokio::spawn(run_session(orch, cmd_rx, tel_tx));
        (cancel, cmd_tx, tel_rx, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stops_when_commands_close() {
        let (_cancel, cmd_tx, mut tel_rx, handle) = spawn_session(1.0);
        let frame = tel_rx.recv().await.unwrap();
        assert_eq!(frame.timestamp, 0.0);
        drop(cmd_tx);
        let orch = handle.await.unwrap();
        assert_eq!(orch.phase(), SessionPhase::Stopped);
        assert!(orch.session_id().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_stops_on_cancel() {
        let (cancel, _cmd_tx, mut tel_rx, handle) = spawn_session(1.0);
        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        let orch = handle.await.unwrap();
        assert_eq!(orch.phase(), SessionPhase::Stopped);
        let mut frames = 0;
        while tel_rx.try_recv().is_ok() {
            frames += 1;
        }
        assert!(frames >= 10, "only {frames} frames");
        assert!(orch.plant().unwrap().elapsed() >= 11.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_survives_dropped_telemetry() {
        let (cancel, _cmd_tx, tel_rx, handle) = spawn_session(1.0);
        drop(tel_rx);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(!handle.is_finished());
        cancel.cancel();
        let orch = handle.await.unwrap();
        assert!(orch.plant().unwrap().elapsed() >= 19.0);
        assert!(orch.history().len() >= 19);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_applies_commands() {
        let (cancel, cmd_tx, _tel_rx, handle) = spawn_session(1.0);
        cmd_tx
            .send(Command::Setpoint(SetpointCommand {
                tank_id: "tank_c".to_string(),
                variable: "level".to_string(),
                value: 1.7,
            }))
            .unwrap();
        cmd_tx.send(Command::Pause {}).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();
        let orch = handle.await.unwrap();
        let snap = orch.snapshot();
        assert_eq!(snap.setpoints["tank_c_level"], 1.7);
        assert_eq!(snap.phase, SessionPhase::Stopped);
    }
}
