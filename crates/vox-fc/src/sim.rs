//! In-process kinematic vehicle for dry runs and tests.
//!
//! Velocity setpoints are integrated while offboard is active; position
//! setpoints are reached instantly. Offboard start follows the autopilot rule
//! that a setpoint must have been sent first. Every call is recorded so tests
//! can check ordering.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;
use vox_proto::setpoint::{PositionNedYaw, VelocityNedYaw};
use vox_proto::telemetry::{PositionNed, TelemetrySnapshot};

use crate::{Vehicle, VehicleError};

#[derive(Debug, Clone, Default)]
pub struct SimConfig {
    /// Never report a connection (link discovery timeout path).
    pub never_connect: bool,
    /// Refuse the offboard mode change even when a setpoint was sent.
    pub reject_offboard: bool,
    /// Leave offboard without acknowledging the hold request, like an
    /// autopilot that drops the mode-change ack.
    pub fail_stop_offboard: bool,
    /// Altitude reached by the collaborator takeoff command.
    pub takeoff_alt_m: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(String),
    Arm,
    Disarm,
    Takeoff,
    Land,
    ReturnToLaunch,
    Velocity(VelocityNedYaw),
    Position(PositionNedYaw),
    StartOffboard,
    StopOffboard,
}

#[derive(Debug, Default)]
struct SimState {
    connected: bool,
    armed: bool,
    in_air: bool,
    offboard: bool,
    setpoint_seen: bool,
    position: PositionNed,
    velocity: VelocityNedYaw,
    last_update: Option<Instant>,
}

pub struct SimVehicle {
    cfg: SimConfig,
    state: Mutex<SimState>,
    calls: Mutex<Vec<Call>>,
    telemetry_tx: watch::Sender<TelemetrySnapshot>,
    reject_offboard: AtomicBool,
}

impl SimVehicle {
    pub fn new(cfg: SimConfig) -> Self {
        let (telemetry_tx, _) = watch::channel(TelemetrySnapshot::default());
        let reject_offboard = AtomicBool::new(cfg.reject_offboard);
        Self { cfg, state: Mutex::new(SimState::default()), calls: Mutex::new(Vec::new()), telemetry_tx, reject_offboard }
    }

    /// Changes the offboard refusal mid-flight.
    pub fn set_reject_offboard(&self, reject: bool) {
        self.reject_offboard.store(reject, Ordering::Relaxed);
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn position(&self) -> PositionNed {
        self.with_state(|st| st.position).unwrap_or_default()
    }

    fn record(&self, call: Call) {
        debug!("sim: {:?}", call);
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, VehicleError> {
        self.state.lock().map_err(|_| VehicleError::Link("sim state poisoned".into()))
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> Result<T, VehicleError> {
        let mut st = self.lock()?;
        integrate(&mut st);
        let out = f(&mut st);
        self.publish(&st);
        Ok(out)
    }

    fn connected_state<T>(&self, f: impl FnOnce(&mut SimState) -> Result<T, VehicleError>) -> Result<T, VehicleError> {
        self.with_state(|st| if st.connected { f(st) } else { Err(VehicleError::NotConnected) })?
    }

    fn publish(&self, st: &SimState) {
        self.telemetry_tx.send_modify(|snap| {
            snap.connection.is_connected = st.connected;
            snap.connection.system_id = st.connected.then_some(1);
            snap.health.is_global_position_ok = st.connected;
            snap.health.is_home_position_ok = st.connected;
            snap.armed = st.armed;
            snap.in_air = st.in_air;
            snap.position = st.connected.then_some(st.position);
            snap.relative_alt_m = st.connected.then_some(-st.position.down_m);
            snap.heartbeat_age_ms = st.connected.then_some(0);
        });
    }
}

fn integrate(st: &mut SimState) {
    let now = Instant::now();
    if let Some(last) = st.last_update {
        if st.offboard && st.in_air {
            let dt = now.duration_since(last).as_secs_f32();
            st.position.north_m += st.velocity.north_m_s * dt;
            st.position.east_m += st.velocity.east_m_s * dt;
            st.position.down_m = (st.position.down_m + st.velocity.down_m_s * dt).min(0.0);
        }
    }
    st.last_update = Some(now);
}

#[async_trait]
impl Vehicle for SimVehicle {
    async fn connect(&self, address: &str) -> Result<(), VehicleError> {
        self.record(Call::Connect(address.to_string()));
        let never_connect = self.cfg.never_connect;
        self.with_state(|st| st.connected = !never_connect)
    }

    fn telemetry(&self) -> watch::Receiver<TelemetrySnapshot> {
        self.telemetry_tx.subscribe()
    }

    async fn arm(&self) -> Result<(), VehicleError> {
        self.record(Call::Arm);
        self.connected_state(|st| {
            st.armed = true;
            Ok(())
        })
    }

    async fn disarm(&self) -> Result<(), VehicleError> {
        self.record(Call::Disarm);
        // Lenient: a real autopilot refuses to disarm in the air unless forced.
        self.connected_state(|st| {
            st.armed = false;
            st.offboard = false;
            st.in_air = false;
            st.position.down_m = 0.0;
            Ok(())
        })
    }

    async fn takeoff(&self) -> Result<(), VehicleError> {
        self.record(Call::Takeoff);
        let alt = if self.cfg.takeoff_alt_m > 0.0 { self.cfg.takeoff_alt_m } else { 2.5 };
        self.connected_state(|st| {
            if !st.armed {
                return Err(VehicleError::Rejected { command: "TAKEOFF".into(), result: "not armed".into() });
            }
            st.in_air = true;
            st.position.down_m = -alt;
            Ok(())
        })
    }

    async fn land(&self) -> Result<(), VehicleError> {
        self.record(Call::Land);
        self.connected_state(|st| {
            st.offboard = false;
            st.in_air = false;
            st.armed = false;
            st.position.down_m = 0.0;
            st.velocity = VelocityNedYaw::default();
            Ok(())
        })
    }

    async fn return_to_launch(&self) -> Result<(), VehicleError> {
        self.record(Call::ReturnToLaunch);
        self.connected_state(|st| {
            st.offboard = false;
            st.in_air = false;
            st.armed = false;
            st.position = PositionNed::default();
            st.velocity = VelocityNedYaw::default();
            Ok(())
        })
    }

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), VehicleError> {
        self.record(Call::Velocity(setpoint));
        self.connected_state(|st| {
            st.setpoint_seen = true;
            st.velocity = setpoint;
            // offboard climb from the ground
            if st.offboard && st.armed && setpoint.down_m_s < 0.0 {
                st.in_air = true;
            }
            Ok(())
        })
    }

    async fn set_position_ned(&self, setpoint: PositionNedYaw) -> Result<(), VehicleError> {
        self.record(Call::Position(setpoint));
        self.connected_state(|st| {
            st.setpoint_seen = true;
            st.velocity = VelocityNedYaw::hold(setpoint.yaw_deg);
            if st.offboard && st.in_air {
                st.position = PositionNed { north_m: setpoint.north_m, east_m: setpoint.east_m, down_m: setpoint.down_m };
            }
            Ok(())
        })
    }

    async fn start_offboard(&self) -> Result<(), VehicleError> {
        self.record(Call::StartOffboard);
        let reject = self.reject_offboard.load(Ordering::Relaxed);
        self.connected_state(|st| {
            if !st.setpoint_seen {
                return Err(VehicleError::OffboardRejected("no setpoint set before start".into()));
            }
            if reject {
                return Err(VehicleError::OffboardRejected("MAV_RESULT_DENIED".into()));
            }
            st.offboard = true;
            Ok(())
        })
    }

    async fn stop_offboard(&self) -> Result<(), VehicleError> {
        self.record(Call::StopOffboard);
        let fail = self.cfg.fail_stop_offboard;
        self.connected_state(|st| {
            st.offboard = false;
            st.setpoint_seen = false;
            st.velocity = VelocityNedYaw::hold(st.velocity.yaw_deg);
            if fail {
                return Err(VehicleError::NoAck("HOLD".into()));
            }
            Ok(())
        })
    }
}
