use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use vox_fc::{Vehicle, VehicleError};
use vox_proto::command::{Action, CommandKind, CommandRecord};
use vox_proto::setpoint::{PositionNedYaw, VelocityNedYaw};
use vox_proto::telemetry::TelemetrySnapshot;

use crate::setpoint::{Mapper, Setpoint};
use crate::FlightConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightMode {
    Idle,
    Connected,
    Armed,
    Airborne,
    OffboardActive,
    Landed,
    ReturnedHome,
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlightMode::Idle => "IDLE",
            FlightMode::Connected => "CONNECTED",
            FlightMode::Armed => "ARMED",
            FlightMode::Airborne => "AIRBORNE",
            FlightMode::OffboardActive => "OFFBOARD",
            FlightMode::Landed => "LANDED",
            FlightMode::ReturnedHome => "RETURNED_HOME",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {op} in mode {mode}")]
    InvalidMode { op: &'static str, mode: FlightMode },
    #[error("no vehicle found on {address} within {timeout:?}")]
    LinkNotFound { address: String, timeout: Duration },
    #[error("position estimate not ready within {0:?}")]
    HealthTimeout(Duration),
    #[error(transparent)]
    Vehicle(#[from] VehicleError),
}

impl SessionError {
    /// Errors that end a command loop instead of being reported and skipped.
    pub fn is_fatal(&self) -> bool {
        match self {
            SessionError::LinkNotFound { .. } => true,
            SessionError::Vehicle(e) => e.is_link_failure(),
            _ => false,
        }
    }
}

/// Result of executing one command record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// No vehicle call was made (not a command, or nothing to map).
    Ignored,
    /// A maneuver was flown; the loop continues.
    Flown,
    /// A terminal action ran; the loop ends.
    Finished,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    pub health_timeout: Duration,
    pub arm_settle: Duration,
    pub action_settle: Duration,
    pub takeoff_alt_m: f32,
    pub ascent_speed_m_s: f32,
}

impl SessionConfig {
    pub fn new(flight: &FlightConfig, connect_timeout: Duration, health_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            health_timeout,
            arm_settle: Duration::from_millis(flight.arm_settle_ms),
            action_settle: Duration::from_millis(flight.action_settle_ms),
            takeoff_alt_m: flight.takeoff_alt_m,
            ascent_speed_m_s: flight.ascent_speed_m_s,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(&FlightConfig::default(), Duration::from_secs(30), Duration::from_secs(60))
    }
}

/// Drives one vehicle through connect, arm, takeoff, offboard maneuvers and
/// landing. Owns the flight mode and the heading accumulator; setpoints are
/// only streamed while offboard is active.
pub struct Session {
    vehicle: Arc<dyn Vehicle>,
    cfg: SessionConfig,
    mode: FlightMode,
    yaw_heading: f32,
}

impl Session {
    pub fn new(vehicle: Arc<dyn Vehicle>, cfg: SessionConfig) -> Self {
        Self { vehicle, cfg, mode: FlightMode::Idle, yaw_heading: 0.0 }
    }

    pub fn mode(&self) -> FlightMode {
        self.mode
    }

    /// Accumulated heading in degrees, not wrapped.
    pub fn yaw_heading(&self) -> f32 {
        self.yaw_heading
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.vehicle.telemetry().borrow().clone()
    }

    fn set_mode(&mut self, mode: FlightMode) {
        if self.mode != mode {
            info!("session: {} -> {}", self.mode, mode);
            self.mode = mode;
        }
    }

    fn require_mode(&self, allowed: &[FlightMode], op: &'static str) -> Result<(), SessionError> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(SessionError::InvalidMode { op, mode: self.mode })
        }
    }

    pub async fn connect(&mut self, address: &str) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::Idle], "connect")?;
        info!("connecting to vehicle at {}", address);
        self.vehicle.connect(address).await?;

        let timeout = self.cfg.connect_timeout;
        let mut rx = self.vehicle.telemetry();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|t| t.connection.is_connected))
            .await
            .map(|r| r.map(|snap| snap.connection.system_id));

        match waited {
            Ok(Ok(system_id)) => {
                info!("vehicle connected (system id {:?})", system_id);
                self.set_mode(FlightMode::Connected);
                Ok(())
            }
            Ok(Err(_)) => Err(VehicleError::Link("telemetry channel closed".into()).into()),
            Err(_) => Err(SessionError::LinkNotFound { address: address.to_string(), timeout }),
        }
    }

    /// Waits until the vehicle reports a global position and a home position.
    pub async fn wait_healthy(&mut self) -> Result<(), SessionError> {
        if self.mode == FlightMode::Idle {
            return Err(SessionError::InvalidMode { op: "check health", mode: self.mode });
        }
        info!("waiting for global position estimate");
        let timeout = self.cfg.health_timeout;
        let mut rx = self.vehicle.telemetry();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|t| t.health.ready_for_flight()))
            .await
            .map(|r| r.map(|_| ()));
        match waited {
            Ok(Ok(())) => {
                info!("global position estimate OK");
                Ok(())
            }
            Ok(Err(_)) => Err(VehicleError::Link("telemetry channel closed".into()).into()),
            Err(_) => Err(SessionError::HealthTimeout(timeout)),
        }
    }

    pub async fn arm(&mut self) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::Connected, FlightMode::Landed, FlightMode::ReturnedHome], "arm")?;
        info!("arming");
        self.vehicle.arm().await?;
        sleep(self.cfg.arm_settle).await;
        self.set_mode(FlightMode::Armed);
        Ok(())
    }

    /// Autopilot-managed takeoff to its own takeoff altitude.
    pub async fn takeoff_action(&mut self) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::Armed], "take off")?;
        info!("taking off");
        self.vehicle.takeoff().await?;
        sleep(self.cfg.action_settle).await;
        self.set_mode(FlightMode::Airborne);
        Ok(())
    }

    /// Offboard climb: start offboard, climb at the ascent speed for
    /// `alt / speed` seconds, then arrest. Leaves offboard active.
    pub async fn takeoff_offboard(&mut self, alt_m: f32) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::Armed, FlightMode::Airborne, FlightMode::OffboardActive], "take off")?;
        let speed = self.cfg.ascent_speed_m_s.max(0.1);
        let alt_m = alt_m.abs();
        info!("climbing {:.1} m at {:.1} m/s", alt_m, speed);

        self.start_offboard().await?;
        self.vehicle.set_velocity_ned(VelocityNedYaw::new(0.0, 0.0, -speed, self.yaw_heading)).await?;
        sleep(secs(alt_m / speed)).await;
        self.arrest().await?;
        info!("takeoff complete");
        Ok(())
    }

    /// Primes a zero-velocity setpoint at the current heading and requests
    /// offboard. On rejection the mode stays where it was.
    pub async fn start_offboard(&mut self) -> Result<(), SessionError> {
        if self.mode == FlightMode::OffboardActive {
            return Ok(());
        }
        self.require_mode(&[FlightMode::Armed, FlightMode::Airborne], "start offboard")?;
        self.vehicle.set_velocity_ned(VelocityNedYaw::hold(self.yaw_heading)).await?;
        self.request_offboard().await
    }

    /// Like [`Session::start_offboard`] but primes a position setpoint.
    pub async fn start_offboard_at(&mut self, position: PositionNedYaw) -> Result<(), SessionError> {
        if self.mode == FlightMode::OffboardActive {
            return Ok(());
        }
        self.require_mode(&[FlightMode::Armed, FlightMode::Airborne], "start offboard")?;
        self.vehicle.set_position_ned(position).await?;
        self.request_offboard().await
    }

    async fn request_offboard(&mut self) -> Result<(), SessionError> {
        info!("starting offboard mode");
        match self.vehicle.start_offboard().await {
            Ok(()) => {
                self.set_mode(FlightMode::OffboardActive);
                Ok(())
            }
            Err(e) => {
                warn!("offboard start failed: {}; staying {}", e, self.mode);
                Err(e.into())
            }
        }
    }

    /// Leaves offboard if active. A no-op otherwise.
    ///
    /// The vehicle stops streaming setpoints even when the hold request
    /// fails, so the session leaves `OffboardActive` in both cases.
    pub async fn stop_offboard(&mut self) -> Result<(), SessionError> {
        if self.mode != FlightMode::OffboardActive {
            return Ok(());
        }
        info!("stopping offboard mode");
        let res = self.vehicle.stop_offboard().await;
        self.set_mode(FlightMode::Airborne);
        res.map_err(Into::into)
    }

    /// Stops offboard ahead of a terminal action; a failed hold request must
    /// not keep the terminal command from being sent.
    async fn stop_offboard_before(&mut self, op: &str) {
        if let Err(e) = self.stop_offboard().await {
            warn!("stopping offboard before {} failed: {}", op, e);
        }
    }

    /// Disarms and resets to Idle.
    pub async fn abort_to_idle(&mut self) -> Result<(), SessionError> {
        warn!("aborting: disarming");
        let res = self.vehicle.disarm().await;
        self.set_mode(FlightMode::Idle);
        res.map_err(Into::into)
    }

    pub async fn land(&mut self) -> Result<(), SessionError> {
        self.expect_flying("land")?;
        self.stop_offboard_before("land").await;
        info!("landing");
        self.vehicle.land().await?;
        sleep(self.cfg.action_settle).await;
        self.set_mode(FlightMode::Landed);
        Ok(())
    }

    pub async fn return_home(&mut self) -> Result<(), SessionError> {
        self.expect_flying("return to launch")?;
        self.stop_offboard_before("return to launch").await;
        info!("returning to launch");
        self.vehicle.return_to_launch().await?;
        sleep(self.cfg.action_settle).await;
        self.set_mode(FlightMode::ReturnedHome);
        Ok(())
    }

    fn expect_flying(&self, op: &'static str) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::Armed, FlightMode::Airborne, FlightMode::OffboardActive], op)
    }

    /// Ends an interactive session: offboard is stopped first.
    pub async fn exit(&mut self) -> Result<(), SessionError> {
        self.stop_offboard().await
    }

    /// Position setpoint, then hold for `dwell`.
    pub async fn fly_to(&mut self, target: PositionNedYaw, dwell: Duration) -> Result<(), SessionError> {
        self.require_mode(&[FlightMode::OffboardActive], "fly to a position")?;
        info!(
            "flying to N {:.1} E {:.1} D {:.1}",
            target.north_m, target.east_m, target.down_m
        );
        self.vehicle.set_position_ned(target).await?;
        self.yaw_heading = target.yaw_deg;
        sleep(dwell).await;
        Ok(())
    }

    /// Dispatches one command record. Terminal actions stop offboard before
    /// acting; a mid-loop takeoff stops offboard, climbs and restarts it.
    pub async fn execute(&mut self, record: &CommandRecord, mapper: &Mapper) -> Result<Step, SessionError> {
        if !record.is_command {
            info!("not a command: '{}'", record.raw_text);
            return Ok(Step::Ignored);
        }

        match record.action {
            Action::Exit => {
                self.stop_offboard_before("exit").await;
                Ok(Step::Finished)
            }
            Action::Land => {
                self.land().await?;
                Ok(Step::Finished)
            }
            Action::ReturnHome => {
                self.return_home().await?;
                Ok(Step::Finished)
            }
            Action::Takeoff => {
                self.stop_offboard().await?;
                let alt = record.distance.unwrap_or(self.cfg.takeoff_alt_m);
                self.takeoff_offboard(alt).await?;
                Ok(Step::Flown)
            }
            Action::Unknown => {
                warn!("unknown action in '{}'", record.raw_text);
                Ok(Step::Ignored)
            }
            action => self.maneuver(action, record, mapper).await,
        }
    }

    async fn maneuver(&mut self, action: Action, record: &CommandRecord, mapper: &Mapper) -> Result<Step, SessionError> {
        self.require_mode(&[FlightMode::OffboardActive], "fly a maneuver")?;
        let Some(sp) = mapper.map(action, record.distance, record.angle, self.yaw_heading) else {
            return Ok(Step::Ignored);
        };
        self.fly(action, sp).await?;
        Ok(Step::Flown)
    }

    async fn fly(&mut self, action: Action, sp: Setpoint) -> Result<(), SessionError> {
        info!(
            "{}: v=({:.2}, {:.2}, {:.2}) m/s yaw {:.0} for {:.2}s",
            action, sp.velocity.north_m_s, sp.velocity.east_m_s, sp.velocity.down_m_s, sp.yaw_deg(), sp.hold_s
        );
        self.vehicle.set_velocity_ned(sp.velocity).await?;
        self.yaw_heading = sp.yaw_deg();
        if sp.hold_s > 0.0 {
            sleep(secs(sp.hold_s)).await;
        }
        // movements and rotations always end on a zero-velocity setpoint
        if matches!(action.kind(), CommandKind::Movement | CommandKind::Rotation) {
            self.arrest().await?;
        }
        Ok(())
    }

    /// Zero velocity at the current heading.
    async fn arrest(&mut self) -> Result<(), SessionError> {
        self.vehicle.set_velocity_ned(VelocityNedYaw::hold(self.yaw_heading)).await?;
        Ok(())
    }
}

fn secs(s: f32) -> Duration {
    Duration::try_from_secs_f32(s).unwrap_or(Duration::ZERO)
}
