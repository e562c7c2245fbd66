pub mod mav;
pub mod autodetect;
pub mod sim;
pub mod state;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use vox_proto::setpoint::{PositionNedYaw, VelocityNedYaw};
use vox_proto::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FcConfig {
    /// "mavlink" for a real autopilot (or PX4 SITL), "sim" for the built-in
    /// kinematic simulator.
    pub link: String,

    /// MAVLink connection string, e.g. "udpin:0.0.0.0:14540" (PX4 SITL) or
    /// "serial:/dev/ttyACM0:57600".
    pub address: String,

    /// If true, probe candidate addresses and pick the first that yields a
    /// MAVLink HEARTBEAT.
    pub autodetect: bool,
    pub candidate_addresses: Option<Vec<String>>,

    /// Heartbeat wait per probe attempt
    pub heartbeat_timeout_ms: Option<u64>,

    /// Bounded waits for link discovery and position health.
    pub connect_timeout_ms: u64,
    pub health_timeout_ms: u64,

    /// MAVLink ids we use (companion side)
    pub sys_id: u8,
    pub comp_id: u8,

    /// target system/component (autopilot side). 1/1 is common for PX4.
    pub target_sys: u8,
    pub target_comp: u8,

    /// COMMAND_LONG acknowledgement wait and resend count.
    pub ack_timeout_ms: u64,
    pub command_retries: u8,

    /// Refuse commands until an autopilot heartbeat was seen.
    pub require_heartbeat: bool,

    /// Offboard setpoints must be refreshed faster than 2 Hz.
    pub setpoint_rate_hz: f32,

    /// Companion heartbeat send rate. Default 1 Hz.
    pub send_heartbeat_hz: Option<f32>,

    /// Link is reported disconnected after this long without a heartbeat.
    pub heartbeat_loss_ms: u64,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            link: "mavlink".into(),
            address: "udpin:0.0.0.0:14540".into(),
            autodetect: false,
            candidate_addresses: None,
            heartbeat_timeout_ms: None,
            connect_timeout_ms: 30_000,
            health_timeout_ms: 60_000,
            sys_id: 245,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            ack_timeout_ms: 1_500,
            command_retries: 2,
            require_heartbeat: true,
            setpoint_rate_hz: 20.0,
            send_heartbeat_hz: None,
            heartbeat_loss_ms: 3_000,
        }
    }
}

#[derive(Debug, Error)]
pub enum VehicleError {
    #[error("vehicle link not connected")]
    NotConnected,
    #[error("offboard start rejected: {0}")]
    OffboardRejected(String),
    #[error("{command} rejected by vehicle: {result}")]
    Rejected { command: String, result: String },
    #[error("{0} not acknowledged by vehicle")]
    NoAck(String),
    #[error("link failure: {0}")]
    Link(String),
}

impl VehicleError {
    /// Errors after which the link cannot be trusted any more.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, VehicleError::NotConnected | VehicleError::Link(_))
    }
}

/// Vehicle link/actuation contract. Implementations own their transport; the
/// session only sees these calls and the telemetry watch channel.
#[async_trait]
pub trait Vehicle: Send + Sync {
    async fn connect(&self, address: &str) -> Result<(), VehicleError>;

    /// Latest telemetry; connection state and health are read from here.
    fn telemetry(&self) -> watch::Receiver<TelemetrySnapshot>;

    async fn arm(&self) -> Result<(), VehicleError>;
    async fn disarm(&self) -> Result<(), VehicleError>;
    async fn takeoff(&self) -> Result<(), VehicleError>;
    async fn land(&self) -> Result<(), VehicleError>;
    async fn return_to_launch(&self) -> Result<(), VehicleError>;

    async fn set_velocity_ned(&self, setpoint: VelocityNedYaw) -> Result<(), VehicleError>;
    async fn set_position_ned(&self, setpoint: PositionNedYaw) -> Result<(), VehicleError>;

    /// Fails with [`VehicleError::OffboardRejected`] when no setpoint was set
    /// beforehand or the autopilot refuses the mode change.
    async fn start_offboard(&self) -> Result<(), VehicleError>;
    async fn stop_offboard(&self) -> Result<(), VehicleError>;
}
