use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionState {
    pub is_connected: bool,
    pub system_id: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Health {
    pub is_global_position_ok: bool,
    pub is_home_position_ok: bool,
}

impl Health {
    pub fn ready_for_flight(&self) -> bool {
        self.is_global_position_ok && self.is_home_position_ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionNed {
    pub north_m: f32,
    pub east_m: f32,
    pub down_m: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    pub voltage: Option<f32>,      // Volts
    pub current: Option<f32>,      // Amps
    pub remaining: Option<u8>,     // Percent 0-100
}

/// Latest known vehicle state, published by a vehicle link on every update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub connection: ConnectionState,
    pub health: Health,
    pub armed: bool,
    pub in_air: bool,
    pub position: Option<PositionNed>,
    pub relative_alt_m: Option<f32>,
    pub battery: BatteryStatus,
    pub heartbeat_age_ms: Option<u64>,
}
