pub mod doctor;
pub mod manual;
pub mod mission;
pub mod session;
pub mod setpoint;

use serde::Deserialize;

use crate::setpoint::{Frame, SpeedPolicy};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlightConfig {
    /// Wait after the arm command before anything else is sent.
    pub arm_settle_ms: u64,
    /// Wait after takeoff/land/return-to-launch commands.
    pub action_settle_ms: u64,

    /// Climb height of the offboard takeoff.
    pub takeoff_alt_m: f32,
    pub ascent_speed_m_s: f32,

    pub turn_rate_dps: f32,
    pub frame: Frame,

    /// Speed policies per front end.
    pub manual_speed: SpeedPolicy,
    pub voice_speed: SpeedPolicy,
    pub basic_voice_speed: SpeedPolicy,
}

impl Default for FlightConfig {
    fn default() -> Self {
        Self {
            arm_settle_ms: 2_000,
            action_settle_ms: 5_000,
            takeoff_alt_m: 2.0,
            ascent_speed_m_s: 1.0,
            turn_rate_dps: 30.0,
            frame: Frame::Body,
            manual_speed: SpeedPolicy::MANUAL,
            voice_speed: SpeedPolicy::VOICE,
            basic_voice_speed: SpeedPolicy::BASIC,
        }
    }
}
