use serde::{Deserialize, Serialize};

/// Velocity setpoint in the local NED frame. `down_m_s` is positive towards the
/// ground, so climbing is a negative value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct VelocityNedYaw {
    pub north_m_s: f32,
    pub east_m_s: f32,
    pub down_m_s: f32,
    pub yaw_deg: f32,
}

impl VelocityNedYaw {
    pub fn new(north_m_s: f32, east_m_s: f32, down_m_s: f32, yaw_deg: f32) -> Self {
        Self { north_m_s, east_m_s, down_m_s, yaw_deg }
    }

    /// Zero velocity at the given heading; used to arrest motion.
    pub fn hold(yaw_deg: f32) -> Self {
        Self { yaw_deg, ..Self::default() }
    }

    pub fn is_zero(&self) -> bool {
        self.north_m_s == 0.0 && self.east_m_s == 0.0 && self.down_m_s == 0.0
    }
}

/// Position setpoint in the local NED frame (meters from the EKF origin).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionNedYaw {
    pub north_m: f32,
    pub east_m: f32,
    pub down_m: f32,
    pub yaw_deg: f32,
}

impl PositionNedYaw {
    pub fn new(north_m: f32, east_m: f32, down_m: f32, yaw_deg: f32) -> Self {
        Self { north_m, east_m, down_m, yaw_deg }
    }
}
