use serde::Deserialize;
use tracing::warn;
use vox_proto::command::{clamp_distance, Action, CommandKind, DEFAULT_ANGLE_DEG, DEFAULT_DISTANCE_M};
use vox_proto::setpoint::VelocityNedYaw;

/// How a movement distance becomes a speed.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SpeedPolicy {
    /// Same speed for every distance.
    Fixed { speed_m_s: f32 },
    /// Aim to cover the distance in `target_time_s`, clamped into the band.
    Adaptive { target_time_s: f32, min_speed_m_s: f32, max_speed_m_s: f32 },
}

impl SpeedPolicy {
    pub const VOICE: Self = Self::Adaptive { target_time_s: 1.5, min_speed_m_s: 0.5, max_speed_m_s: 3.0 };
    pub const MANUAL: Self = Self::Adaptive { target_time_s: 1.5, min_speed_m_s: 0.2, max_speed_m_s: 2.0 };
    pub const BASIC: Self = Self::Fixed { speed_m_s: 2.0 };

    pub fn speed_for(&self, distance_m: f32) -> f32 {
        match *self {
            SpeedPolicy::Fixed { speed_m_s } => speed_m_s,
            SpeedPolicy::Adaptive { target_time_s, min_speed_m_s, max_speed_m_s } => {
                (distance_m / target_time_s).clamp(min_speed_m_s, max_speed_m_s)
            }
        }
    }

    /// (min, max) speed this policy can produce.
    pub fn band(&self) -> (f32, f32) {
        match *self {
            SpeedPolicy::Fixed { speed_m_s } => (speed_m_s, speed_m_s),
            SpeedPolicy::Adaptive { min_speed_m_s, max_speed_m_s, .. } => (min_speed_m_s, max_speed_m_s),
        }
    }
}

/// Reference for horizontal movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Forward follows the current heading.
    Body,
    /// Forward is always north.
    Local,
}

/// One maneuver: the velocity to stream (its yaw is the heading after the
/// maneuver) and how long to hold it before arresting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub velocity: VelocityNedYaw,
    pub hold_s: f32,
}

impl Setpoint {
    pub fn yaw_deg(&self) -> f32 {
        self.velocity.yaw_deg
    }

    pub fn speed(&self) -> f32 {
        let v = &self.velocity;
        (v.north_m_s * v.north_m_s + v.east_m_s * v.east_m_s + v.down_m_s * v.down_m_s).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mapper {
    pub speed: SpeedPolicy,
    pub turn_rate_dps: f32,
    pub frame: Frame,
}

impl Mapper {
    pub fn new(speed: SpeedPolicy, turn_rate_dps: f32, frame: Frame) -> Self {
        Self { speed, turn_rate_dps, frame }
    }

    /// Maps a symbolic action to a setpoint. Pure: the caller owns the heading
    /// and stores `yaw_deg()` of the result.
    ///
    /// Heading is accumulated as given, never wrapped. Returns `None` for
    /// actions that have no setpoint (takeoff, land, return, exit, unknown).
    pub fn map(&self, action: Action, distance_m: Option<f32>, angle_deg: Option<f32>, yaw_deg: f32) -> Option<Setpoint> {
        match action.kind() {
            CommandKind::Movement => {
                let distance = clamp_distance(distance_m.unwrap_or(DEFAULT_DISTANCE_M).abs());
                let speed = self.speed.speed_for(distance);
                if !(speed > 0.0) {
                    warn!("speed policy yields {} m/s; ignoring {}", speed, action);
                    return None;
                }
                let (forward, lateral, down) = match action {
                    Action::Forward => (1.0, 0.0, 0.0),
                    Action::Backward => (-1.0, 0.0, 0.0),
                    Action::Right => (0.0, 1.0, 0.0),
                    Action::Left => (0.0, -1.0, 0.0),
                    // down-positive axis: climbing is negative
                    Action::Up => (0.0, 0.0, -1.0),
                    _ => (0.0, 0.0, 1.0),
                };
                let (north, east) = self.horizontal(forward * speed, lateral * speed, yaw_deg);
                Some(Setpoint {
                    velocity: VelocityNedYaw::new(north, east, down * speed, yaw_deg),
                    hold_s: distance / speed,
                })
            }
            CommandKind::Rotation => {
                let angle = angle_deg.unwrap_or(DEFAULT_ANGLE_DEG).abs();
                let new_yaw = if action == Action::TurnRight { yaw_deg + angle } else { yaw_deg - angle };
                let hold_s = if self.turn_rate_dps > 0.0 { angle / self.turn_rate_dps } else { 0.0 };
                Some(Setpoint { velocity: VelocityNedYaw::hold(new_yaw), hold_s })
            }
            CommandKind::Control if action == Action::Stop => {
                Some(Setpoint { velocity: VelocityNedYaw::hold(yaw_deg), hold_s: 0.0 })
            }
            _ => {
                warn!("no setpoint for action '{}'", action);
                None
            }
        }
    }

    fn horizontal(&self, forward: f32, lateral: f32, yaw_deg: f32) -> (f32, f32) {
        match self.frame {
            Frame::Local => (forward, lateral),
            Frame::Body => {
                let (sin, cos) = yaw_deg.to_radians().sin_cos();
                (forward * cos - lateral * sin, forward * sin + lateral * cos)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-4;

    fn voice() -> Mapper {
        Mapper::new(SpeedPolicy::VOICE, 30.0, Frame::Body)
    }

    #[test]
    fn forward_three_meters_adaptive() {
        let sp = voice().map(Action::Forward, Some(3.0), None, 0.0).unwrap();
        assert!((sp.speed() - 2.0).abs() < EPS);
        assert!((sp.hold_s - 1.5).abs() < EPS);
        assert!((sp.velocity.north_m_s - 2.0).abs() < EPS);
        assert_eq!(sp.yaw_deg(), 0.0);
    }

    #[test]
    fn hold_is_distance_over_clamped_speed() {
        let m = voice();
        for d in [0.1_f32, 0.5, 1.0, 2.0, 4.5, 5.0] {
            let sp = m.map(Action::Backward, Some(d), None, 0.0).unwrap();
            let (lo, hi) = SpeedPolicy::VOICE.band();
            assert!(sp.speed() >= lo - EPS && sp.speed() <= hi + EPS, "speed {} for {}", sp.speed(), d);
            assert!((sp.hold_s - d / sp.speed()).abs() < EPS);
        }
    }

    #[test]
    fn distance_is_clamped_before_mapping() {
        let m = voice();
        let far = m.map(Action::Forward, Some(9.0), None, 0.0).unwrap();
        assert!((far.speed() * far.hold_s - 5.0).abs() < EPS);

        let zero = m.map(Action::Forward, Some(0.0), None, 0.0).unwrap();
        assert!(zero.hold_s > 0.0);
        assert!((zero.speed() * zero.hold_s - 0.1).abs() < EPS);
    }

    #[test]
    fn short_moves_use_minimum_speed() {
        let sp = Mapper::new(SpeedPolicy::MANUAL, 30.0, Frame::Body).map(Action::Right, Some(0.1), None, 0.0).unwrap();
        assert!((sp.speed() - 0.2).abs() < EPS);
        assert!((sp.hold_s - 0.5).abs() < EPS);
    }

    #[test]
    fn fixed_policy_ignores_distance() {
        let m = Mapper::new(SpeedPolicy::BASIC, 30.0, Frame::Local);
        let sp = m.map(Action::Left, Some(5.0), None, 0.0).unwrap();
        assert!((sp.velocity.east_m_s + 2.0).abs() < EPS);
        assert!((sp.hold_s - 2.5).abs() < EPS);
    }

    #[test]
    fn up_is_negative_down_velocity() {
        let up = voice().map(Action::Up, Some(1.5), None, 10.0).unwrap();
        assert!(up.velocity.down_m_s < 0.0);
        let down = voice().map(Action::Down, Some(1.5), None, 10.0).unwrap();
        assert!(down.velocity.down_m_s > 0.0);
        assert_eq!(up.velocity.north_m_s, 0.0);
        assert_eq!(up.velocity.east_m_s, 0.0);
    }

    #[test]
    fn body_frame_follows_heading() {
        let sp = voice().map(Action::Forward, Some(3.0), None, 90.0).unwrap();
        assert!(sp.velocity.north_m_s.abs() < EPS);
        assert!((sp.velocity.east_m_s - 2.0).abs() < EPS);
        // right of an east-facing vehicle is south
        let sp = voice().map(Action::Right, Some(3.0), None, 90.0).unwrap();
        assert!((sp.velocity.north_m_s + 2.0).abs() < EPS);
    }

    #[test]
    fn local_frame_ignores_heading() {
        let m = Mapper::new(SpeedPolicy::VOICE, 30.0, Frame::Local);
        let sp = m.map(Action::Forward, Some(3.0), None, 90.0).unwrap();
        assert!((sp.velocity.north_m_s - 2.0).abs() < EPS);
        assert_eq!(sp.yaw_deg(), 90.0);
    }

    #[test]
    fn turn_right_45_from_zero() {
        let sp = voice().map(Action::TurnRight, None, Some(45.0), 0.0).unwrap();
        assert_eq!(sp.yaw_deg(), 45.0);
        assert!((sp.hold_s - 1.5).abs() < EPS);
        assert!(sp.velocity.is_zero());
    }

    #[test]
    fn rotations_accumulate_without_wrapping() {
        let m = voice();
        let mut yaw = 0.0;
        for _ in 0..5 {
            let before = yaw;
            yaw = m.map(Action::TurnRight, None, Some(90.0), yaw).unwrap().yaw_deg();
            assert_eq!(yaw - before, 90.0);
        }
        assert_eq!(yaw, 450.0);
        let left = m.map(Action::TurnLeft, None, None, 0.0).unwrap();
        assert_eq!(left.yaw_deg(), -90.0);
    }

    #[test]
    fn stop_is_idempotent() {
        let m = voice();
        let a = m.map(Action::Stop, None, None, 33.0).unwrap();
        let b = m.map(Action::Stop, None, None, a.yaw_deg()).unwrap();
        assert_eq!(a, b);
        assert!(a.velocity.is_zero());
        assert_eq!(a.yaw_deg(), 33.0);
        assert_eq!(a.hold_s, 0.0);
    }

    #[test]
    fn non_setpoint_actions_map_to_nothing() {
        let m = voice();
        for action in [Action::Unknown, Action::Land, Action::ReturnHome, Action::Takeoff, Action::Exit] {
            assert_eq!(m.map(action, None, None, 0.0), None);
        }
    }
}
