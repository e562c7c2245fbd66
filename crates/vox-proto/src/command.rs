use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_DISTANCE_M: f32 = 2.0;
pub const DEFAULT_ANGLE_DEG: f32 = 90.0;
pub const MIN_DISTANCE_M: f32 = 0.1;
pub const MAX_DISTANCE_M: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Movement,
    Rotation,
    Action,
    Control,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
    TurnLeft,
    TurnRight,
    Takeoff,
    Land,
    ReturnHome,
    Stop,
    Exit,
    Unknown,
}

impl Action {
    pub fn kind(self) -> CommandKind {
        match self {
            Action::Forward | Action::Backward | Action::Left | Action::Right | Action::Up | Action::Down => {
                CommandKind::Movement
            }
            Action::TurnLeft | Action::TurnRight => CommandKind::Rotation,
            Action::Takeoff | Action::Land | Action::ReturnHome => CommandKind::Action,
            Action::Stop | Action::Exit => CommandKind::Control,
            Action::Unknown => CommandKind::None,
        }
    }

    /// Actions that end a maneuver loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Action::Land | Action::ReturnHome | Action::Exit)
    }

    pub fn name(self) -> &'static str {
        match self {
            Action::Forward => "forward",
            Action::Backward => "backward",
            Action::Left => "left",
            Action::Right => "right",
            Action::Up => "up",
            Action::Down => "down",
            Action::TurnLeft => "turn_left",
            Action::TurnRight => "turn_right",
            Action::Takeoff => "takeoff",
            Action::Land => "land",
            Action::ReturnHome => "return_home",
            Action::Stop => "stop",
            Action::Exit => "exit",
            Action::Unknown => "unknown",
        }
    }

    /// Lenient lookup used for language-model replies: case, spaces and dashes
    /// are ignored and a handful of synonyms are accepted.
    pub fn from_name(name: &str) -> Action {
        let key = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "forward" | "forwards" | "ahead" => Action::Forward,
            "backward" | "backwards" | "back" | "reverse" => Action::Backward,
            "left" => Action::Left,
            "right" => Action::Right,
            "up" | "ascend" | "rise" => Action::Up,
            "down" | "descend" | "lower" => Action::Down,
            "turn_left" | "rotate_left" | "yaw_left" => Action::TurnLeft,
            "turn_right" | "rotate_right" | "yaw_right" | "turn_around" | "turn_back" | "spin_around" => {
                Action::TurnRight
            }
            "takeoff" | "take_off" | "launch" => Action::Takeoff,
            "land" | "landing" => Action::Land,
            "return_home" | "return" | "home" | "rth" | "return_to_launch" => Action::ReturnHome,
            "stop" | "hover" | "halt" => Action::Stop,
            "exit" | "quit" | "end" => Action::Exit,
            _ => Action::Unknown,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which path produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Model,
    Fallback,
    Manual,
}

/// Canonical command record, independent of whether it came from speech, a
/// language model or the manual grammar.
///
/// Construct through [`CommandRecord::new`] / [`CommandRecord::not_a_command`] so
/// that `kind` always follows `action`, movement records always carry a distance
/// and rotation records always carry an angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub is_command: bool,
    pub kind: CommandKind,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
    pub confidence: f32,
    pub raw_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpretation: Option<String>,
    pub source: Source,
}

impl CommandRecord {
    pub fn new(action: Action, raw_text: impl Into<String>, source: Source) -> Self {
        let kind = action.kind();
        Self {
            is_command: action != Action::Unknown,
            kind,
            action,
            distance: (kind == CommandKind::Movement).then_some(DEFAULT_DISTANCE_M),
            angle: (kind == CommandKind::Rotation).then_some(DEFAULT_ANGLE_DEG),
            confidence: 1.0,
            raw_text: raw_text.into(),
            interpretation: None,
            source,
        }
    }

    pub fn not_a_command(raw_text: impl Into<String>, source: Source) -> Self {
        Self {
            is_command: false,
            ..Self::new(Action::Unknown, raw_text, source)
        }
    }

    /// Distance is kept for movement and takeoff (climb height) only, clamped
    /// to `[MIN_DISTANCE_M, MAX_DISTANCE_M]`.
    pub fn with_distance(mut self, meters: f32) -> Self {
        if matches!(self.kind, CommandKind::Movement) || self.action == Action::Takeoff {
            self.distance = Some(clamp_distance(meters));
        }
        self
    }

    /// Angle is kept for rotation only. The sign comes from the action, so the
    /// magnitude is used.
    pub fn with_angle(mut self, degrees: f32) -> Self {
        if self.kind == CommandKind::Rotation {
            self.angle = Some(if degrees.is_finite() { degrees.abs() } else { DEFAULT_ANGLE_DEG });
        }
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 1.0 };
        self
    }

    pub fn with_interpretation(mut self, text: impl Into<String>) -> Self {
        self.interpretation = Some(text.into());
        self
    }

    pub fn distance_or_default(&self) -> f32 {
        self.distance.unwrap_or(DEFAULT_DISTANCE_M)
    }

    pub fn angle_or_default(&self) -> f32 {
        self.angle.unwrap_or(DEFAULT_ANGLE_DEG)
    }
}

pub fn clamp_distance(meters: f32) -> f32 {
    if meters.is_finite() {
        meters.clamp(MIN_DISTANCE_M, MAX_DISTANCE_M)
    } else {
        DEFAULT_DISTANCE_M
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn movement_records_carry_a_default_distance() {
        let rec = CommandRecord::new(Action::Up, "go up", Source::Fallback);
        assert!(rec.is_command);
        assert_eq!(rec.kind, CommandKind::Movement);
        assert_eq!(rec.distance, Some(DEFAULT_DISTANCE_M));
        assert_eq!(rec.angle, None);
    }

    #[test]
    fn rotation_records_carry_a_default_angle() {
        let rec = CommandRecord::new(Action::TurnLeft, "turn left", Source::Fallback);
        assert_eq!(rec.kind, CommandKind::Rotation);
        assert_eq!(rec.angle, Some(DEFAULT_ANGLE_DEG));
        assert_eq!(rec.distance, None);
    }

    #[test]
    fn not_a_command_has_kind_none_and_unknown_action() {
        let rec = CommandRecord::not_a_command("hello there", Source::Model);
        assert!(!rec.is_command);
        assert_eq!(rec.kind, CommandKind::None);
        assert_eq!(rec.action, Action::Unknown);
    }

    #[test]
    fn distance_is_clamped_and_ignored_for_rotation() {
        let far = CommandRecord::new(Action::Forward, "", Source::Manual).with_distance(12.0);
        assert_eq!(far.distance, Some(MAX_DISTANCE_M));
        let near = CommandRecord::new(Action::Forward, "", Source::Manual).with_distance(0.0);
        assert_eq!(near.distance, Some(MIN_DISTANCE_M));
        let turn = CommandRecord::new(Action::TurnRight, "", Source::Manual).with_distance(3.0);
        assert_eq!(turn.distance, None);
    }

    #[test]
    fn negative_angle_uses_magnitude() {
        let rec = CommandRecord::new(Action::TurnRight, "", Source::Model).with_angle(-45.0);
        assert_eq!(rec.angle, Some(45.0));
    }

    #[test]
    fn action_names_are_lenient() {
        assert_eq!(Action::from_name("Turn Right"), Action::TurnRight);
        assert_eq!(Action::from_name("return-to-launch"), Action::ReturnHome);
        assert_eq!(Action::from_name("hover"), Action::Stop);
        assert_eq!(Action::from_name("barrel roll"), Action::Unknown);
    }

    #[test]
    fn record_serializes_with_snake_case_names() {
        let rec = CommandRecord::new(Action::ReturnHome, "go home", Source::Fallback);
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"action\":\"return_home\""));
        assert!(json.contains("\"kind\":\"action\""));
        assert!(!json.contains("distance"));
    }
}
