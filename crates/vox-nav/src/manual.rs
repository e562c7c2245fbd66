use thiserror::Error;
use vox_proto::command::{Action, CommandRecord, Source};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GrammarError {
    #[error("empty command")]
    Empty,
    #[error("unknown direction '{0}' (use f|b|l|r|u|d)")]
    UnknownDirection(String),
    #[error("'{0}' is not a number")]
    NotANumber(String),
    #[error("'{0}' is negative; use the opposite direction")]
    Negative(String),
    #[error("format: {0}")]
    Format(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ManualInput {
    Command(CommandRecord),
    /// Print a telemetry snapshot.
    Debug,
}

pub const HELP: &str = "\
Manual control:
  movement: f|b|l|r|u|d <meters>   e.g. 'f 1', 'u 0.5'
  turning:  turn_r <deg>, turn_l <deg>, turn_b
  commands: land, rth, debug, exit";

/// Parses one manual control line: `<direction> <meters>`, `turn_r|turn_l
/// <degrees>`, `turn_b` or a bare keyword.
pub fn parse(line: &str) -> Result<ManualInput, GrammarError> {
    let text = line.trim().to_ascii_lowercase();
    let tokens: Vec<&str> = text.split_whitespace().collect();

    let record = |action| CommandRecord::new(action, line.trim(), Source::Manual);

    match tokens.as_slice() {
        [] => Err(GrammarError::Empty),
        ["exit"] => Ok(ManualInput::Command(record(Action::Exit))),
        ["land"] => Ok(ManualInput::Command(record(Action::Land))),
        ["rth"] => Ok(ManualInput::Command(record(Action::ReturnHome))),
        ["debug"] => Ok(ManualInput::Debug),
        ["turn_b"] => Ok(ManualInput::Command(record(Action::TurnRight).with_angle(180.0))),
        ["turn_r", deg] => Ok(ManualInput::Command(record(Action::TurnRight).with_angle(number(deg)?))),
        ["turn_l", deg] => Ok(ManualInput::Command(record(Action::TurnLeft).with_angle(number(deg)?))),
        ["turn_r", ..] => Err(GrammarError::Format("turn_r <angle>")),
        ["turn_l", ..] => Err(GrammarError::Format("turn_l <angle>")),
        [dir, meters] => {
            let action = match *dir {
                "f" => Action::Forward,
                "b" => Action::Backward,
                "l" => Action::Left,
                "r" => Action::Right,
                "u" => Action::Up,
                "d" => Action::Down,
                other => return Err(GrammarError::UnknownDirection(other.to_string())),
            };
            Ok(ManualInput::Command(record(action).with_distance(number(meters)?)))
        }
        _ => Err(GrammarError::Format("<f|b|l|r|u|d> <meters>")),
    }
}

fn number(token: &str) -> Result<f32, GrammarError> {
    token
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GrammarError::NotANumber(token.to_string()))
        .and_then(|v| if v < 0.0 { Err(GrammarError::Negative(token.to_string())) } else { Ok(v) })
}
