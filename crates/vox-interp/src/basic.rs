//! Keyword grammar of basic voice mode, used when no language model is
//! configured.
//!
//! Terminal words win over movement words ("go back and land" lands). Turns
//! need the spoken number of degrees after the direction word; movements fly
//! a fixed distance.

use vox_proto::command::{Action, CommandRecord, Source};

/// Distance flown by every basic-mode movement.
pub const BASIC_DISTANCE_M: f32 = 5.0;

enum Grammar {
    Plain(Action),
    /// Number of degrees expected after the keyword.
    Turn { action: Action, keyword: &'static str },
}

struct Rule {
    matches: fn(&str) -> bool,
    grammar: Grammar,
}

const RULES: &[Rule] = &[
    Rule { matches: |t| t.contains("exit"), grammar: Grammar::Plain(Action::Exit) },
    Rule { matches: |t| t.contains("land"), grammar: Grammar::Plain(Action::Land) },
    Rule { matches: |t| t.contains("return") || t.contains("home"), grammar: Grammar::Plain(Action::ReturnHome) },
    Rule {
        matches: |t| t.contains("turn right"),
        grammar: Grammar::Turn { action: Action::TurnRight, keyword: "right" },
    },
    Rule {
        matches: |t| t.contains("turn left"),
        grammar: Grammar::Turn { action: Action::TurnLeft, keyword: "left" },
    },
    Rule { matches: |t| t.contains("forward"), grammar: Grammar::Plain(Action::Forward) },
    Rule { matches: |t| t.contains("back"), grammar: Grammar::Plain(Action::Backward) },
    Rule { matches: |t| t.contains("right") && !t.contains("turn"), grammar: Grammar::Plain(Action::Right) },
    Rule { matches: |t| t.contains("left") && !t.contains("turn"), grammar: Grammar::Plain(Action::Left) },
    Rule { matches: |t| t.contains("up"), grammar: Grammar::Plain(Action::Up) },
    Rule { matches: |t| t.contains("down"), grammar: Grammar::Plain(Action::Down) },
];

pub fn match_text(text: &str) -> CommandRecord {
    let lower = text.to_lowercase();
    let Some(rule) = RULES.iter().find(|r| (r.matches)(&lower)) else {
        return CommandRecord::not_a_command(text, Source::Fallback).with_interpretation("Unrecognized command");
    };

    match rule.grammar {
        Grammar::Plain(action) => CommandRecord::new(action, text, Source::Fallback).with_distance(BASIC_DISTANCE_M),
        Grammar::Turn { action, keyword } => match degrees_after(&lower, keyword) {
            Some(deg) => CommandRecord::new(action, text, Source::Fallback).with_angle(deg),
            None => CommandRecord::not_a_command(text, Source::Fallback)
                .with_interpretation(format!("Say: turn {} <degrees>", keyword)),
        },
    }
}

/// First word after the last `keyword`, as a positive number of degrees.
fn degrees_after(text: &str, keyword: &str) -> Option<f32> {
    let (_, rest) = text.rsplit_once(keyword)?;
    let deg: f32 = rest.split_whitespace().next()?.trim_end_matches(['°', '.', ',']).parse().ok()?;
    (deg.is_finite() && deg > 0.0).then_some(deg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_proto::command::CommandKind;

    #[test]
    fn turns_use_spoken_degrees() {
        let rec = match_text("turn right 45");
        assert_eq!(rec.action, Action::TurnRight);
        assert_eq!(rec.angle, Some(45.0));

        let rec = match_text("Turn left 30 degrees");
        assert_eq!(rec.action, Action::TurnLeft);
        assert_eq!(rec.angle, Some(30.0));
    }

    #[test]
    fn turn_without_a_number_asks_for_one() {
        for text in ["turn right", "turn left a bit", "turn right -30"] {
            let rec = match_text(text);
            assert!(!rec.is_command, "{}", text);
            assert!(rec.interpretation.unwrap().starts_with("Say: turn"));
        }
    }

    #[test]
    fn terminal_words_come_first() {
        assert_eq!(match_text("go back and land").action, Action::Land);
        assert_eq!(match_text("forward, then exit").action, Action::Exit);
        assert_eq!(match_text("fly up and head home").action, Action::ReturnHome);
    }

    #[test]
    fn movements_fly_the_fixed_distance() {
        for (text, action) in [
            ("forward", Action::Forward),
            ("move back", Action::Backward),
            ("go right", Action::Right),
            ("left", Action::Left),
            ("up", Action::Up),
            ("down please", Action::Down),
        ] {
            let rec = match_text(text);
            assert_eq!(rec.action, action);
            assert_eq!(rec.distance, Some(BASIC_DISTANCE_M));
        }
    }

    #[test]
    fn unrecognized_speech() {
        let rec = match_text("how's the weather today?");
        assert!(!rec.is_command);
        assert_eq!(rec.kind, CommandKind::None);
        assert_eq!(match_text("stop").kind, CommandKind::None);
    }
}
