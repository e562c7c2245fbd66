//! Keyword fallback used when the language model is unavailable or its reply
//! cannot be parsed.
//!
//! Rules are tried in table order and the first match wins, so precedence is
//! part of the behavior: "back" is checked after the forward words, and plain
//! "left"/"right" only match when "turn" is absent.

use vox_proto::command::{Action, CommandRecord, Source};

struct Rule {
    matches: fn(&str) -> bool,
    action: Action,
}

fn any_of(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| text.contains(w))
}

const RULES: &[Rule] = &[
    Rule { matches: |t| any_of(t, &["forward", "ahead", "front"]), action: Action::Forward },
    Rule { matches: |t| any_of(t, &["back", "backward", "reverse"]), action: Action::Backward },
    Rule { matches: |t| t.contains("left") && !t.contains("turn"), action: Action::Left },
    Rule { matches: |t| t.contains("right") && !t.contains("turn"), action: Action::Right },
    Rule { matches: |t| any_of(t, &["up", "rise", "ascend"]), action: Action::Up },
    Rule { matches: |t| any_of(t, &["down", "descend", "lower"]), action: Action::Down },
    Rule { matches: |t| t.contains("turn right"), action: Action::TurnRight },
    Rule { matches: |t| t.contains("turn left"), action: Action::TurnLeft },
    Rule { matches: |t| any_of(t, &["land", "landing"]), action: Action::Land },
    Rule { matches: |t| any_of(t, &["takeoff", "take off", "launch"]), action: Action::Takeoff },
    Rule { matches: |t| any_of(t, &["home", "return", "rth"]), action: Action::ReturnHome },
    Rule { matches: |t| any_of(t, &["stop", "halt", "hover"]), action: Action::Stop },
    Rule { matches: |t| any_of(t, &["exit", "quit", "end"]), action: Action::Exit },
];

/// Deterministic keyword match. Movement gets the default distance, rotation
/// the default angle, confidence is 1.0.
pub fn match_text(text: &str) -> CommandRecord {
    let lower = text.to_lowercase();
    match RULES.iter().find(|r| (r.matches)(&lower)) {
        Some(rule) => CommandRecord::new(rule.action, text, Source::Fallback),
        None => CommandRecord::not_a_command(text, Source::Fallback).with_interpretation("Not a drone command"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_proto::command::{CommandKind, DEFAULT_ANGLE_DEG, DEFAULT_DISTANCE_M};

    fn action(text: &str) -> Action {
        match_text(text).action
    }

    #[test]
    fn synonyms() {
        assert_eq!(action("go ahead"), Action::Forward);
        assert_eq!(action("Reverse please"), Action::Backward);
        assert_eq!(action("rise"), Action::Up);
        assert_eq!(action("descend slowly"), Action::Down);
        assert_eq!(action("take off now"), Action::Takeoff);
        assert_eq!(action("come home"), Action::ReturnHome);
        assert_eq!(action("HOVER"), Action::Stop);
        assert_eq!(action("quit"), Action::Exit);
    }

    #[test]
    fn turn_suppresses_plain_left_and_right() {
        assert_eq!(action("move left"), Action::Left);
        assert_eq!(action("turn left"), Action::TurnLeft);
        assert_eq!(action("turn right"), Action::TurnRight);
    }

    #[test]
    fn earlier_rules_win() {
        // "forward" is checked before "back"
        assert_eq!(action("go forward then back"), Action::Forward);
        // "up" precedes "land"
        assert_eq!(action("pull up, don't land"), Action::Up);
    }

    #[test]
    fn defaults_are_filled_in() {
        let rec = match_text("move forward 3 meters");
        assert_eq!(rec.distance, Some(DEFAULT_DISTANCE_M));
        assert_eq!(rec.confidence, 1.0);
        assert_eq!(rec.source, Source::Fallback);
        assert_eq!(match_text("turn right 45 degrees").angle, Some(DEFAULT_ANGLE_DEG));
    }

    #[test]
    fn small_talk_is_not_a_command() {
        let rec = match_text("how's the weather today?");
        assert!(!rec.is_command);
        assert_eq!(rec.kind, CommandKind::None);
    }

    #[test]
    fn same_input_same_record() {
        for text in ["go up", "land it", "hello", "turn left a bit"] {
            assert_eq!(match_text(text), match_text(text));
        }
    }
}
