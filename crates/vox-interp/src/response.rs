use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use vox_proto::command::{Action, CommandRecord, Source};

#[derive(Debug, Error)]
pub enum ReplyError {
    #[error("no JSON object in reply")]
    NoObject,
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Model reply as sent on the wire. Field names of the older reply shape
/// (`is_drone_command`, `original_text`, nested `parameters`) are accepted too.
/// `kind`/`command_type` is not read: it is always derived from the action.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ModelReply {
    #[serde(alias = "is_drone_command")]
    pub is_command: Option<bool>,
    pub action: Option<String>,
    #[serde(deserialize_with = "number")]
    pub distance: Option<f64>,
    #[serde(deserialize_with = "number")]
    pub angle: Option<f64>,
    pub parameters: Option<Parameters>,
    #[serde(deserialize_with = "number")]
    pub confidence: Option<f64>,
    #[serde(alias = "original_text")]
    pub raw_text: Option<String>,
    pub interpretation: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub direction: Option<String>,
    #[serde(deserialize_with = "number")]
    pub distance: Option<f64>,
    #[serde(deserialize_with = "number")]
    pub angle: Option<f64>,
}

// numbers sometimes arrive quoted
fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Locates the JSON object in a model reply: markdown fences (with or without a
/// language tag) and prose before or after the object are dropped.
pub fn extract_object(reply: &str) -> Option<&str> {
    let body = match reply.find("```") {
        Some(open) => {
            let inner = reply[open + 3..].trim_start_matches(|c: char| c.is_ascii_alphanumeric());
            match inner.find("```") {
                Some(close) => &inner[..close],
                None => inner,
            }
        }
        None => reply,
    };
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (end > start).then(|| &body[start..=end])
}

pub fn parse_reply(reply: &str, utterance: &str) -> Result<CommandRecord, ReplyError> {
    let object = extract_object(reply).ok_or(ReplyError::NoObject)?;
    let parsed: ModelReply = serde_json::from_str(object)?;
    Ok(normalize(parsed, utterance))
}

/// Turns a reply into a canonical record. The action name is looked up
/// leniently; an unknown action makes the record a non-command.
pub fn normalize(reply: ModelReply, utterance: &str) -> CommandRecord {
    let params = reply.parameters.unwrap_or_default();

    if reply.is_command == Some(false) {
        let rec = CommandRecord::not_a_command(utterance, Source::Model);
        return match reply.interpretation {
            Some(text) => rec.with_interpretation(text),
            None => rec,
        };
    }

    let name = reply.action.or(params.direction).unwrap_or_default();
    let key = name.trim().to_ascii_lowercase().replace([' ', '-'], "_");
    let action = Action::from_name(&key);

    let mut rec = CommandRecord::new(action, utterance, Source::Model);
    if let Some(d) = reply.distance.or(params.distance) {
        rec = rec.with_distance(d as f32);
    }
    match reply.angle.or(params.angle) {
        Some(a) => rec = rec.with_angle(a as f32),
        None if matches!(key.as_str(), "turn_around" | "turn_back" | "spin_around") => rec = rec.with_angle(180.0),
        None => {}
    }
    if let Some(c) = reply.confidence {
        rec = rec.with_confidence(c as f32);
    }
    if let Some(text) = reply.interpretation {
        rec = rec.with_interpretation(text);
    }
    rec
}

#[cfg(test)]
mod tests {
    use super::*;
    use vox_proto::command::CommandKind;

    #[test]
    fn plain_canonical_reply() {
        let reply = r#"{"is_command": true, "kind": "movement", "action": "forward", "distance": 3.0,
            "angle": null, "confidence": 0.92, "interpretation": "Move forward 3 meters"}"#;
        let rec = parse_reply(reply, "move forward 3 meters").unwrap();
        assert!(rec.is_command);
        assert_eq!(rec.action, Action::Forward);
        assert_eq!(rec.kind, CommandKind::Movement);
        assert_eq!(rec.distance, Some(3.0));
        assert_eq!(rec.source, Source::Model);
        assert_eq!(rec.raw_text, "move forward 3 meters");
        assert_eq!(rec.interpretation.as_deref(), Some("Move forward 3 meters"));
    }

    #[test]
    fn fenced_reply_with_trailing_prose() {
        let reply = "```json\n{\"is_command\": true, \"action\": \"turn_right\", \"angle\": 45}\n```\nLet me know if you need more.";
        let rec = parse_reply(reply, "turn right 45 degrees").unwrap();
        assert_eq!(rec.action, Action::TurnRight);
        assert_eq!(rec.angle, Some(45.0));
    }

    #[test]
    fn fence_without_language_tag() {
        assert_eq!(extract_object("```\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_object("Sure! {\"a\":{\"b\":2}} done"), Some("{\"a\":{\"b\":2}}"));
        assert_eq!(extract_object("no json here"), None);
    }

    #[test]
    fn older_reply_shape_is_accepted() {
        let reply = r#"{"is_drone_command": true, "command_type": "rotation", "action": "turn left",
            "parameters": {"direction": null, "distance": null, "angle": "30"},
            "confidence": 0.8, "original_text": "rotate left thirty"}"#;
        let rec = parse_reply(reply, "rotate left thirty").unwrap();
        assert_eq!(rec.action, Action::TurnLeft);
        assert_eq!(rec.angle, Some(30.0));
        assert_eq!(rec.raw_text, "rotate left thirty");
    }

    #[test]
    fn kind_is_derived_not_trusted() {
        let reply = r#"{"is_command": true, "kind": "rotation", "action": "up", "distance": 1}"#;
        let rec = parse_reply(reply, "up one").unwrap();
        assert_eq!(rec.kind, CommandKind::Movement);
    }

    #[test]
    fn turn_around_is_half_turn_right() {
        let rec = parse_reply(r#"{"is_command": true, "action": "turn around"}"#, "turn around").unwrap();
        assert_eq!(rec.action, Action::TurnRight);
        assert_eq!(rec.angle, Some(180.0));
    }

    #[test]
    fn model_distance_is_clamped() {
        let rec = parse_reply(r#"{"is_command": true, "action": "down", "distance": 40}"#, "way down").unwrap();
        assert_eq!(rec.distance, Some(5.0));
    }

    #[test]
    fn non_command_keeps_interpretation() {
        let reply = r#"{"is_command": false, "kind": "none", "action": "unknown", "interpretation": "small talk"}"#;
        let rec = parse_reply(reply, "how's the weather today?").unwrap();
        assert!(!rec.is_command);
        assert_eq!(rec.kind, CommandKind::None);
        assert_eq!(rec.interpretation.as_deref(), Some("small talk"));
    }

    #[test]
    fn unknown_action_is_not_a_command() {
        let rec = parse_reply(r#"{"is_command": true, "action": "barrel_roll"}"#, "do a barrel roll").unwrap();
        assert!(!rec.is_command);
        assert_eq!(rec.action, Action::Unknown);
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(parse_reply("{not json}", "x"), Err(ReplyError::Json(_))));
        assert!(matches!(parse_reply("I cannot help with that", "x"), Err(ReplyError::NoObject)));
    }
}
