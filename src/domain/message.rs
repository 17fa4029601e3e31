use crate::domain::{MessageKind, MessageOp, SessionKey};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Integer timestamps below this are taken as unix seconds, otherwise milliseconds.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

const RESERVED_FIELDS: &[&str] = &[
    "id",
    "message_id",
    "thread_id",
    "session_id",
    "session_key",
    "source_path",
    "file",
    "kind",
    "type",
    "timestamp",
    "ts",
    "seq",
    "sequence",
    "op",
];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// Empty for legacy input; such messages are never dedup or patch targets.
    pub id: String,
    pub session_key: SessionKey,
    pub kind: MessageKind,
    pub timestamp: Option<String>,
    pub timestamp_ms: Option<i64>,
    pub sequence: Option<u64>,
    pub op: Option<MessageOp>,
    pub payload: Map<String, Value>,
    /// Receipt order assigned by the sync core; last-resort ordering tie-break.
    pub arrival: u64,
}

impl Message {
    pub fn new(id: impl Into<String>, session_key: SessionKey, kind: MessageKind) -> Self {
        Self {
            id: id.into(),
            session_key,
            kind,
            timestamp: None,
            timestamp_ms: None,
            sequence: None,
            op: None,
            payload: Map::new(),
            arrival: 0,
        }
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = Some(timestamp_ms);
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.payload
            .insert("text".to_string(), Value::String(text.to_string()));
        self
    }

    pub fn as_update(mut self) -> Self {
        self.op = Some(MessageOp::Update);
        self
    }

    pub fn is_update(&self) -> bool {
        self.op == Some(MessageOp::Update)
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Translated text wins over the original when a backfill has landed.
    pub fn text(&self) -> Option<&str> {
        ["translated_text", "text", "summary", "output"]
            .iter()
            .filter_map(|field| self.payload.get(*field).and_then(|v| v.as_str()))
            .find(|text| !text.trim().is_empty())
    }

    pub fn summary(&self) -> String {
        self.text()
            .and_then(first_non_empty_line)
            .unwrap_or_else(|| format!("({})", self.kind.label()))
    }

    /// Merges the fields carried by an update event over this message's payload.
    pub fn apply_patch(&mut self, patch: &Message) {
        for (field, value) in &patch.payload {
            self.payload.insert(field.clone(), value.clone());
        }
        if self.timestamp.is_none() && patch.timestamp.is_some() {
            self.timestamp = patch.timestamp.clone();
        }
    }
}

/// Lenient conversion of one pushed or pulled JSON object. Returns `None` only for non-objects.
pub fn parse_message_value(value: &Value) -> Option<Message> {
    let object = value.as_object()?;

    let id = first_str(object, &["id", "message_id"])
        .map(str::to_string)
        .unwrap_or_default();
    let session_key = derive_session_key(object);
    let kind = first_str(object, &["kind", "type"])
        .map(MessageKind::from_tag)
        .unwrap_or_else(|| MessageKind::Other(String::new()));

    let raw_timestamp = object.get("timestamp").or_else(|| object.get("ts"));
    let timestamp = raw_timestamp.and_then(|v| v.as_str()).map(str::to_string);
    let timestamp_ms = raw_timestamp.and_then(parse_timestamp_value);

    let sequence = object
        .get("seq")
        .or_else(|| object.get("sequence"))
        .and_then(parse_sequence);

    let op = match first_str(object, &["op"]) {
        Some("update") => Some(MessageOp::Update),
        _ => None,
    };

    let payload = object
        .iter()
        .filter(|(field, _)| !RESERVED_FIELDS.contains(&field.as_str()))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect::<Map<String, Value>>();

    Some(Message {
        id,
        session_key,
        kind,
        timestamp,
        timestamp_ms,
        sequence,
        op,
        payload,
        arrival: 0,
    })
}

pub fn parse_message_line(line: &str) -> Result<Option<Message>, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    Ok(parse_message_value(&value))
}

fn derive_session_key(object: &Map<String, Value>) -> SessionKey {
    if let Some(key) = first_str(object, &["thread_id", "session_id", "session_key"]) {
        return SessionKey::new(key);
    }
    if let Some(path) = first_str(object, &["source_path", "file"]) {
        return SessionKey::new(format!("file:{path}"));
    }
    SessionKey::unknown()
}

fn first_str<'a>(object: &'a Map<String, Value>, fields: &[&str]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|field| object.get(*field).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

pub fn parse_sequence(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

/// RFC 3339 text or epoch numbers; values below 10^11 are taken as seconds.
pub fn parse_timestamp_value(value: &Value) -> Option<i64> {
    match value {
        Value::String(text) => parse_timestamp_text(text),
        Value::Number(number) => number.as_i64().map(normalize_epoch),
        _ => None,
    }
}

fn parse_timestamp_text(value: &str) -> Option<i64> {
    let trimmed = value.trim();
    if let Ok(raw) = trimmed.parse::<i64>() {
        return Some(normalize_epoch(raw));
    }
    parse_rfc3339_to_unix_ms(trimmed)
}

fn normalize_epoch(raw: i64) -> i64 {
    if raw.abs() < SECONDS_CUTOFF {
        raw.saturating_mul(1000)
    } else {
        raw
    }
}

pub fn parse_rfc3339_to_unix_ms(value: &str) -> Option<i64> {
    let timestamp = OffsetDateTime::parse(value, &Rfc3339).ok()?;
    let ms: i128 = timestamp.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(ms).ok()
}

pub fn first_non_empty_line(text: &str) -> Option<String> {
    text.lines()
        .map(|line| line.trim())
        .find(|line| !line.is_empty())
        .map(|line| line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assistant_message_with_rfc3339_timestamp() {
        let json = serde_json::json!({
            "id": "m1",
            "thread_id": "s1",
            "type": "assistant_message",
            "timestamp": "2026-02-18T21:45:57.803Z",
            "seq": 7,
            "text": "hello\nworld"
        });
        let message = parse_message_value(&json).expect("object");
        assert_eq!(message.id, "m1");
        assert_eq!(message.session_key.as_str(), "s1");
        assert_eq!(message.kind, MessageKind::AssistantMessage);
        assert_eq!(message.timestamp_ms, Some(1_771_451_157_803));
        assert_eq!(message.sequence, Some(7));
        assert_eq!(message.summary(), "hello");
        assert!(message.payload.contains_key("text"));
        assert!(!message.payload.contains_key("thread_id"));
    }

    #[test]
    fn falls_back_to_source_path_then_unknown() {
        let from_file = serde_json::json!({ "id": "a", "file": "/logs/rollout.jsonl" });
        let message = parse_message_value(&from_file).expect("object");
        assert_eq!(message.session_key.as_str(), "file:/logs/rollout.jsonl");

        let bare = serde_json::json!({ "id": "b" });
        let message = parse_message_value(&bare).expect("object");
        assert!(message.session_key.is_unknown());
        assert_eq!(message.kind, MessageKind::Other(String::new()));
    }

    #[test]
    fn malformed_input_is_kept_as_other_without_id() {
        let json = serde_json::json!({ "kind": "mystery", "ts": 1_700_000_000 });
        let message = parse_message_value(&json).expect("object");
        assert!(!message.has_id());
        assert_eq!(message.kind, MessageKind::Other("mystery".to_string()));
        assert_eq!(message.timestamp_ms, Some(1_700_000_000_000));
        assert!(parse_message_value(&serde_json::json!([1, 2])).is_none());
    }

    #[test]
    fn update_patch_merges_payload_fields() {
        let mut original = Message::new("m1", SessionKey::from("s1"), MessageKind::AssistantMessage)
            .with_text("bonjour");
        let line = r#"{"id":"m1","thread_id":"s1","op":"update","translated_text":"hello"}"#;
        let patch = parse_message_line(line).expect("json").expect("object");
        assert!(patch.is_update());

        original.apply_patch(&patch);
        assert_eq!(original.text(), Some("hello"));
        assert_eq!(
            original.payload.get("text").and_then(|v| v.as_str()),
            Some("bonjour")
        );
    }
}
