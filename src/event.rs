//! Streamed event payloads.
//!
//! Only the handful of fields the router needs are modelled, and they are read
//! leniently: a field of an unexpected type is treated as absent. Attribution
//! depends on `entities.hashtags[].text` alone, so a payload is malformed only
//! when it is not a JSON object.

use serde_json::Value;

use crate::error::DecodeError;

/// A hashtag entity attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hashtag {
    /// Hashtag text without the leading `#`.
    pub text: String,
}

/// Entity block of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Entities {
    /// Hashtags in payload order.
    pub hashtags: Vec<Hashtag>,
}

impl Entities {
    fn from_value(value: &Value) -> Self {
        let hashtags = value
            .get("hashtags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.get("text").and_then(Value::as_str))
                    .map(|text| Hashtag {
                        text: text.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { hashtags }
    }
}

/// Author of an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventUser {
    /// Numeric user id.
    pub id: Option<u64>,
    /// String form of the user id, when the source sends one.
    pub id_str: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Handle.
    pub screen_name: Option<String>,
}

impl EventUser {
    fn from_value(value: &Value) -> Self {
        Self {
            id: numeric_field(value, "id"),
            id_str: text_field(value, "id_str"),
            name: text_field(value, "name"),
            screen_name: text_field(value, "screen_name"),
        }
    }

    /// String form of the user id, preferring `id_str`.
    #[must_use]
    pub fn id_string(&self) -> Option<String> {
        self.id_str
            .clone()
            .or_else(|| self.id.map(|id| id.to_string()))
    }
}

/// The typed view of one streamed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamEvent {
    /// Numeric event id.
    pub id: Option<u64>,
    /// String form of the event id.
    pub id_str: Option<String>,
    /// Event body.
    pub text: Option<String>,
    /// Author, when the payload carries a user object.
    pub user: Option<EventUser>,
    /// Entity block, when the payload carries one.
    pub entities: Option<Entities>,
}

impl StreamEvent {
    /// Build the typed view of a JSON object. Fields of the wrong type are
    /// left empty.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        Self {
            id: numeric_field(value, "id"),
            id_str: text_field(value, "id_str"),
            text: text_field(value, "text"),
            user: value
                .get("user")
                .filter(|u| u.is_object())
                .map(EventUser::from_value),
            entities: value
                .get("entities")
                .filter(|e| e.is_object())
                .map(Entities::from_value),
        }
    }

    /// Source-assigned identifier, preferring `id_str` over the numeric id.
    #[must_use]
    pub fn event_id(&self) -> Option<String> {
        self.id_str
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| self.id.map(|id| id.to_string()))
    }

    /// Hashtag texts in payload order. Empty when the entity block is absent.
    pub fn hashtags(&self) -> impl Iterator<Item = &str> {
        self.entities
            .iter()
            .flat_map(|e| e.hashtags.iter())
            .map(|h| h.text.as_str())
    }
}

/// A decoded event together with its verbatim payload.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    /// Typed view used for attribution.
    pub event: StreamEvent,
    /// The payload as received, stored under the event id.
    pub raw: Value,
}

/// Decode one raw payload.
///
/// # Errors
/// `DecodeError::Malformed` if the bytes are not JSON or the JSON is not an
/// object.
pub fn decode(raw: &[u8]) -> Result<DecodedEvent, DecodeError> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    if !value.is_object() {
        return Err(DecodeError::Malformed(format!(
            "expected a JSON object, got {}",
            kind_of(&value)
        )));
    }
    let event = StreamEvent::from_value(&value);
    Ok(DecodedEvent { event, raw: value })
}

/// Unsigned integer field, accepting a number or a decimal string.
fn numeric_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// String field, accepting a string or a number.
fn text_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_full_payload() {
        let raw = br#"{
            "id": 1001,
            "id_str": "1001",
            "text": "go #rust",
            "user": {"id": 7, "id_str": "7", "name": "Ferris", "screen_name": "ferris"},
            "entities": {"hashtags": [{"text": "rust", "indices": [3, 8]}]}
        }"#;

        let decoded = decode(raw).unwrap();
        assert_eq!(decoded.event.event_id().as_deref(), Some("1001"));
        assert_eq!(decoded.event.hashtags().collect::<Vec<_>>(), vec!["rust"]);
        assert_eq!(decoded.raw["entities"]["hashtags"][0]["indices"][1], 8);
        assert_eq!(
            decoded.event.user.unwrap().id_string().as_deref(),
            Some("7")
        );
    }

    #[test]
    fn test_missing_entities_means_no_hashtags() {
        let decoded = decode(br#"{"id": 5, "text": "plain"}"#).unwrap();
        assert_eq!(decoded.event.hashtags().count(), 0);
        assert_eq!(decoded.event.event_id().as_deref(), Some("5"));
    }

    #[test]
    fn test_empty_object_is_valid() {
        let decoded = decode(b"{}").unwrap();
        assert_eq!(decoded.event, StreamEvent::default());
        assert!(decoded.event.event_id().is_none());
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(decode(b"{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b"\xff\xfe garbage"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_rejects_non_object() {
        let err = decode(b"42").unwrap_err();
        assert!(err.to_string().contains("a number"));
        assert!(decode(br#"["rust"]"#).is_err());
        assert!(decode(b"null").is_err());
    }

    #[test]
    fn test_string_ids_are_accepted() {
        let decoded =
            decode(br#"{"id": "6", "user": {"id": "7"}, "entities": {"hashtags": [{"text": "rust"}]}}"#)
                .unwrap();
        assert_eq!(decoded.event.id, Some(6));
        assert_eq!(decoded.event.event_id().as_deref(), Some("6"));
        assert_eq!(decoded.event.user.as_ref().unwrap().id_string().as_deref(), Some("7"));
        assert_eq!(decoded.event.hashtags().collect::<Vec<_>>(), vec!["rust"]);
    }

    #[test]
    fn test_numeric_id_str_is_stringified() {
        let decoded = decode(br#"{"id_str": 99}"#).unwrap();
        assert_eq!(decoded.event.event_id().as_deref(), Some("99"));
    }

    #[test]
    fn test_wrongly_typed_entities_carry_no_hashtags() {
        for raw in [
            br#"{"entities": {"hashtags": null}}"#.as_slice(),
            br#"{"entities": {"hashtags": "rust"}}"#.as_slice(),
            br#"{"entities": 5}"#.as_slice(),
            br#"{"entities": {"hashtags": [{"text": 3}, "rust"]}}"#.as_slice(),
        ] {
            let decoded = decode(raw).unwrap();
            assert_eq!(decoded.event.hashtags().count(), 0, "{}", String::from_utf8_lossy(raw));
        }
    }

    #[test]
    fn test_wrongly_typed_user_is_dropped() {
        let decoded =
            decode(br#"{"user": "ferris", "entities": {"hashtags": [{"text": "rust"}]}}"#).unwrap();
        assert!(decoded.event.user.is_none());
        assert_eq!(decoded.event.hashtags().count(), 1);
    }
}
