use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Base metadata the host attaches to a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BaseInfo {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub user_id: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub time: Option<f64>,
}

/// Relation to the most recent turn in the conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnRelation {
    #[serde(default)]
    pub sender_id: Option<String>,
    /// Set when the reply is explicitly addressed to someone (e.g. a quoted reply).
    #[serde(default)]
    pub reply_to_user_id: Option<String>,
}

/// One outgoing content segment. Text segments carry a JSON string payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub kind: String,
    pub data: Value,
}

impl Segment {
    pub fn text(text: &str) -> Self {
        Self {
            kind: "text".to_string(),
            data: Value::String(text.to_string()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        if self.kind != "text" {
            return None;
        }
        self.data.as_str()
    }
}

/// The per-stage message object the host hands to each lifecycle callback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookMessage {
    #[serde(default)]
    pub stream_id: Option<String>,
    #[serde(default)]
    pub llm_prompt: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default)]
    pub base_info: BaseInfo,
    #[serde(default)]
    pub plain_text: Option<String>,
    #[serde(default)]
    pub last_turn: Option<TurnRelation>,
    /// Host-specific attributes that have no typed field here.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl HookMessage {
    pub fn modify_llm_prompt(&mut self, prompt: String) {
        self.llm_prompt = Some(prompt);
    }

    pub fn modify_segments(&mut self, segments: Vec<Segment>) {
        self.segments = segments;
    }

    /// Non-empty conversation id, if the host supplied one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.stream_id.as_deref().filter(|s| !s.is_empty())
    }
}

/// Capabilities the identity resolver probes, in fallback order.
pub trait TurnSource {
    /// Subject the reply is explicitly addressed to.
    fn addressed_subject(&self) -> Option<String>;
    /// Sender of the most recent turn.
    fn sender_subject(&self) -> Option<String>;
    /// Subject id carried directly on the event.
    fn raw_subject_field(&self) -> Option<String>;
    /// Subject id found in nested host attributes.
    fn nested_subject(&self) -> Option<String> {
        None
    }
    fn timestamp(&self) -> Option<f64>;
    fn plain_text(&self) -> Option<String>;
}

const NESTED_SUBJECT_ATTRS: [&str; 3] = ["message", "msg", "data"];

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl TurnSource for HookMessage {
    fn addressed_subject(&self) -> Option<String> {
        self.last_turn.as_ref()?.reply_to_user_id.clone()
    }

    fn sender_subject(&self) -> Option<String> {
        self.last_turn.as_ref()?.sender_id.clone()
    }

    fn raw_subject_field(&self) -> Option<String> {
        self.base_info.user_id.clone()
    }

    fn nested_subject(&self) -> Option<String> {
        NESTED_SUBJECT_ATTRS.iter().find_map(|attr| {
            self.extra
                .get(*attr)
                .and_then(|v| v.get("user_id"))
                .and_then(value_as_id)
        })
    }

    fn timestamp(&self) -> Option<f64> {
        self.base_info.time
    }

    fn plain_text(&self) -> Option<String> {
        if let Some(text) = self.plain_text.as_deref().filter(|t| !t.is_empty()) {
            return Some(text.to_string());
        }
        let joined = self
            .segments
            .iter()
            .filter_map(|s| match &s.data {
                Value::String(text) => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ");
        if joined.trim().is_empty() {
            None
        } else {
            Some(joined)
        }
    }
}

/// What a lifecycle callback hands back to the host.
#[derive(Debug, Clone)]
pub struct HookOutcome {
    pub continue_processing: bool,
    pub intercept: bool,
    pub note: Option<String>,
    pub error: Option<String>,
    /// The modified message, when this callback changed it.
    pub message: Option<HookMessage>,
}

impl HookOutcome {
    /// Continue, no interception, nothing changed.
    pub fn pass() -> Self {
        Self {
            continue_processing: true,
            intercept: false,
            note: None,
            error: None,
            message: None,
        }
    }

    /// Continue with a note but no message change.
    pub fn noted(note: &str) -> Self {
        Self {
            note: Some(note.to_string()),
            ..Self::pass()
        }
    }

    pub fn modified(note: &str, message: HookMessage) -> Self {
        Self {
            continue_processing: true,
            intercept: true,
            note: Some(note.to_string()),
            error: None,
            message: Some(message),
        }
    }

    pub fn into_tuple(
        self,
    ) -> (
        bool,
        bool,
        Option<String>,
        Option<String>,
        Option<HookMessage>,
    ) {
        (
            self.continue_processing,
            self.intercept,
            self.note,
            self.error,
            self.message,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_subject_scans_known_attributes_in_order() {
        let mut msg = HookMessage::default();
        msg.extra.insert("data".into(), json!({"user_id": "from-data"}));
        msg.extra.insert("msg".into(), json!({"user_id": 777}));
        assert_eq!(msg.nested_subject().as_deref(), Some("777"));
    }

    #[test]
    fn plain_text_falls_back_to_segment_payloads() {
        let msg = HookMessage {
            segments: vec![
                Segment::text("hello"),
                Segment {
                    kind: "image".into(),
                    data: json!({"url": "x"}),
                },
                Segment::text("there"),
            ],
            ..Default::default()
        };
        assert_eq!(msg.plain_text().as_deref(), Some("hello there"));
    }

    #[test]
    fn as_text_requires_text_kind() {
        let seg = Segment {
            kind: "emoji".into(),
            data: json!("smile"),
        };
        assert!(seg.as_text().is_none());
        assert_eq!(Segment::text("hi").as_text(), Some("hi"));
    }

    #[test]
    fn empty_stream_id_is_not_a_conversation() {
        let msg = HookMessage {
            stream_id: Some(String::new()),
            ..Default::default()
        };
        assert!(msg.conversation_id().is_none());
    }
}
