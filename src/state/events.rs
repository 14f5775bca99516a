use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Connection identity inside the core. Allocated by the registry, never
/// derived from the transport handle.
pub type SessionId = u64;

/// Recipient list for one outbound event (lobbies hold a handful of players)
pub type Recipients = SmallVec<[SessionId; 4]>;

/// Wire envelope shared by inbound and outbound traffic:
/// `{type, data}` on success, `{type, error: {field: message}}` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    /// Envelope with no payload, e.g. `{"type": "start"}`
    pub fn bare(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            data: None,
            error: None,
        }
    }

    pub fn error(kind: impl Into<String>, field: &str, message: &str) -> Self {
        let mut error = Map::new();
        error.insert(field.to_string(), Value::String(message.to_string()));
        Self {
            kind: kind.into(),
            data: None,
            error: Some(Value::Object(error)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An envelope paired with the explicit set of sessions that must receive it
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipients,
    pub envelope: Envelope,
}

impl Outbound {
    pub fn to_one(session: SessionId, envelope: Envelope) -> Self {
        let mut to = Recipients::new();
        to.push(session);
        Self { to, envelope }
    }

    pub fn to_many(sessions: impl IntoIterator<Item = SessionId>, envelope: Envelope) -> Self {
        Self {
            to: sessions.into_iter().collect(),
            envelope,
        }
    }

    pub fn is_for(&self, session: SessionId) -> bool {
        self.to.contains(&session)
    }
}

/// Delivery side of the transport. Fire-and-forget.
pub trait Transport: Send + Sync {
    fn send(&self, recipients: &[SessionId], envelope: &Envelope);
}

pub fn deliver(transport: &dyn Transport, events: Vec<Outbound>) {
    for event in events {
        transport.send(&event.to, &event.envelope);
    }
}
