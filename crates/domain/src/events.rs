//! Event taxonomy and the wire envelope for queue fan-out.

use serde::{Deserialize, Serialize};

/// Every event name a subscriber can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    EntryCreate,
    EntryUpdate,
    EntryRemove,
    EntryPinned,
    EntryHelping,
    StackRemove,
    QueueOpen,
    QueueClear,
    QueueRandomize,
    NotHelped,
    AnnouncementCreate,
    AnnouncementDelete,
    MessageCreate,
    UserStatusUpdate,
    QueueConnectionsUpdate,
    Refresh,
    Ping,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::EntryCreate => "ENTRY_CREATE",
            EventKind::EntryUpdate => "ENTRY_UPDATE",
            EventKind::EntryRemove => "ENTRY_REMOVE",
            EventKind::EntryPinned => "ENTRY_PINNED",
            EventKind::EntryHelping => "ENTRY_HELPING",
            EventKind::StackRemove => "STACK_REMOVE",
            EventKind::QueueOpen => "QUEUE_OPEN",
            EventKind::QueueClear => "QUEUE_CLEAR",
            EventKind::QueueRandomize => "QUEUE_RANDOMIZE",
            EventKind::NotHelped => "NOT_HELPED",
            EventKind::AnnouncementCreate => "ANNOUNCEMENT_CREATE",
            EventKind::AnnouncementDelete => "ANNOUNCEMENT_DELETE",
            EventKind::MessageCreate => "MESSAGE_CREATE",
            EventKind::UserStatusUpdate => "USER_STATUS_UPDATE",
            EventKind::QueueConnectionsUpdate => "QUEUE_CONNECTIONS_UPDATE",
            EventKind::Refresh => "REFRESH",
            EventKind::Ping => "PING",
        }
    }
}

/// The `{"e": ..., "d": ...}` envelope carried on the bus and over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub e: String,
    #[serde(default)]
    pub d: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: EventKind, data: impl Serialize) -> Self {
        Self {
            e: kind.name().to_string(),
            d: serde_json::to_value(data).unwrap_or_default(),
        }
    }

    /// An envelope with a null payload.
    pub fn signal(kind: EventKind) -> Self {
        Self {
            e: kind.name().to_string(),
            d: serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::new(EventKind::QueueOpen, true);
        let json = serde_json::to_string(&env).unwrap();
        assert_eq!(json, r#"{"e":"QUEUE_OPEN","d":true}"#);
    }

    #[test]
    fn signal_carries_null() {
        let env = Envelope::signal(EventKind::Refresh);
        assert_eq!(serde_json::to_string(&env).unwrap(), r#"{"e":"REFRESH","d":null}"#);
    }

    #[test]
    fn client_frames_parse() {
        let pong: Envelope = serde_json::from_str(r#"{"e":"PONG"}"#).unwrap();
        assert_eq!(pong.e, "PONG");
        assert!(pong.d.is_null());
    }
}
