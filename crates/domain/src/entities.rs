//! Queue entities and their wire projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::Tid;

/// A course owning one or more queues.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Course {
    pub id: Tid,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "queue_type", rename_all = "lowercase")]
pub enum QueueType {
    Ordered,
    Appointments,
}

/// A help queue. `active = false` is a soft delete.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Queue {
    pub id: Tid,
    pub course: Tid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub queue_type: QueueType,
    pub name: String,
    pub location: String,
    pub active: bool,
}

/// Per-queue behavior switches, 1:1 with the queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfiguration {
    pub id: Tid,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    pub enable_location_field: bool,
    pub prevent_unregistered: bool,
    pub prevent_groups: bool,
    pub prevent_groups_boost: bool,
    pub prioritize_new: bool,
    pub scheduled: bool,
    pub manual_open: bool,
    pub cooldown_seconds: i32,
    pub prompts: Vec<String>,
}

/// A student's place in a queue.
///
/// `active` is a nullable sentinel: non-null means the entry is on the queue,
/// null means it has been archived into the stack.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QueueEntry {
    pub id: Tid,
    pub queue: Tid,
    pub email: String,
    pub name: String,
    pub description: String,
    pub location: String,
    pub priority: i32,
    pub pinned: bool,
    pub helping: String,
    pub helped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed_by: Option<String>,
}

impl QueueEntry {
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_helping(&self) -> bool {
        !self.helping.is_empty()
    }

    /// The projection shown to non-privileged viewers: identity and free-form
    /// fields are stripped, and `helping` collapses to a generic marker so the
    /// helper's name never leaks.
    pub fn anonymized(&self) -> AnonymousEntry {
        AnonymousEntry {
            id: self.id,
            queue: self.queue,
            priority: self.priority,
            pinned: self.pinned,
            helping: if self.helping.is_empty() {
                String::new()
            } else {
                " staff".to_string()
            },
        }
    }
}

/// What everyone except admins and the entry's owner sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymousEntry {
    pub id: Tid,
    pub queue: Tid,
    pub priority: i32,
    pub pinned: bool,
    pub helping: String,
}

/// An entry serialized for a particular viewer.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EntryView {
    Full(QueueEntry),
    Anonymous(AnonymousEntry),
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Announcement {
    pub id: Tid,
    pub queue: Tid,
    pub content: String,
}

/// Receiver value that fans a message out to the whole queue.
pub const BROADCAST_RECEIVER: &str = "<broadcast>";

/// An ephemeral staff-to-student message. Never persisted; the sender is
/// redacted before it leaves the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Tid,
    pub queue: Tid,
    pub sender: String,
    pub receiver: String,
    pub content: String,
}

// Request bodies.

#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    pub description: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryUpdateRequest {
    pub description: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationUpdateRequest {
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub enable_location_field: bool,
    #[serde(default)]
    pub prevent_unregistered: bool,
    #[serde(default)]
    pub prevent_groups: bool,
    #[serde(default)]
    pub prevent_groups_boost: bool,
    #[serde(default)]
    pub prioritize_new: bool,
    #[serde(default)]
    pub scheduled: bool,
    pub cooldown_seconds: i32,
    #[serde(default)]
    pub prompts: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueUpdateRequest {
    pub name: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateQueueRequest {
    pub name: String,
    #[serde(default)]
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCourseRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncementRequest {
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRequest {
    pub receiver: String,
    pub content: String,
}

/// Full client-facing view of a queue, returned to a just-connected client.
#[derive(Debug, Serialize)]
pub struct QueueSnapshot {
    #[serde(rename = "queue")]
    pub entries: Vec<EntryView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<QueueEntry>>,
    pub configuration: QueueConfiguration,
    pub schedule: String,
    pub open: bool,
    pub announcements: Vec<Announcement>,
    pub half_hour: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub online: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(helping: &str) -> QueueEntry {
        QueueEntry {
            id: Tid::new(),
            queue: Tid::new(),
            email: "s@x.edu".into(),
            name: "Sam".into(),
            description: "need help".into(),
            location: "table 3".into(),
            priority: 1,
            pinned: false,
            helping: helping.into(),
            helped: false,
            active: Some(true),
            removed_at: None,
            removed_by: None,
        }
    }

    #[test]
    fn anonymized_strips_identity() {
        let anon = entry("").anonymized();
        let json = serde_json::to_value(&anon).unwrap();
        assert!(json.get("email").is_none());
        assert!(json.get("description").is_none());
        assert!(json.get("location").is_none());
        assert!(json.get("name").is_none());
    }

    #[test]
    fn anonymized_collapses_helping() {
        assert_eq!(entry("").anonymized().helping, "");
        assert_eq!(entry(" Alice").anonymized().helping, " staff");
    }

    #[test]
    fn active_entries_skip_removed_fields() {
        let json = serde_json::to_value(entry("")).unwrap();
        assert!(json.get("removed_at").is_none());
        assert!(json.get("removed_by").is_none());
    }
}
