//! Room subscription keys and their join/leave frames.

use std::fmt;

use serde_json::json;

use super::events::RoomType;

/// Identity of one room subscription: `roomType:targetId`.
///
/// At most one join frame is ever sent per key while a connection lives;
/// the router's room set is keyed by this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomKey {
    pub room_type: RoomType,
    pub target_id: String,
}

impl RoomKey {
    pub fn new(room_type: RoomType, target_id: impl Into<String>) -> Self {
        Self {
            room_type,
            target_id: target_id.into(),
        }
    }

    /// Composite form used as the dedup key and in leave frames.
    pub fn composite(&self) -> String {
        format!("{}:{}", self.room_type.key_prefix(), self.target_id)
    }

    /// Outbound join frame. Joins carry the bare target id; the room class
    /// is encoded in the event name.
    pub fn join_frame(&self) -> serde_json::Value {
        json!({
            "event": self.room_type.join_event(),
            "data": { "id": self.target_id },
        })
    }

    /// Outbound leave frame. Leaves carry the composite key.
    pub fn leave_frame(&self) -> serde_json::Value {
        json!({
            "event": "leaveRoom",
            "data": { "room": self.composite() },
        })
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.room_type.key_prefix(), self.target_id)
    }
}
