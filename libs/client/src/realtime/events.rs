//! Realtime wire protocol: room classes, event classes, and frame codecs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

// ---------------------------------------------------------------------------
// Room and event classes
// ---------------------------------------------------------------------------

/// A realtime subscription channel class.
///
/// Closed set: an unknown room type is unrepresentable on this API, rather
/// than a logged runtime no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomType {
    Order,
    Venue,
    Table,
    Organization,
}

impl RoomType {
    /// Outbound join message name for this room class.
    pub fn join_event(self) -> &'static str {
        match self {
            RoomType::Order => "joinOrderRoom",
            RoomType::Venue => "joinVenueRoom",
            RoomType::Table => "joinTableRoom",
            RoomType::Organization => "joinOrganizationRoom",
        }
    }

    /// Composite-key prefix (`order:<id>` etc.).
    pub fn key_prefix(self) -> &'static str {
        match self {
            RoomType::Order => "order",
            RoomType::Venue => "venue",
            RoomType::Table => "table",
            RoomType::Organization => "organization",
        }
    }
}

/// Server-pushed event classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    OrderUpdated,
    OrderItemUpdated,
    NewOrder,
}

impl EventType {
    pub fn name(self) -> &'static str {
        match self {
            EventType::OrderUpdated => "orderUpdated",
            EventType::OrderItemUpdated => "orderItemUpdated",
            EventType::NewOrder => "newOrder",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "orderUpdated" => Some(EventType::OrderUpdated),
            "orderItemUpdated" => Some(EventType::OrderItemUpdated),
            "newOrder" => Some(EventType::NewOrder),
            _ => None,
        }
    }
}

/// Order lifecycle states carried in event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    Served,
    Completed,
    Cancelled,
}

/// Payload carried by every order event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    /// The entity the event is about (an order or an order item).
    pub id: String,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Human-readable summary, suitable for a notification toast.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Frame codec
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode one inbound text frame.
///
/// `Ok(None)` means a well-formed frame with an event name this client does
/// not know; callers log and drop it. A malformed frame is an error.
pub fn decode_server_frame(text: &str) -> Result<Option<(EventType, OrderEvent)>, ClientError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|e| ClientError::Protocol(e.to_string()))?;
    let Some(event) = EventType::from_name(&raw.event) else {
        return Ok(None);
    };
    let payload: OrderEvent =
        serde_json::from_value(raw.data).map_err(|e| ClientError::Protocol(e.to_string()))?;
    Ok(Some((event, payload)))
}
