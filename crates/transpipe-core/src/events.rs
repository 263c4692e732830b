//! The Event Bus (component D): room-scoped, best-effort, at-most-once
//! push of arbitrary JSON events addressed to named rooms.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const ROOM_CHANNEL_CAPACITY: usize = 256;

/// One payload published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    TranslationStarted { material_id: String, message: String },
    MaterialUpdated {
        material_id: String,
        status: String,
        processing_step: String,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        translated_path: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        translation_info: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<String>,
    },
    MaterialError { material_id: String, error: String },
    TranslationCompleted { success_count: usize, failed_count: usize, message: String },
    LlmStarted { material_id: String, progress: u8 },
    LlmCompleted { material_id: String, progress: u8, translations: serde_json::Value },
    LlmError { material_id: String, error: String },
}

/// A room name: `client:{client_id}` or `material:{material_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Room(String);

impl Room {
    #[must_use]
    pub fn client(client_id: &str) -> Self {
        Self(format!("client:{client_id}"))
    }

    #[must_use]
    pub fn material(material_id: &str) -> Self {
        Self(format!("material:{material_id}"))
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Room-based pub/sub over `tokio::sync::broadcast` channels.
///
/// Each room gets its own channel, created lazily on first publish or
/// subscribe and never torn down (rooms are cheap; a client/material id
/// space is small relative to process lifetime). Publishing never blocks:
/// `broadcast::Sender::send` returns immediately and a subscriber that
/// falls behind simply lags, "a slow subscriber must not
/// block the publisher."
#[derive(Clone, Default)]
pub struct EventBus {
    rooms: Arc<DashMap<Room, broadcast::Sender<Event>>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, room: Room) -> broadcast::Sender<Event> {
        self.rooms
            .entry(room)
            .or_insert_with(|| broadcast::channel(ROOM_CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Publish an event to a room. Ignored if nobody is subscribed.
    pub fn publish(&self, room: Room, event: Event) {
        let sender = self.sender_for(room.clone());
        if sender.send(event).is_err() {
            tracing::trace!("no subscribers for room {room}");
        }
    }

    /// Subscribe to a room's events.
    #[must_use]
    pub fn subscribe(&self, room: Room) -> broadcast::Receiver<Event> {
        self.sender_for(room).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let room = Room::material("mat-1");
        let mut rx = bus.subscribe(room.clone());

        bus.publish(
            room,
            Event::MaterialError { material_id: "mat-1".to_string(), error: "boom".to_string() },
        );

        let received = rx.recv().await.unwrap();
        matches!(received, Event::MaterialError { .. });
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(
            Room::client("client-1"),
            Event::TranslationCompleted { success_count: 0, failed_count: 0, message: "done".to_string() },
        );
    }

    #[tokio::test]
    async fn client_and_material_rooms_are_independent() {
        let bus = EventBus::new();
        let mut client_rx = bus.subscribe(Room::client("c1"));
        let mut material_rx = bus.subscribe(Room::material("m1"));

        bus.publish(
            Room::material("m1"),
            Event::LlmStarted { material_id: "m1".to_string(), progress: 66 },
        );

        let got = material_rx.recv().await.unwrap();
        matches!(got, Event::LlmStarted { .. });
        assert!(client_rx.try_recv().is_err());
    }
}
