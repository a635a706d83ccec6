use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    CallbackInvocation,
    StateSync,
    ComponentUpdate,
    Navigate,
    Notification,
    Broadcast,
    StoreInit,
    StoreUpdate,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    Client,
    Server,
}

/// Record of one interaction flowing through a session, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    pub session_id: String,
    pub event_id: Uuid,
}

impl Event {
    pub fn new(
        kind: EventKind,
        source: EventSource,
        session_id: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            source,
            session_id: session_id.into(),
            event_id: Uuid::new_v4(),
        }
    }

    pub fn from_client(message: &ClientMessage, session_id: &str) -> Self {
        let mut data = Map::new();
        let kind = match message {
            ClientMessage::Callback { callback_id, .. } => {
                data.insert("callbackId".into(), Value::from(callback_id.as_str()));
                EventKind::CallbackInvocation
            }
            ClientMessage::StateSync { key, .. } => {
                data.insert("key".into(), Value::from(key.as_str()));
                EventKind::StateSync
            }
            ClientMessage::Navigate { path } => {
                data.insert("path".into(), Value::from(path.as_str()));
                EventKind::Navigate
            }
            ClientMessage::StoreInit => EventKind::StoreInit,
            ClientMessage::Custom { name, .. } => {
                data.insert("name".into(), Value::from(name.as_str()));
                EventKind::Custom
            }
            ClientMessage::Ping => {
                data.insert("name".into(), Value::from("ping"));
                EventKind::Custom
            }
        };
        Event::new(kind, EventSource::Client, session_id, data)
    }

    pub fn from_server(message: &ServerMessage, session_id: &str) -> Self {
        let mut data = Map::new();
        if let Some(target) = message.target_id() {
            data.insert("targetId".into(), Value::from(target));
        }
        Event::new(
            EventKind::for_server(message),
            EventSource::Server,
            session_id,
            data,
        )
    }
}

impl EventKind {
    pub fn for_server(message: &ServerMessage) -> Self {
        match message {
            ServerMessage::Refresh { .. } | ServerMessage::Update { .. } => {
                EventKind::ComponentUpdate
            }
            ServerMessage::Toast { .. }
            | ServerMessage::Modal { .. }
            | ServerMessage::Error { .. }
            | ServerMessage::Pong => EventKind::Notification,
            ServerMessage::ThemeUpdate { .. } => EventKind::Broadcast,
            ServerMessage::Navigate { .. } => EventKind::Navigate,
            ServerMessage::StoreSnapshot { .. } => EventKind::StoreInit,
        }
    }
}
