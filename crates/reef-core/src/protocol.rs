use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::node::Snapshot;
use crate::theme::Theme;

/// Serializable reference to a registered callback, embedded in node props.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackDescriptor {
    pub callback_id: String,
    #[serde(default)]
    pub bound_args: Map<String, Value>,
}

impl CallbackDescriptor {
    pub fn to_value(&self) -> Value {
        json!({
            "callbackId": self.callback_id,
            "boundArgs": self.bound_args,
        })
    }
}

/// Tells the client to write a control's value into server state under
/// `state_key` whenever it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePropDescriptor {
    pub state_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
}

impl SavePropDescriptor {
    pub fn to_value(&self) -> Value {
        let mut value = json!({ "stateKey": self.state_key });
        if let Some(debounce) = self.debounce_ms {
            value["debounceMs"] = Value::from(debounce);
        }
        value
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOperation {
    Replace,
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastVariant {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Messages sent from the server to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Replace the whole tree.
    Refresh { component: Snapshot },
    /// Patch or replace the node addressed by `target_id`.
    #[serde(rename_all = "camelCase")]
    Update {
        target_id: String,
        operation: UpdateOperation,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<Snapshot>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<Map<String, Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Toast {
        message: String,
        variant: ToastVariant,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
    },
    ThemeUpdate { theme: Theme },
    Navigate { path: String },
    Modal {
        open: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<Snapshot>,
    },
    StoreSnapshot { state: Map<String, Value> },
    Pong,
    Error { message: String },
}

impl ServerMessage {
    pub fn update_props(target_id: impl Into<String>, props: Map<String, Value>) -> Self {
        ServerMessage::Update {
            target_id: target_id.into(),
            operation: UpdateOperation::Update,
            component: None,
            props: Some(props),
            content: None,
        }
    }

    pub fn update_text(target_id: impl Into<String>, content: impl Into<String>) -> Self {
        ServerMessage::Update {
            target_id: target_id.into(),
            operation: UpdateOperation::Update,
            component: None,
            props: None,
            content: Some(content.into()),
        }
    }

    pub fn replace(target_id: impl Into<String>, component: Snapshot) -> Self {
        ServerMessage::Update {
            target_id: target_id.into(),
            operation: UpdateOperation::Replace,
            component: Some(component),
            props: None,
            content: None,
        }
    }

    /// Identity addressed by a targeted update, if this is one.
    pub fn target_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Update { target_id, .. } => Some(target_id),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A user interaction fired a registered callback.
    #[serde(rename_all = "camelCase")]
    Callback {
        callback_id: String,
        #[serde(default)]
        bound_args: Map<String, Value>,
        #[serde(default)]
        data: Map<String, Value>,
    },
    /// A control bound with a save-prop descriptor changed.
    StateSync { key: String, value: Value },
    Navigate { path: String },
    /// The client asks for the current server-side state.
    StoreInit,
    Custom {
        name: String,
        #[serde(default)]
        data: Map<String, Value>,
    },
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Coerces caller-supplied bound arguments into a map. Objects are used as-is,
/// `null` is empty, and any other value is stored under `"value"`.
pub fn into_args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".into(), other);
            map
        }
    }
}
