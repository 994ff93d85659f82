//! Typed event payloads, decoded once when an event enters the store.

use serde::Serialize;
use serde_json::Value;

use crate::event::{Event, KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE};

/// Channel metadata carried as JSON in the content of a kind 40 event.
///
/// Fields are taken verbatim from the JSON value: a missing key is `None`,
/// anything else (string, number, `null`, ...) is kept as is.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ChannelMetadata {
    pub name: Option<Value>,
    pub about: Option<Value>,
    pub picture: Option<Value>,
}

impl ChannelMetadata {
    /// Pick `name`, `about` and `picture` out of any JSON value.
    ///
    /// Non-object values carry none of the keys.
    pub fn from_value(value: &Value) -> Self {
        Self {
            name: value.get("name").cloned(),
            about: value.get("about").cloned(),
            picture: value.get("picture").cloned(),
        }
    }
}

/// Decoded payload of a stored event, keyed by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Kind 40 whose content is valid JSON.
    Channel(ChannelMetadata),
    /// Kind 40 whose content is not JSON, or is `null`.
    MalformedChannel { error: String },
    /// Kind 42; the content is message text and is kept as is.
    Text,
    /// Any other kind.
    Other,
}

impl Content {
    /// Decode the payload of `ev` according to its kind.
    pub fn decode(ev: &Event) -> Self {
        match ev.kind {
            KIND_CHANNEL_CREATION => match serde_json::from_str::<Value>(&ev.content) {
                Ok(Value::Null) => Content::MalformedChannel {
                    error: "channel content is null".into(),
                },
                Ok(value) => Content::Channel(ChannelMetadata::from_value(&value)),
                Err(e) => Content::MalformedChannel {
                    error: e.to_string(),
                },
            },
            KIND_CHANNEL_MESSAGE => Content::Text,
            _ => Content::Other,
        }
    }
}
