//! Local store for Nostr events received from relays.
//!
//! Events are kept in an insertion-ordered map keyed by id. The curated
//! channel list (NIP-28 kind 40) and per-channel message streams (kind 42)
//! are derived from that map on every read.

pub mod config;
pub mod content;
pub mod error;
pub mod event;
pub mod logging;
pub mod store;

pub use content::{ChannelMetadata, Content};
pub use error::StoreError;
pub use event::{channel_message, Event, Tag, KIND_CHANNEL_CREATION, KIND_CHANNEL_MESSAGE};
pub use store::{Channel, ChannelFilter, EventStore, Snapshot, StoreChange};
