//! In-memory event store and the channel/message views derived from it.

use std::{
    fs,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use rand::{seq::SliceRandom, thread_rng};
use serde::{Deserialize, Serialize};
use serde_json::{to_writer, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    content::{ChannelMetadata, Content},
    error::{Result, StoreError},
    event::{Event, KIND_CHANNEL_CREATION},
};

/// Public key whose kind 40 events are listed as channels.
pub const DEFAULT_CURATOR: &str =
    "72e40635ef243ce4937b0083593af773d35487b3b5147f47d4d62576e97cd2f9";
/// Channel creation events older than this are ignored.
pub const DEFAULT_CHANNELS_SINCE: i64 = 1660780018;

const CHANGE_BUFFER: usize = 256;

/// Which kind 40 events count as channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    /// The single trusted curator public key (hex).
    pub curator: String,
    /// Minimum `created_at` of a channel creation event.
    pub since: i64,
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            curator: DEFAULT_CURATOR.to_string(),
            since: DEFAULT_CHANNELS_SINCE,
        }
    }
}

impl ChannelFilter {
    fn accepts(&self, ev: &Event) -> bool {
        ev.pubkey == self.curator
            && ev.created_at >= self.since
            && ev.kind == KIND_CHANNEL_CREATION
    }
}

/// A channel creation event merged with the metadata from its content.
///
/// Metadata keys absent from the content are left out when serialized.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Channel {
    #[serde(flatten)]
    pub event: Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<Value>,
}

impl Channel {
    fn new(event: &Event, meta: &ChannelMetadata) -> Self {
        Self {
            event: event.clone(),
            name: meta.name.clone(),
            about: meta.about.clone(),
            picture: meta.picture.clone(),
        }
    }
}

/// Notification published after every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    EventAdded { id: String, kind: u32 },
    Reset,
}

/// Serializable copy of the store contents, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub events: Vec<Event>,
}

#[derive(Debug)]
struct Stored {
    event: Event,
    content: Content,
}

/// Session-scoped map of received events keyed by id.
///
/// Views are recomputed from the map on every call, so a read issued after
/// [`add_event`](Self::add_event) returns always sees the new event.
#[derive(Debug)]
pub struct EventStore {
    filter: ChannelFilter,
    events: IndexMap<String, Stored>,
    changes: broadcast::Sender<StoreChange>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new(ChannelFilter::default())
    }
}

impl EventStore {
    /// Create an empty store using `filter` for the channel view.
    pub fn new(filter: ChannelFilter) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            filter,
            events: IndexMap::new(),
            changes,
        }
    }

    /// Rebuild a store by replaying the snapshot's events in order.
    pub fn restore(filter: ChannelFilter, snapshot: Snapshot) -> Self {
        let mut store = Self::new(filter);
        for ev in snapshot.events {
            store.add_event(ev);
        }
        store
    }

    /// Load a snapshot file, or start empty if it does not exist yet.
    pub fn load(path: impl AsRef<Path>, filter: ChannelFilter) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::new(filter));
        }
        let data = fs::read_to_string(path)?;
        let snapshot: Snapshot = serde_json::from_str(&data)?;
        info!(path = %path.display(), events = snapshot.events.len(), "snapshot loaded");
        Ok(Self::restore(filter, snapshot))
    }

    /// Write the snapshot atomically to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let parent_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent_dir)?;
        let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
        to_writer(&tmp, &self.snapshot())?;
        tmp.persist(path)?;
        info!(path = %path.display(), events = self.len(), "snapshot saved");
        Ok(())
    }

    /// Copy the current contents out as a snapshot.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            events: self.events().cloned().collect(),
        }
    }

    /// Subscribe to mutation notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Filter used by [`channels`](Self::channels).
    pub fn channel_filter(&self) -> &ChannelFilter {
        &self.filter
    }

    /// Insert or overwrite the event stored under `event.id`.
    ///
    /// Overwriting keeps the original insertion position.
    pub fn add_event(&mut self, event: Event) {
        let content = Content::decode(&event);
        if let Content::MalformedChannel { error } = &content {
            debug!(id = %event.id, %error, "channel content does not decode");
        }
        let change = StoreChange::EventAdded {
            id: event.id.clone(),
            kind: event.kind,
        };
        debug!(id = %event.id, kind = event.kind, "event added");
        self.events.insert(event.id.clone(), Stored { event, content });
        // No receivers is not an error.
        let _ = self.changes.send(change);
    }

    /// Look up an event by id.
    pub fn get_event_by_id(&self, id: &str) -> Option<&Event> {
        self.events.get(id).map(|s| &s.event)
    }

    /// Drop every event.
    pub fn reset(&mut self) {
        info!(events = self.events.len(), "store reset");
        self.events.clear();
        let _ = self.changes.send(StoreChange::Reset);
    }

    /// All events in insertion order.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values().map(|s| &s.event)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Curated channels in insertion order.
    ///
    /// Fails on the first curated channel whose content is not JSON or is
    /// `null`; use [`channels_lossy`](Self::channels_lossy) to skip those.
    pub fn channels(&self) -> Result<Vec<Channel>> {
        self.curated().map(project_channel).collect()
    }

    /// Curated channels, skipping entries whose content does not decode.
    pub fn channels_lossy(&self) -> Vec<Channel> {
        self.curated()
            .filter_map(|stored| match project_channel(stored) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!("skipping channel: {e}");
                    None
                }
            })
            .collect()
    }

    /// Kind 42 events carrying the tag `["e", channel_id]`, oldest first.
    ///
    /// Events with equal `created_at` keep their insertion order.
    pub fn messages_for_channel(&self, channel_id: &str) -> Vec<&Event> {
        let mut messages: Vec<&Event> = self
            .events
            .values()
            .filter(|s| matches!(s.content, Content::Text))
            .map(|s| &s.event)
            .filter(|ev| ev.is_tagged(&["e", channel_id]))
            .collect();
        messages.sort_by_key(|ev| ev.created_at);
        messages
    }

    /// Verify signatures for a random sample of stored events.
    ///
    /// Returns how many events were checked.
    pub fn verify_sample(&self, sample: usize) -> Result<usize> {
        let mut events: Vec<&Event> = self.events().collect();
        events.shuffle(&mut thread_rng());
        let take = sample.min(events.len());
        for ev in events.iter().take(take) {
            ev.verify()?;
        }
        Ok(take)
    }

    fn curated(&self) -> impl Iterator<Item = &Stored> {
        self.events
            .values()
            .filter(move |s| self.filter.accepts(&s.event))
    }
}

fn project_channel(stored: &Stored) -> Result<Channel> {
    match &stored.content {
        Content::Channel(meta) => Ok(Channel::new(&stored.event, meta)),
        Content::MalformedChannel { error } => Err(StoreError::MalformedChannel {
            id: stored.event.id.clone(),
            reason: error.clone(),
        }),
        Content::Text | Content::Other => Err(StoreError::MalformedChannel {
            id: stored.event.id.clone(),
            reason: format!("kind {} is not a channel", stored.event.kind),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{channel_message, Tag, KIND_CHANNEL_MESSAGE};
    use serde_json::json;
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    const CURATOR: &str = "c0ffee";
    const SINCE: i64 = 1000;

    fn filter() -> ChannelFilter {
        ChannelFilter {
            curator: CURATOR.into(),
            since: SINCE,
        }
    }

    fn sample_event(
        id: &str,
        pubkey: &str,
        kind: u32,
        created: i64,
        tags: Vec<Tag>,
        content: &str,
    ) -> Event {
        Event {
            id: id.into(),
            pubkey: pubkey.into(),
            kind,
            created_at: created,
            tags,
            content: content.into(),
            sig: String::new(),
        }
    }

    fn channel(id: &str, pubkey: &str, created: i64, content: &str) -> Event {
        sample_event(id, pubkey, KIND_CHANNEL_CREATION, created, vec![], content)
    }

    fn message(id: &str, channel_id: &str, created: i64) -> Event {
        sample_event(
            id,
            "author",
            KIND_CHANNEL_MESSAGE,
            created,
            vec![Tag::new(&["e", channel_id])],
            "hi",
        )
    }

    fn ids(events: &[&Event]) -> Vec<String> {
        events.iter().map(|e| e.id.clone()).collect()
    }

    #[test]
    fn read_after_write() {
        let mut store = EventStore::new(filter());
        let ev = message("m1", "chan1", 5);
        store.add_event(ev.clone());
        assert_eq!(store.get_event_by_id("m1"), Some(&ev));
        assert_eq!(store.len(), 1);
        assert!(store.get_event_by_id("missing").is_none());
    }

    #[test]
    fn overwrite_keeps_position() {
        let mut store = EventStore::new(filter());
        store.add_event(message("a", "chan1", 1));
        store.add_event(message("b", "chan1", 1));
        let mut replaced = message("a", "chan1", 1);
        replaced.content = "edited".into();
        store.add_event(replaced);

        let order: Vec<&str> = store.events().map(|e| e.id.as_str()).collect();
        assert_eq!(order, ["a", "b"]);
        assert_eq!(store.get_event_by_id("a").unwrap().content, "edited");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("c1", CURATOR, SINCE, r#"{"name":"Foo"}"#));
        store.add_event(message("m1", "c1", 5));
        store.reset();
        assert!(store.is_empty());
        assert!(store.get_event_by_id("c1").is_none());
        assert!(store.get_event_by_id("m1").is_none());
        assert!(store.channels().unwrap().is_empty());
        assert!(store.messages_for_channel("c1").is_empty());
    }

    #[test]
    fn channels_apply_curator_cutoff_and_kind() {
        let mut store = EventStore::new(filter());
        store.add_event(channel(
            "a",
            CURATOR,
            SINCE,
            r#"{"name":"Foo","about":"Bar","picture":"p"}"#,
        ));
        store.add_event(channel("b", CURATOR, SINCE - 1, r#"{"name":"Old"}"#));
        store.add_event(channel("c", "someone-else", SINCE + 5, r#"{"name":"Rogue"}"#));
        store.add_event(sample_event(
            "d",
            CURATOR,
            41,
            SINCE + 5,
            vec![],
            r#"{"name":"Meta"}"#,
        ));

        let channels = store.channels().unwrap();
        assert_eq!(channels.len(), 1);
        let foo = &channels[0];
        assert_eq!(foo.event.id, "a");
        assert_eq!(foo.name, Some(json!("Foo")));
        assert_eq!(foo.about, Some(json!("Bar")));
        assert_eq!(foo.picture, Some(json!("p")));
        assert_eq!(foo.event.pubkey, CURATOR);
    }

    #[test]
    fn default_filter_uses_shipped_constants() {
        let mut store = EventStore::default();
        assert_eq!(store.channel_filter().curator, DEFAULT_CURATOR);
        let since = DEFAULT_CHANNELS_SINCE;
        store.add_event(channel("a", DEFAULT_CURATOR, since, r#"{"name":"x"}"#));
        store.add_event(channel("b", DEFAULT_CURATOR, since - 1, r#"{"name":"y"}"#));
        let channels = store.channels().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].event.id, "a");
    }

    #[test]
    fn malformed_channel_fails_view() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("good", CURATOR, SINCE, r#"{"name":"Foo"}"#));
        store.add_event(channel("bad", CURATOR, SINCE, "not json"));
        match store.channels() {
            Err(StoreError::MalformedChannel { id, .. }) => assert_eq!(id, "bad"),
            other => panic!("expected malformed channel error, got {other:?}"),
        }

        let lossy = store.channels_lossy();
        assert_eq!(lossy.len(), 1);
        assert_eq!(lossy[0].event.id, "good");
    }

    #[test]
    fn channels_accept_any_json_content() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("num", CURATOR, SINCE, r#"{"name":5,"about":null}"#));
        store.add_event(channel("scalar", CURATOR, SINCE, "42"));
        store.add_event(channel("list", CURATOR, SINCE, "[]"));

        let channels = store.channels().unwrap();
        assert_eq!(channels.len(), 3);
        assert_eq!(channels[0].name, Some(json!(5)));
        assert_eq!(channels[0].about, Some(Value::Null));
        assert!(channels[0].picture.is_none());
        assert!(channels[1].name.is_none());
        assert!(channels[2].name.is_none());
    }

    #[test]
    fn null_channel_content_is_malformed() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("null", CURATOR, SINCE, "null"));
        assert!(matches!(
            store.channels(),
            Err(StoreError::MalformedChannel { .. })
        ));
        assert!(store.channels_lossy().is_empty());
    }

    #[test]
    fn channel_json_omits_missing_metadata() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("a", CURATOR, SINCE, r#"{"name":"Foo","about":null}"#));
        let row = serde_json::to_value(&store.channels().unwrap()[0]).unwrap();
        let obj = row.as_object().unwrap();
        assert_eq!(obj["id"], "a");
        assert_eq!(obj["name"], "Foo");
        assert!(obj.contains_key("about"));
        assert!(obj["about"].is_null());
        assert!(!obj.contains_key("picture"));
    }

    #[test]
    fn channels_before_epoch_follow_cutoff() {
        let mut store = EventStore::new(ChannelFilter {
            curator: CURATOR.into(),
            since: -10,
        });
        store.add_event(channel("old", CURATOR, -11, r#"{"name":"x"}"#));
        store.add_event(channel("new", CURATOR, -10, r#"{"name":"y"}"#));
        let channels = store.channels().unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].event.id, "new");
    }

    #[test]
    fn malformed_channel_outside_filter_is_ignored() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("bad", "someone-else", SINCE, "not json"));
        assert!(store.channels().unwrap().is_empty());
    }

    #[test]
    fn messages_filtered_by_channel() {
        let mut store = EventStore::new(filter());
        store.add_event(message("m1", "chan1", 1));
        store.add_event(message("m2", "chan2", 2));
        store.add_event(sample_event(
            "m3",
            "author",
            1,
            3,
            vec![Tag::new(&["e", "chan1"])],
            "not a channel message",
        ));
        assert_eq!(ids(&store.messages_for_channel("chan1")), ["m1"]);
        assert_eq!(ids(&store.messages_for_channel("chan2")), ["m2"]);
        assert!(store.messages_for_channel("chan3").is_empty());
    }

    #[test]
    fn messages_require_exact_tag() {
        let mut store = EventStore::new(filter());
        store.add_event(sample_event(
            "long",
            "author",
            KIND_CHANNEL_MESSAGE,
            1,
            vec![Tag::new(&["e", "chan1", "wss://relay", "root"])],
            "",
        ));
        store.add_event(sample_event(
            "swapped",
            "author",
            KIND_CHANNEL_MESSAGE,
            2,
            vec![Tag::new(&["chan1", "e"])],
            "",
        ));
        store.add_event(sample_event(
            "second_tag",
            "author",
            KIND_CHANNEL_MESSAGE,
            3,
            vec![Tag::new(&["p", "pk"]), Tag::new(&["e", "chan1"])],
            "",
        ));
        assert_eq!(ids(&store.messages_for_channel("chan1")), ["second_tag"]);
    }

    #[test]
    fn messages_sorted_oldest_first_and_stable() {
        let mut store = EventStore::new(filter());
        store.add_event(message("m30", "chan1", 30));
        store.add_event(message("m10", "chan1", 10));
        store.add_event(message("m20", "chan1", 20));
        store.add_event(message("m20b", "chan1", 20));
        store.add_event(message("neg", "chan1", -5));
        assert_eq!(
            ids(&store.messages_for_channel("chan1")),
            ["neg", "m10", "m20", "m20b", "m30"]
        );
    }

    #[test]
    fn views_are_idempotent() {
        let mut store = EventStore::new(filter());
        store.add_event(channel("c1", CURATOR, SINCE, r#"{"name":"Foo"}"#));
        store.add_event(message("m2", "c1", 2));
        store.add_event(message("m1", "c1", 1));
        assert_eq!(store.channels().unwrap(), store.channels().unwrap());
        assert_eq!(
            store.messages_for_channel("c1"),
            store.messages_for_channel("c1")
        );
    }

    #[test]
    fn subscribers_see_changes() {
        let mut store = EventStore::new(filter());
        let mut rx = store.subscribe();
        store.add_event(message("m1", "chan1", 1));
        store.reset();
        assert_eq!(
            rx.try_recv().unwrap(),
            StoreChange::EventAdded {
                id: "m1".into(),
                kind: KIND_CHANNEL_MESSAGE
            }
        );
        assert_eq!(rx.try_recv().unwrap(), StoreChange::Reset);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn mutation_without_subscribers_succeeds() {
        let mut store = EventStore::new(filter());
        store.add_event(message("m1", "chan1", 1));
        store.reset();
        assert!(store.is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/snapshot.json");
        let mut store = EventStore::new(filter());
        store.add_event(channel("c1", CURATOR, SINCE, r#"{"name":"Foo"}"#));
        store.add_event(message("m2", "c1", 2));
        store.add_event(message("m1", "c1", 1));
        store.save(&path).unwrap();

        let loaded = EventStore::load(&path, filter()).unwrap();
        assert_eq!(loaded.snapshot(), store.snapshot());
        assert_eq!(loaded.channels().unwrap(), store.channels().unwrap());
        assert_eq!(ids(&loaded.messages_for_channel("c1")), ["m1", "m2"]);
    }

    #[test]
    fn load_missing_snapshot_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = EventStore::load(dir.path().join("none.json"), filter()).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn load_rejects_corrupt_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        fs::write(&path, "{").unwrap();
        assert!(matches!(
            EventStore::load(&path, filter()),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn verify_sample_checks_events() {
        let mut store = EventStore::new(filter());
        let good = channel_message(&[1u8; 32], "chan1", "gm", 1).unwrap();
        let other = channel_message(&[2u8; 32], "chan1", "gn", 2).unwrap();
        store.add_event(good.clone());
        store.add_event(other);
        assert_eq!(store.verify_sample(10).unwrap(), 2);
        assert_eq!(store.verify_sample(0).unwrap(), 0);

        let mut bad = good;
        bad.sig = "00".repeat(64);
        store.add_event(bad);
        assert!(store.verify_sample(10).is_err());
    }
}
