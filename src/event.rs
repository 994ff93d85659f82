//! Nostr event model.

use secp256k1::{schnorr::Signature, Keypair, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};

/// Kind of a NIP-28 channel creation event.
pub const KIND_CHANNEL_CREATION: u32 = 40;
/// Kind of a NIP-28 channel message.
pub const KIND_CHANNEL_MESSAGE: u32 = 42;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. Channel messages reference their channel with
/// an `e` tag, e.g. `["e", "<channel event id>"]`.
///
/// Each tag is stored verbatim so relay hints and markers such as
/// `["e", "<id>", "wss://relay", "root"]` survive a round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from string slices.
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        Tag(fields.iter().map(|f| f.as_ref().to_string()).collect())
    }

    /// Element-wise equality against `fields`, including length.
    pub fn matches<S: AsRef<str>>(&self, fields: &[S]) -> bool {
        self.0.len() == fields.len()
            && self
                .0
                .iter()
                .zip(fields)
                .all(|(have, want)| have == want.as_ref())
    }
}

/// Decoded Nostr event as received from a relay.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "72e4...",
///   "kind": 42,
///   "created_at": 1700000000,
///   "tags": [["e", "<channel id>"]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `40` or `42`.
    pub kind: u32,
    /// Unix timestamp of creation, as claimed by the author.
    pub created_at: i64,
    /// Tags referencing other events, authors and so on.
    pub tags: Vec<Tag>,
    /// Event content body.
    pub content: String,
    /// Schnorr signature over the event hash.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// True if any tag equals `fields` exactly.
    ///
    /// `["e", id]` does not match a longer tag such as `["e", id, "wss://relay"]`.
    pub fn is_tagged<S: AsRef<str>>(&self, fields: &[S]) -> bool {
        self.tags.iter().any(|tag| tag.matches(fields))
    }

    /// Recompute the NIP-01 event hash from its fields.
    pub fn compute_hash(&self) -> Result<[u8; 32]> {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let data = serde_json::to_vec(&arr)?;
        Ok(Sha256::digest(&data).into())
    }

    /// Verify the event ID and Schnorr signature.
    pub fn verify(&self) -> Result<()> {
        let hash = self.compute_hash()?;
        if hex::encode(hash) != self.id {
            return Err(StoreError::Signature("id mismatch".into()));
        }
        let sig = Signature::from_slice(&hex::decode(&self.sig)?)?;
        let pk = XOnlyPublicKey::from_slice(&hex::decode(&self.pubkey)?)?;
        let secp = Secp256k1::verification_only();
        let msg = Message::from_digest_slice(&hash)?;
        secp.verify_schnorr(&sig, &msg, &pk)?;
        Ok(())
    }

    /// Build and sign an event with a 32-byte secret key.
    pub fn signed(
        secret_key: &[u8],
        kind: u32,
        created_at: i64,
        tags: Vec<Tag>,
        content: impl Into<String>,
    ) -> Result<Self> {
        let secp = Secp256k1::new();
        let kp = Keypair::from_seckey_slice(&secp, secret_key)?;
        let (pubkey, _) = kp.x_only_public_key();
        let mut ev = Event {
            id: String::new(),
            pubkey: hex::encode(pubkey.serialize()),
            kind,
            created_at,
            tags,
            content: content.into(),
            sig: String::new(),
        };
        let hash = ev.compute_hash()?;
        ev.id = hex::encode(hash);
        let msg = Message::from_digest_slice(&hash)?;
        let sig = secp.sign_schnorr_no_aux_rand(&msg, &kp);
        ev.sig = hex::encode(sig.as_ref());
        Ok(ev)
    }
}

/// Sign a kind 42 message addressed to `channel_id`.
///
/// Publishing is left to the relay layer; the result can also be fed straight
/// into [`EventStore::add_event`](crate::store::EventStore::add_event).
pub fn channel_message(
    secret_key: &[u8],
    channel_id: &str,
    text: &str,
    created_at: i64,
) -> Result<Event> {
    Event::signed(
        secret_key,
        KIND_CHANNEL_MESSAGE,
        created_at,
        vec![Tag::new(&["e", channel_id])],
        text,
    )
}
