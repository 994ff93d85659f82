//! Error type shared by the store, the event model and snapshot persistence.

use thiserror::Error;

/// Errors surfaced by the library.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A curated kind 40 event whose content is not a channel metadata object.
    #[error("malformed channel content in event {id}: {reason}")]
    MalformedChannel { id: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event id or Schnorr signature did not check out.
    #[error("signature error: {0}")]
    Signature(String),
}

impl From<secp256k1::Error> for StoreError {
    fn from(err: secp256k1::Error) -> Self {
        StoreError::Signature(err.to_string())
    }
}

impl From<hex::FromHexError> for StoreError {
    fn from(err: hex::FromHexError) -> Self {
        StoreError::Signature(err.to_string())
    }
}

impl From<tempfile::PersistError> for StoreError {
    fn from(err: tempfile::PersistError) -> Self {
        StoreError::Io(err.error)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
