//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

use crate::store::{ChannelFilter, DEFAULT_CHANNELS_SINCE, DEFAULT_CURATOR};

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// JSON snapshot holding the persisted events.
    pub snapshot_path: PathBuf,
    /// Public key whose kind 40 events are listed as channels.
    pub curator_pubkey: String,
    /// Minimum `created_at` for channel creation events.
    pub channels_since: i64,
    /// Verify Schnorr signatures when ingesting files.
    pub verify_sig: bool,
    /// Optional `tracing` filter directive, e.g. `relay_store=debug`.
    pub log_filter: Option<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let snapshot_path =
            PathBuf::from(env::var("SNAPSHOT_PATH").context("SNAPSHOT_PATH is not set")?);
        let curator_pubkey = env::var("CURATOR_PUBKEY")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_CURATOR.to_string());
        let channels_since = env::var("CHANNELS_SINCE")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_CHANNELS_SINCE);
        let verify_sig = env::var("VERIFY_SIG").unwrap_or_else(|_| "0".into()) == "1";
        let log_filter = env::var("LOG_FILTER").ok().filter(|s| !s.is_empty());
        Ok(Self {
            snapshot_path,
            curator_pubkey,
            channels_since,
            verify_sig,
            log_filter,
        })
    }

    /// Channel filter built from the curator and cutoff settings.
    pub fn channel_filter(&self) -> ChannelFilter {
        ChannelFilter {
            curator: self.curator_pubkey.clone(),
            since: self.channels_since,
        }
    }
}
