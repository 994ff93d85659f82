//! Command line interface for a persisted event store. Supports ingesting
//! event files, listing channels and channel messages, looking up events,
//! resetting the snapshot, verifying signatures and composing messages.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use relay_store::{channel_message, config::Settings, logging::init_logging, Event, EventStore};
use serde_json::Value;
use tracing::{info, warn};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "relay-store",
    author,
    version,
    about = "Local Nostr event store with channel views"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Add events from JSON files (single object, array or NDJSON).
    Ingest {
        /// Paths to event files.
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Print curated channels as JSON lines.
    Channels {
        /// Skip channels whose metadata does not decode instead of failing.
        #[arg(long)]
        lossy: bool,
    },
    /// Print the messages of a channel, oldest first.
    Messages {
        /// Id of the channel creation event.
        channel_id: String,
    },
    /// Print a single event.
    Show { id: String },
    /// Drop every stored event.
    Reset,
    /// Verify signatures of stored events.
    Verify {
        /// Check only a random sample of this size.
        #[arg(long)]
        sample: Option<usize>,
    },
    /// Sign a channel message and add it to the store.
    Post {
        channel_id: String,
        text: String,
        /// Hex encoded 32-byte secret key.
        #[arg(long)]
        secret_key: String,
        /// Override the creation timestamp.
        #[arg(long, allow_negative_numbers = true)]
        created_at: Option<i64>,
    },
}

/// Execute the selected CLI subcommand, writing results to `out`.
fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    init_logging(cfg.log_filter.as_deref());
    let mut store = EventStore::load(&cfg.snapshot_path, cfg.channel_filter())
        .with_context(|| format!("loading {}", cfg.snapshot_path.display()))?;
    match cli.command {
        Commands::Ingest { files } => {
            let mut added = 0;
            for f in files {
                let data = fs::read_to_string(&f).with_context(|| format!("reading {f}"))?;
                for ev in parse_events(&data).with_context(|| format!("parsing {f}"))? {
                    if cfg.verify_sig {
                        if let Err(e) = ev.verify() {
                            warn!(id = %ev.id, "skipping event: {e}");
                            continue;
                        }
                    }
                    store.add_event(ev);
                    added += 1;
                }
            }
            store.save(&cfg.snapshot_path)?;
            info!(added, total = store.len(), "ingest finished");
        }
        Commands::Channels { lossy } => {
            let channels = if lossy {
                store.channels_lossy()
            } else {
                store.channels()?
            };
            for channel in channels {
                writeln!(out, "{}", serde_json::to_string(&channel)?)?;
            }
        }
        Commands::Messages { channel_id } => {
            for ev in store.messages_for_channel(&channel_id) {
                writeln!(out, "{}", serde_json::to_string(ev)?)?;
            }
        }
        Commands::Show { id } => {
            let ev = store
                .get_event_by_id(&id)
                .ok_or_else(|| anyhow!("event not found: {id}"))?;
            writeln!(out, "{}", serde_json::to_string(ev)?)?;
        }
        Commands::Reset => {
            store.reset();
            store.save(&cfg.snapshot_path)?;
        }
        Commands::Verify { sample } => {
            let checked = store.verify_sample(sample.unwrap_or(store.len()))?;
            writeln!(out, "verified {checked} events")?;
        }
        Commands::Post {
            channel_id,
            text,
            secret_key,
            created_at,
        } => {
            let secret = hex::decode(secret_key.trim()).context("secret key is not hex")?;
            let created_at = match created_at {
                Some(ts) => ts,
                None => i64::try_from(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())?,
            };
            let ev = channel_message(&secret, &channel_id, &text, created_at)?;
            let line = serde_json::to_string(&ev)?;
            store.add_event(ev);
            store.save(&cfg.snapshot_path)?;
            writeln!(out, "{line}")?;
        }
    }
    Ok(())
}

/// Decode every event in `data`.
///
/// Accepts a single event object, an array of events, or several
/// whitespace-separated values (NDJSON). Records that are not valid events
/// are skipped with a warning; only broken JSON fails the whole input.
fn parse_events(data: &str) -> anyhow::Result<Vec<Event>> {
    let mut events = vec![];
    for value in serde_json::Deserializer::from_str(data).into_iter::<Value>() {
        match value? {
            Value::Array(items) => events.extend(items.into_iter().filter_map(decode_event)),
            other => events.extend(decode_event(other)),
        }
    }
    Ok(events)
}

fn decode_event(value: Value) -> Option<Event> {
    match serde_json::from_value::<Event>(value) {
        Ok(ev) => Some(ev),
        Err(e) => {
            warn!("skipping record: {e}");
            None
        }
    }
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let snapshot = base_dir.join("relay-store-data").join("events.json");
    let mut content = String::new();
    content.push_str(&format!("SNAPSHOT_PATH={}\n", display_path(&snapshot)));
    content.push_str("CURATOR_PUBKEY=\n");
    content.push_str("CHANNELS_SINCE=\n");
    content.push_str("VERIFY_SIG=0\n");
    content.push_str("LOG_FILTER=\n");
    fs::write(env_path, content)?;
    Ok(())
}

fn display_path(path: &PathBuf) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(not(test))]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let stdout = io::stdout();
    run(cli, &mut stdout.lock())
}
