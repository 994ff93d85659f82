/// Install the stderr `tracing` subscriber used by the CLI.
///
/// `RUST_LOG` wins over the configured directive; without either only
/// warnings are shown so stdout stays clean for piping.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.unwrap_or("relay_store=warn,warn").into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
