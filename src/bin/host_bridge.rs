//! Headless host binary for stdin/stdout JSON communication.
//!
//! Reads `CommandEnvelope` messages as newline-delimited JSON from stdin,
//! drives a [`TitlerModule`], and writes `ResponseEnvelope` and
//! `EventEnvelope` messages to stdout.
//!
//! All tracing/diagnostic output goes to stderr so that stdout remains a
//! clean JSON protocol channel.

use std::path::PathBuf;
use std::sync::Arc;

use titler_bridge::host::BroadcastSink;
use titler_bridge::host::stdio::run_stdio_bridge;
use titler_bridge::{BridgeSettings, ConsoleSink, TitlerModule};

/// Environment variable overriding the settings file location.
const CONFIG_ENV: &str = "TITLER_BRIDGE_CONFIG";

/// Capacity of the event broadcast shared by the sink and the stdio writer.
const EVENT_CAPACITY: usize = 256;

fn load_settings() -> anyhow::Result<BridgeSettings> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        let path = PathBuf::from(path);
        return BridgeSettings::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()));
    }

    let path = BridgeSettings::default_config_path();
    if path.exists() {
        BridgeSettings::from_file(&path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))
    } else {
        Ok(BridgeSettings::default())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise tracing to stderr only (stdout is reserved for the JSON
    // protocol).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings = load_settings()?;
    tracing::info!(client_id = %settings.client_id, "titler-host starting");

    let (event_tx, _event_rx) = tokio::sync::broadcast::channel(EVENT_CAPACITY);
    let sink: Arc<dyn ConsoleSink> = Arc::new(BroadcastSink::new(event_tx.clone()));
    let module = TitlerModule::new(&settings, sink);

    let result = run_stdio_bridge(module.clone(), event_tx).await;
    module.destroy();

    result.map_err(|e| {
        tracing::error!(error = %e, "titler-host exited with error");
        anyhow::anyhow!("titler-host failed: {e}")
    })?;

    tracing::info!("titler-host shut down cleanly");
    Ok(())
}
