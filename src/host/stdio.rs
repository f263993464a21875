//! Stdin/stdout JSON bridge for the host command channel.
//!
//! Reads newline-delimited JSON `CommandEnvelope` messages from stdin,
//! dispatches them to the module, and writes `ResponseEnvelope` and
//! `EventEnvelope` messages as newline-delimited JSON to stdout.
//!
//! Stdout is exclusively reserved for the JSON protocol; all diagnostic
//! output (tracing, logs) must be routed to stderr.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinSet;

use crate::error::{BridgeError, Result};
use crate::host::channel::{HostCommandClient, ModuleHandler, command_channel_with_events};
use crate::host::contract::{CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope};

/// Request channel capacity for the stdio bridge.
const REQUEST_CAPACITY: usize = 64;

/// How long in-flight `action.run` commands may finish after the reader stops.
const ACTION_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Run the JSON bridge on the process's stdin/stdout until stdin closes or
/// `module.destroy` is received.
pub async fn run_stdio_bridge<H: ModuleHandler>(
    handler: H,
    event_tx: broadcast::Sender<EventEnvelope>,
) -> Result<()> {
    run_bridge(
        handler,
        event_tx,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}

/// Run the JSON bridge over arbitrary line reader / writer halves.
///
/// The reader (this task) dispatches each command and writes its response.
/// An event forwarder writes broadcast events and the server task routes
/// commands to `handler`. `action.run` responses are written by their own
/// task, so they may arrive after later responses.
pub async fn run_bridge<H, R, W>(
    handler: H,
    event_tx: broadcast::Sender<EventEnvelope>,
    reader: R,
    writer: W,
) -> Result<()>
where
    H: ModuleHandler,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (client, server) = command_channel_with_events(REQUEST_CAPACITY, event_tx, handler);
    let writer = Arc::new(Mutex::new(BufWriter::new(writer)));

    let server_handle = tokio::spawn(server.run());

    let event_writer = Arc::clone(&writer);
    let mut event_rx = client.subscribe_events();
    let event_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(event_envelope) => match serde_json::to_string(&event_envelope) {
                    Ok(json) => {
                        let mut w = event_writer.lock().await;
                        if let Err(e) = write_line(&mut *w, &json).await {
                            tracing::warn!(
                                error = %e,
                                "failed to write event envelope; stopping event forwarder"
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize event envelope; skipping");
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event forwarder lagged; some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("event broadcast channel closed; stopping event forwarder");
                    break;
                }
            }
        }
    });

    let reader_result = run_reader(client, reader, Arc::clone(&writer)).await;

    // Let events raised by the final command drain before shutting down.
    tokio::task::yield_now().await;
    event_handle.abort();
    let _ = event_handle.await;
    let _ = server_handle.await;

    reader_result
}

async fn run_reader<R, W>(
    client: HostCommandClient,
    mut reader: R,
    writer: Arc<Mutex<BufWriter<W>>>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut line = String::new();
    let mut actions = JoinSet::new();

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| BridgeError::Channel(format!("failed to read command line: {e}")))?;

        if bytes_read == 0 {
            tracing::info!("stdin closed (EOF); shutting down stdio bridge");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(trimmed) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "failed to parse command envelope");
                let error_response = ResponseEnvelope::error(
                    "parse-error",
                    format!("failed to parse command envelope: {e}"),
                );
                write_json(&writer, &error_response).await?;
                continue;
            }
        };

        while actions.try_join_next().is_some() {}

        if envelope.command == CommandName::ActionRun {
            let client = client.clone();
            let writer = Arc::clone(&writer);
            actions.spawn(async move {
                let response = dispatch(&client, envelope).await;
                if let Err(e) = write_json(&writer, &response).await {
                    tracing::warn!(error = %e, "failed to write action response");
                }
            });
            continue;
        }

        let is_destroy = envelope.command == CommandName::ModuleDestroy;
        let response = dispatch(&client, envelope).await;
        write_json(&writer, &response).await?;

        if is_destroy {
            tracing::info!("module.destroy received; shutting down stdio bridge");
            break;
        }
    }

    drop(client);
    let drained = tokio::time::timeout(ACTION_DRAIN_TIMEOUT, async {
        while actions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            pending = actions.len(),
            "abandoning unfinished action commands"
        );
        actions.shutdown().await;
    }

    Ok(())
}

async fn dispatch(client: &HostCommandClient, envelope: CommandEnvelope) -> ResponseEnvelope {
    let request_id = envelope.request_id.clone();
    match client.send(envelope).await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::error!(error = %e, "host command dispatch failed");
            ResponseEnvelope::error(request_id, format!("dispatch failed: {e}"))
        }
    }
}

async fn write_json<W: AsyncWrite + Unpin>(
    writer: &Mutex<BufWriter<W>>,
    response: &ResponseEnvelope,
) -> Result<()> {
    let json = serde_json::to_string(response)
        .map_err(|e| BridgeError::Protocol(format!("failed to serialize response envelope: {e}")))?;
    let mut w = writer.lock().await;
    write_line(&mut *w, &json).await
}

/// Write a single JSON line and flush.
async fn write_line<W: AsyncWrite + Unpin>(writer: &mut BufWriter<W>, json: &str) -> Result<()> {
    writer
        .write_all(json.as_bytes())
        .await
        .map_err(|e| BridgeError::Channel(format!("failed to write to stdout: {e}")))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| BridgeError::Channel(format!("failed to write newline to stdout: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| BridgeError::Channel(format!("failed to flush stdout: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::contract::EVENT_VERSION;

    #[test]
    fn parse_error_response_is_well_formed() {
        let resp = ResponseEnvelope::error("parse-error", "bad json");
        assert!(!resp.ok);
        assert_eq!(resp.request_id, "parse-error");
        assert_eq!(resp.v, EVENT_VERSION);
        assert!(resp.error.is_some());
    }

    #[test]
    fn command_envelope_without_payload_parses() {
        let parsed: CommandEnvelope =
            serde_json::from_str(r#"{"v":1,"request_id":"r","command":"host.ping"}"#)
                .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(parsed.command, CommandName::HostPing);
        assert!(parsed.payload.is_null());
    }
}
