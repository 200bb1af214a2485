// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use logback_ingest::{
    config::{Config, LOG_LEVEL_VAR},
    event::Event,
    supervisor::Ingester,
};

// Time detached sessions get to finish and the writer gets to drain after ingestion stops.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
pub async fn main() {
    let log_level = std::env::var(LOG_LEVEL_VAR)
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    let subscriber = match EnvFilter::try_new(&log_level) {
        Ok(filter) => tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_level(true)
            .with_thread_names(false)
            .with_thread_ids(false)
            .with_line_number(false)
            .with_file(false)
            .with_target(true)
            .with_writer(io::stderr)
            .finish(),
        Err(e) => {
            eprintln!("could not parse log level in configuration: {e}");
            return;
        }
    };

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return;
    }

    debug!("Logging subsystem enabled");

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on logback ingester startup: {e}");
            return;
        }
    };

    let (event_tx, event_rx) = mpsc::unbounded_channel::<Event>();
    let writer = tokio::spawn(write_events(event_rx, tokio::io::stdout()));

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Unable to listen for shutdown signal: {e}");
            return;
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let ingester = Ingester::new(config, Arc::new(event_tx), cancel_token);
    if let Err(e) = ingester.run().await {
        error!("Logback ingestion stopped: {e}");
    }

    if !finish_writer(writer, SHUTDOWN_GRACE).await {
        warn!(
            grace = ?SHUTDOWN_GRACE,
            "Sessions still open after shutdown grace period, dropping remaining events"
        );
    }
}

/// Waits for the writer to drain the queue. The queue closes once every session holding it
/// has ended. Returns `false` if the writer had to be aborted after `grace`.
async fn finish_writer(mut writer: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, &mut writer).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Event writer failed: {e}");
            true
        }
        Err(_) => {
            writer.abort();
            false
        }
    }
}

/// Writes every event as one JSON line.
async fn write_events<W>(mut rx: mpsc::UnboundedReceiver<Event>, mut out: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(event) = rx.recv().await {
        let mut line = match serde_json::to_vec(&event) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize event: {e}");
                continue;
            }
        };
        line.push(b'\n');
        let written = match out.write_all(&line).await {
            Ok(()) => out.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            error!("Failed to write event: {e}");
        }
    }
}
