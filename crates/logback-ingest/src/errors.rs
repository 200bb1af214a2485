// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::time::Duration;

/// Invalid or missing configuration values.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Terminal conditions of a single connection's event stream.
///
/// Every variant ends the session; the reader never tries to resynchronize.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed serialized content: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),

    #[error("unrecognized object: expected a map, found {0}")]
    Unrecognized(&'static str),

    #[error("serialized object exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error("stream closed with {0} bytes of an incomplete object buffered")]
    Truncated(usize),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A single decoded object that cannot be turned into an event.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("invalid field: {0}")]
    InvalidField(#[from] serde_json::Error),
}

/// The output queue no longer accepts events.
#[derive(Debug, thiserror::Error)]
#[error("output queue closed")]
pub struct QueueError;

/// Failures that stop ingestion entirely.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener on {addr} failed: {source}")]
    Accept {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}
