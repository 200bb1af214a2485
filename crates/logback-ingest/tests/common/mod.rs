// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helpers shared by the integration tests

#![allow(dead_code)]

use logback_ingest::connection::SessionContext;
use logback_ingest::decoder::LoggingEventCodec;
use logback_ingest::decorator::FieldDecorator;
use logback_ingest::event::Event;
use logback_ingest::mapper::EventMapper;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;

pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Session context pushing into an unbounded channel
pub fn session_context(
    idle_timeout: Option<Duration>,
) -> (Arc<SessionContext>, UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let context = SessionContext {
        queue: Arc::new(tx),
        mapper: EventMapper::new(Arc::new(FieldDecorator::default())),
        codec: LoggingEventCodec::new(),
        idle_timeout,
    };
    (Arc::new(context), rx)
}

/// A complete logging event as MessagePack bytes
pub fn encoded_event(message: &str, thread: &str) -> Vec<u8> {
    rmp_serde::to_vec(&json!({
        "threadName": thread,
        "loggerName": "com.example.integration",
        "level": "INFO",
        "formattedMessage": message,
        "timeStamp": 1_700_000_000_000_i64,
        "callerDataArray": [
            { "fileName": "Test.java", "lineNumber": 12, "className": "com.example.Test", "methodName": "run" }
        ],
        "mdcPropertyMap": { "requestId": "r-1" },
    }))
    .expect("Failed to serialize test event")
}

pub async fn recv_event(rx: &mut UnboundedReceiver<Event>) -> Event {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("queue closed")
}

/// Port that was free a moment ago
pub async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    listener.local_addr().expect("Failed to get local addr").port()
}
