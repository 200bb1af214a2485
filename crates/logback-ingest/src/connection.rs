// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle of one connection: decode, map and enqueue until the stream ends.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::decoder::{EventReader, LoggingEventCodec};
use crate::errors::DecodeError;
use crate::mapper::EventMapper;
use crate::queue::OutputQueue;

/// Everything a session needs besides its socket. Shared by all sessions.
#[derive(Clone)]
pub struct SessionContext {
    pub queue: Arc<dyn OutputQueue>,
    pub mapper: EventMapper,
    pub codec: LoggingEventCodec,
    pub idle_timeout: Option<Duration>,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The peer closed the stream on an object boundary.
    Clean,
    /// The stream was malformed, a read failed, or the output queue went away.
    Error,
    /// No data arrived within the idle timeout.
    Timeout,
}

/// Runs one session to completion and closes `stream`.
///
/// Records that fail to map are skipped; every other failure ends only this session. The
/// socket is shut down on every exit path and errors from closing it are discarded.
pub async fn handle_connection<S>(stream: S, peer: &str, context: &SessionContext) -> SessionOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = EventReader::new(stream, context.codec.clone(), context.idle_timeout);
    let outcome = read_events(&mut reader, peer, context).await;
    close(reader.into_inner(), peer).await;
    outcome
}

async fn read_events<S>(
    reader: &mut EventReader<S>,
    peer: &str,
    context: &SessionContext,
) -> SessionOutcome
where
    S: AsyncRead + Unpin,
{
    let mut forwarded: u64 = 0;
    let mut skipped: u64 = 0;

    loop {
        let object = match reader.next().await {
            Ok(Some(object)) => object,
            Ok(None) => {
                debug!(client = %peer, forwarded, skipped, "Connection closed by peer");
                return SessionOutcome::Clean;
            }
            Err(DecodeError::IdleTimeout(limit)) => {
                debug!(client = %peer, timeout = ?limit, "Closing connection after read timeout");
                return SessionOutcome::Timeout;
            }
            Err(e) => {
                debug!(client = %peer, error = %e, details = ?e, "Closing connection");
                return SessionOutcome::Error;
            }
        };

        match context.mapper.map(object, peer) {
            Ok(event) => {
                if let Err(e) = context.queue.push(event).await {
                    debug!(client = %peer, error = %e, "Closing connection");
                    return SessionOutcome::Error;
                }
                forwarded += 1;
            }
            Err(e) => {
                skipped += 1;
                debug!(client = %peer, error = %e, "Skipping logging event");
            }
        }
    }
}

async fn close<S>(mut stream: S, peer: &str)
where
    S: AsyncWrite + Unpin,
{
    if let Err(e) = stream.shutdown().await {
        trace!(client = %peer, "Ignoring error while closing connection: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorator::FieldDecorator;
    use crate::event::{Event, HOST, MESSAGE};
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;
    use tokio::sync::mpsc;
    use tracing_test::traced_test;

    const PEER: &str = "192.0.2.10:40123";

    fn context(idle_timeout: Option<Duration>) -> (SessionContext, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel::<Event>();
        let context = SessionContext {
            queue: Arc::new(tx),
            mapper: EventMapper::new(Arc::new(FieldDecorator::default())),
            codec: LoggingEventCodec::new(),
            idle_timeout,
        };
        (context, rx)
    }

    fn encoded(message: &str) -> Vec<u8> {
        rmp_serde::to_vec(&json!({
            "threadName": "main",
            "loggerName": "com.example.App",
            "level": "INFO",
            "formattedMessage": message,
            "timeStamp": 1_700_000_000_000_i64,
        }))
        .unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_clean_close_forwards_events_in_order() {
        let (context, mut rx) = context(None);
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(&encoded("first")).await.unwrap();
        client.write_all(&encoded("second")).await.unwrap();
        client.shutdown().await.unwrap();

        let outcome = handle_connection(server, PEER, &context).await;

        assert_eq!(outcome, SessionOutcome::Clean);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get_str(MESSAGE), Some("first"));
        assert_eq!(events[1].get_str(MESSAGE), Some("second"));
        assert!(events.iter().all(|e| e.get_str(HOST) == Some(PEER)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unmappable_record_is_skipped() {
        let (context, mut rx) = context(None);
        let (mut client, server) = tokio::io::duplex(1024);

        let incomplete: Value = json!({ "threadName": "main", "formattedMessage": "no logger" });
        client.write_all(&encoded("before")).await.unwrap();
        client
            .write_all(&rmp_serde::to_vec(&incomplete).unwrap())
            .await
            .unwrap();
        client.write_all(&encoded("after")).await.unwrap();
        client.shutdown().await.unwrap();

        let outcome = handle_connection(server, PEER, &context).await;

        assert_eq!(outcome, SessionOutcome::Clean);
        let messages: Vec<String> = drain(&mut rx)
            .iter()
            .map(|e| e.get_str(MESSAGE).unwrap().to_string())
            .collect();
        assert_eq!(messages, vec!["before", "after"]);
        assert!(logs_contain("Skipping logging event"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_stream_ends_session() {
        let (context, mut rx) = context(None);
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(&encoded("kept")).await.unwrap();
        client.write_all(&[0xc1]).await.unwrap();
        client.write_all(&encoded("never read")).await.unwrap();

        let outcome = handle_connection(server, PEER, &context).await;

        assert_eq!(outcome, SessionOutcome::Error);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_str(MESSAGE), Some("kept"));
        assert!(logs_contain("Closing connection"));

        // the server half was shut down and dropped
        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_idle_timeout_closes_socket() {
        let (context, mut rx) = context(Some(Duration::from_millis(50)));
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(&encoded("only")).await.unwrap();

        let outcome = handle_connection(server, PEER, &context).await;

        assert_eq!(outcome, SessionOutcome::Timeout);
        assert_eq!(drain(&mut rx).len(), 1);
        assert!(logs_contain("Closing connection after read timeout"));

        let mut buf = [0u8; 8];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_without_timeout_idle_session_stays_open() {
        let (context, mut rx) = context(None);
        let (mut client, server) = tokio::io::duplex(1024);

        let session = tokio::spawn(async move { handle_connection(server, PEER, &context).await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!session.is_finished());

        client.write_all(&encoded("late")).await.unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(session.await.unwrap(), SessionOutcome::Clean);
        assert_eq!(rx.recv().await.unwrap().get_str(MESSAGE), Some("late"));
    }

    #[tokio::test]
    async fn test_closed_queue_ends_session() {
        let (context, rx) = context(None);
        drop(rx);
        let (mut client, server) = tokio::io::duplex(1024);

        client.write_all(&encoded("dropped")).await.unwrap();

        let outcome = handle_connection(server, PEER, &context).await;
        assert_eq!(outcome, SessionOutcome::Error);
    }
}
