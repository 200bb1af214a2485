// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Accepts (server mode) or establishes (client mode) connections and runs a session on each.
//!
//! In server mode every accepted connection gets its own task and the listener never waits for
//! a session to finish. In client mode there is exactly one peer, so the client runs one
//! session at a time and dials again once it ends, backing off while the peer is unreachable.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::config::{Config, Mode};
use crate::connection::{handle_connection, SessionContext};
use crate::decoder::LoggingEventCodec;
use crate::decorator::Decorator;
use crate::errors::IngestError;
use crate::mapper::EventMapper;
use crate::peer::{client_source, peer_identity, server_source};
use crate::queue::OutputQueue;

// Pause after a recoverable accept failure so a persistent condition does not spin the loop.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Runs the configured mode until cancelled or until a fatal listener error.
pub struct Ingester {
    config: Config,
    context: Arc<SessionContext>,
    cancel_token: CancellationToken,
}

impl Ingester {
    /// Decorates events with the configured static fields.
    #[must_use]
    pub fn new(config: Config, queue: Arc<dyn OutputQueue>, cancel_token: CancellationToken) -> Self {
        let decorator = Arc::new(config.add_fields.clone());
        Self::with_decorator(config, queue, decorator, cancel_token)
    }

    #[must_use]
    pub fn with_decorator(
        config: Config,
        queue: Arc<dyn OutputQueue>,
        decorator: Arc<dyn Decorator>,
        cancel_token: CancellationToken,
    ) -> Self {
        let context = Arc::new(SessionContext {
            queue,
            mapper: EventMapper::new(decorator),
            codec: LoggingEventCodec::with_max_frame_length(config.max_frame_length),
            idle_timeout: config.data_timeout,
        });
        Self {
            config,
            context,
            cancel_token,
        }
    }

    pub async fn run(self) -> Result<(), IngestError> {
        self.config.validate()?;
        info!(
            mode = %self.config.mode,
            address = %self.config.address(),
            "Starting logback input"
        );

        match self.config.mode {
            Mode::Server => {
                Server::bind(&self.config.address(), self.context, self.cancel_token)
                    .await?
                    .serve()
                    .await
            }
            Mode::Client => {
                Client::new(
                    self.config.address(),
                    self.context,
                    ReconnectBackoff::new(self.config.reconnect_delay, self.config.reconnect_max_delay),
                    self.cancel_token,
                )
                .run()
                .await;
                Ok(())
            }
        }
    }
}

/// Bound listener that spawns one session per accepted connection.
pub struct Server {
    listener: TcpListener,
    address: String,
    local_addr: SocketAddr,
    context: Arc<SessionContext>,
    cancel_token: CancellationToken,
}

impl Server {
    pub async fn bind(
        address: &str,
        context: Arc<SessionContext>,
        cancel_token: CancellationToken,
    ) -> Result<Self, IngestError> {
        let bind_error = |source| IngestError::Bind {
            addr: address.to_string(),
            source,
        };
        let listener = TcpListener::bind(address).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        info!(address = %local_addr, "Starting logback input listener");

        Ok(Self {
            listener,
            address: address.to_string(),
            local_addr,
            context,
            cancel_token,
        })
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until cancelled or until the listener fails.
    ///
    /// Sessions still running when the loop exits are left to finish on their own.
    pub async fn serve(self) -> Result<(), IngestError> {
        let mut sessions = JoinSet::new();

        let result = loop {
            let stream = tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(address = %self.local_addr, "Logback input listener stopped");
                    break Ok(());
                },
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) if is_transient(&e) => {
                        warn!(error = %e, retry_in = ?ACCEPT_RETRY_DELAY, "Failed to accept connection");
                        sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                    Err(e) => {
                        error!(address = %self.local_addr, error = %e, "Listener error");
                        break Err(IngestError::Accept {
                            addr: self.local_addr,
                            source: e,
                        });
                    }
                },
                finished = async {
                    match sessions.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!("Connection handler panicked: {:?}", e);
                        }
                    }
                    continue;
                },
            };

            let peer = peer_identity(&stream);
            debug!(client = %peer, server = %self.address, "Accepted connection");
            let span = debug_span!(
                "session",
                client = %peer,
                source = %server_source(&self.address, &peer)
            );
            let context = Arc::clone(&self.context);
            sessions.spawn(
                async move {
                    handle_connection(stream, &peer, &context).await;
                }
                .instrument(span),
            );
        };

        sessions.detach_all();
        result
    }
}

// Accept failures that leave the listener usable. Running out of descriptors or buffer memory
// clears up as sessions close.
fn is_transient(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::OutOfMemory
    ) {
        return true;
    }
    is_resource_exhaustion(e)
}

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

/// Delay before the next connection attempt: starts at `base` and doubles per failure up to
/// `max`.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            current: base,
        }
    }

    /// Delay after a failed attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Delay after a completed session.
    pub fn reset(&mut self) -> Duration {
        self.current = self.base;
        self.base
    }
}

/// Dials a single peer, one session at a time, forever.
pub struct Client {
    address: String,
    context: Arc<SessionContext>,
    backoff: ReconnectBackoff,
    cancel_token: CancellationToken,
}

impl Client {
    #[must_use]
    pub fn new(
        address: String,
        context: Arc<SessionContext>,
        backoff: ReconnectBackoff,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            address,
            context,
            backoff,
            cancel_token,
        }
    }

    /// Connects, runs the session to completion and reconnects, until cancelled.
    ///
    /// Connection failures are retried indefinitely. Cancellation is observed between sessions.
    pub async fn run(mut self) {
        loop {
            let connected = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                connected = TcpStream::connect(self.address.as_str()) => connected,
            };

            let delay = match connected {
                Ok(stream) => {
                    let peer = peer_identity(&stream);
                    debug!(client = %peer, "Opened connection");
                    let span = debug_span!("session", client = %peer, source = %client_source(&peer));
                    handle_connection(stream, &peer, &self.context)
                        .instrument(span)
                        .await;
                    self.backoff.reset()
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        address = %self.address,
                        error = %e,
                        retry_in = ?delay,
                        "Failed to connect"
                    );
                    delay
                }
            };

            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                () = sleep(delay) => {},
            }
        }
        info!(address = %self.address, "Logback input client stopped");
    }
}
