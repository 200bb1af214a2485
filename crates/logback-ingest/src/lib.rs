// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP ingestion of serialized logback logging events.
//!
//! The ingester either listens for inbound connections (server mode) or dials a single
//! upstream peer (client mode). Every connection carries a stream of self-delimited
//! MessagePack objects; each object is decoded, mapped into an [`event::Event`] and pushed
//! to an [`queue::OutputQueue`].
//!
//! ```text
//!   Server / Client (supervisor)
//!          │  TcpStream
//!          v
//!   handle_connection ──> EventReader ──> EventMapper ──> OutputQueue
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod connection;
pub mod decoder;
pub mod decorator;
pub mod errors;
pub mod event;
pub mod logging_event;
pub mod mapper;
pub mod peer;
pub mod queue;
pub mod supervisor;
