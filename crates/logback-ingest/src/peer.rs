// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Peer identity of a connected socket.

use std::io;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Identity reported when the remote address of a socket cannot be read.
pub const UNKNOWN_PEER: &str = "unknown:0";

/// Returns `address:port` for the remote end of `stream`.
///
/// Never fails: a socket whose peer address is no longer available (for example because the
/// peer already reset the connection) is reported as [`UNKNOWN_PEER`].
#[must_use]
pub fn peer_identity(stream: &TcpStream) -> String {
    identity_from(stream.peer_addr())
}

fn identity_from(addr: io::Result<SocketAddr>) -> String {
    match addr {
        Ok(addr) => format!("{}:{}", addr.ip(), addr.port()),
        Err(_) => UNKNOWN_PEER.to_string(),
    }
}

/// Source tag for a connection accepted by a listener on `listen_addr`.
#[must_use]
pub fn server_source(listen_addr: &str, peer: &str) -> String {
    format!("tcp://{listen_addr}/client/{peer}")
}

/// Source tag for an outbound connection to `peer`.
#[must_use]
pub fn client_source(peer: &str) -> String {
    format!("tcp://{peer}/server")
}
