// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Push side of the downstream event queue.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::QueueError;
use crate::event::Event;

/// Destination for mapped events, shared by every connection.
///
/// Pushes from one connection complete in call order; pushes from different connections may
/// interleave arbitrarily.
#[async_trait]
pub trait OutputQueue: Send + Sync {
    async fn push(&self, event: Event) -> Result<(), QueueError>;
}

#[async_trait]
impl OutputQueue for mpsc::UnboundedSender<Event> {
    async fn push(&self, event: Event) -> Result<(), QueueError> {
        self.send(event).map_err(|_| QueueError)
    }
}

/// Waits for capacity when the queue is full.
#[async_trait]
impl OutputQueue for mpsc::Sender<Event> {
    async fn push(&self, event: Event) -> Result<(), QueueError> {
        self.send(event).await.map_err(|_| QueueError)
    }
}
