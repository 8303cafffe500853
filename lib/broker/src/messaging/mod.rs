// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Messaging contract.
//!
//! The substrate is actor-style and fully asynchronous: [`Messenger::send`]
//! returns immediately, and exactly one [`Delivery`] later arrives at the
//! registered [`ReplyHandler`] — a correlated reply, an exception, or a
//! timeout. Nothing here blocks a worker waiting for a reply.

pub mod correlation;
pub mod local;

pub use correlation::CorrelationId;
pub use local::{IncomingRequest, LocalGrid};

use crate::protocols::{GridReply, GridRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Addressable collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// The namespace service (metadata, directory creation, delete, flags,
    /// cache-location listing).
    Namespace,
    /// The pool manager.
    PoolManager,
    /// An individual storage pool.
    Pool(String),
    /// The pin manager.
    PinManager,
    /// The space-reservation service.
    SpaceManager,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Namespace => write!(f, "namespace"),
            Destination::PoolManager => write!(f, "pool-manager"),
            Destination::Pool(name) => write!(f, "pool/{name}"),
            Destination::PinManager => write!(f, "pin-manager"),
            Destination::SpaceManager => write!(f, "space-manager"),
        }
    }
}

/// The single eventual outcome of a send.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// The collaborator answered.
    Reply(GridReply),
    /// The substrate failed to deliver or the collaborator faulted.
    Exception(String),
    /// No answer arrived within the send's timeout.
    Timeout,
}

impl Delivery {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Delivery::Reply(reply) => reply.kind(),
            Delivery::Exception(_) => "Exception",
            Delivery::Timeout => "Timeout",
        }
    }
}

/// Receives the one eventual [`Delivery`] for a send.
///
/// Handler invocations for one operation may land on different worker tasks
/// at different times; implementations serialize their own transitions.
#[async_trait]
pub trait ReplyHandler: Send + Sync {
    async fn deliver(self: Arc<Self>, correlation: CorrelationId, delivery: Delivery);
}

/// Asynchronous send with exactly one eventual outcome per request.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Dispatch `request` towards `destination`. Returns the correlation id
    /// assigned to the exchange; the substrate guarantees that exactly one
    /// of reply/exception/timeout reaches `handler` (absent process
    /// termination).
    async fn send(
        &self,
        destination: Destination,
        request: GridRequest,
        handler: Arc<dyn ReplyHandler>,
        timeout: Duration,
    ) -> CorrelationId;
}
