// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! In-process messaging substrate.
//!
//! Collaborators register a mailbox per [`Destination`]; every send spawns a
//! task that routes the request, enforces the timeout, and delivers exactly
//! one [`Delivery`] to the handler. An unknown destination or a closed
//! mailbox delivers an exception. This is the reference substrate and the
//! one the integration tests run against.

use super::correlation::{CorrelationCounter, CorrelationId};
use super::{Delivery, Destination, Messenger, ReplyHandler};
use crate::protocols::{GridReply, GridRequest};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

/// A routed request as seen by a collaborator mailbox.
#[derive(Debug)]
pub struct IncomingRequest {
    pub correlation: CorrelationId,
    pub request: GridRequest,
    /// Dropping this without sending makes the sender observe an exception;
    /// holding it without sending makes the sender time out.
    pub reply: oneshot::Sender<GridReply>,
}

/// Mailbox-based substrate connecting the broker to in-process collaborators.
pub struct LocalGrid {
    mailboxes: DashMap<Destination, mpsc::Sender<IncomingRequest>>,
    counter: CorrelationCounter,
    tasks: TaskTracker,
}

impl LocalGrid {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            mailboxes: DashMap::new(),
            counter: CorrelationCounter::new(),
            tasks: TaskTracker::new(),
        })
    }

    /// Attach a raw mailbox for `destination`, replacing any previous one.
    pub fn register(&self, destination: Destination, mailbox: mpsc::Sender<IncomingRequest>) {
        if self.mailboxes.insert(destination.clone(), mailbox).is_some() {
            warn!(%destination, "replacing existing mailbox");
        }
    }

    /// Open a mailbox for `destination` and hand the receiving end to the
    /// caller, which then answers (or withholds) replies itself.
    pub fn open_mailbox(
        &self,
        destination: Destination,
        capacity: usize,
    ) -> mpsc::Receiver<IncomingRequest> {
        let (tx, rx) = mpsc::channel(capacity);
        self.register(destination, tx);
        rx
    }

    /// Spawn a collaborator loop answering each request with `handler`.
    /// Returning `None` parks the request unanswered, so the sender times
    /// out.
    pub fn serve<F>(&self, destination: Destination, mut handler: F) -> tokio::task::JoinHandle<()>
    where
        F: FnMut(GridRequest) -> Option<GridReply> + Send + 'static,
    {
        let mut rx = self.open_mailbox(destination, 64);
        tokio::spawn(async move {
            let mut parked = Vec::new();
            while let Some(incoming) = rx.recv().await {
                match handler(incoming.request) {
                    Some(reply) => {
                        let _ = incoming.reply.send(reply);
                    }
                    None => parked.push(incoming.reply),
                }
            }
            drop(parked);
        })
    }

    /// Stop accepting new sends and wait for in-flight deliveries to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}

#[async_trait]
impl Messenger for LocalGrid {
    async fn send(
        &self,
        destination: Destination,
        request: GridRequest,
        handler: Arc<dyn ReplyHandler>,
        timeout: Duration,
    ) -> CorrelationId {
        let correlation = self.counter.next();
        trace!(%correlation, %destination, kind = request.kind(), "send");

        let mailbox = self.mailboxes.get(&destination).map(|m| m.clone());
        self.tasks.spawn(async move {
            let delivery = match mailbox {
                None => Delivery::Exception(format!("no route to {destination}")),
                Some(mailbox) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let incoming = IncomingRequest {
                        correlation,
                        request,
                        reply: reply_tx,
                    };
                    if mailbox.send(incoming).await.is_err() {
                        Delivery::Exception(format!("{destination} mailbox closed"))
                    } else {
                        match tokio::time::timeout(timeout, reply_rx).await {
                            Ok(Ok(reply)) => Delivery::Reply(reply),
                            Ok(Err(_)) => Delivery::Exception(format!(
                                "{destination} dropped the request without answering"
                            )),
                            Err(_) => Delivery::Timeout,
                        }
                    }
                }
            };
            debug!(%correlation, kind = delivery.kind(), "deliver");
            handler.deliver(correlation, delivery).await;
        });
        correlation
    }
}
