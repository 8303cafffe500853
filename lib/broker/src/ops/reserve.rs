// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Space reservation.
//!
//! A single exchange with the space-reservation service. The service makes
//! all placement and quota decisions itself; this machine only validates
//! the path, relays the request, and maps the answer.

use super::{reply_error, split_path, OpContext};
use crate::completion::Completion;
use crate::error::{OperationError, OperationResult};
use crate::messaging::{CorrelationId, Delivery, Destination, ReplyHandler};
use crate::permissions::Subject;
use crate::protocols::{GridReply, GridRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A granted reservation. `granted` may exceed the requested size when the
/// service rounds up to its allocation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveOutcome {
    pub space_token: String,
    pub granted: u64,
}

pub struct ReserveOperation {
    path: String,
    terminal: Mutex<bool>,
    completion: Arc<Completion<ReserveOutcome>>,
}

impl ReserveOperation {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        subject: Subject,
        path: String,
        size: u64,
        client_host: String,
        lifetime: Duration,
        completion: Arc<Completion<ReserveOutcome>>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            path,
            terminal: Mutex::new(false),
            completion,
        });

        if let Err(error) = split_path(&op.path) {
            op.finish(Err(error));
            return op;
        }

        ctx.messenger
            .send(
                Destination::SpaceManager,
                GridRequest::ReserveSpace {
                    uid: subject.uid,
                    gid: subject.gid,
                    path: op.path.clone(),
                    size,
                    client_host,
                    lifetime,
                },
                op.clone(),
                ctx.config.space_timeout,
            )
            .await;
        op
    }

    fn finish(&self, result: OperationResult<ReserveOutcome>) {
        {
            let mut terminal = self.terminal.lock();
            if *terminal {
                debug!(path = %self.path, "reservation outcome after terminal stage dropped");
                return;
            }
            *terminal = true;
        }
        self.completion.complete(result);
    }
}

#[async_trait]
impl ReplyHandler for ReserveOperation {
    async fn deliver(self: Arc<Self>, correlation: CorrelationId, delivery: Delivery) {
        match delivery {
            Delivery::Reply(GridReply::SpaceReserved(r)) => {
                if !r.code.is_ok() {
                    self.finish(Err(reply_error(r.code, r.error.as_deref(), &self.path)));
                    return;
                }
                match r.space_token {
                    Some(space_token) => self.finish(Ok(ReserveOutcome {
                        space_token,
                        granted: r.granted,
                    })),
                    None => self.finish(Err(OperationError::Internal {
                        detail: format!("reservation granted without token for {}", self.path),
                    })),
                }
            }
            Delivery::Reply(reply) => {
                debug!(
                    %correlation,
                    path = %self.path,
                    kind = reply.kind(),
                    "unexpected reply dropped"
                );
            }
            Delivery::Exception(detail) => {
                self.finish(Err(OperationError::Communication { detail }));
            }
            Delivery::Timeout => self.finish(Err(OperationError::Timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{stub_context, StubMessenger};
    use crate::protocols::{ReserveSpaceReply, ReturnCode};

    fn correlation() -> CorrelationId {
        crate::messaging::correlation::CorrelationCounter::new().next()
    }

    async fn start_default(
        messenger: Arc<StubMessenger>,
    ) -> (
        Arc<ReserveOperation>,
        tokio::sync::oneshot::Receiver<OperationResult<ReserveOutcome>>,
    ) {
        let ctx = stub_context(messenger);
        let (completion, rx) = Completion::channel();
        let op = ReserveOperation::start(
            ctx,
            Subject::new("alice", 500, 500),
            "/data/f".into(),
            1 << 30,
            "client.example.org".into(),
            Duration::from_secs(86400),
            completion,
        )
        .await;
        (op, rx)
    }

    #[tokio::test]
    async fn test_grant_carries_token_and_size() {
        let messenger = StubMessenger::new();
        let (op, rx) = start_default(messenger.clone()).await;
        assert_eq!(messenger.sent_kinds(), vec!["ReserveSpace"]);

        op.clone()
            .deliver(
                correlation(),
                Delivery::Reply(GridReply::SpaceReserved(ReserveSpaceReply {
                    code: ReturnCode::Ok,
                    error: None,
                    space_token: Some("token-17".into()),
                    granted: 1 << 30,
                })),
            )
            .await;

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.space_token, "token-17");
        assert_eq!(outcome.granted, 1 << 30);
    }

    #[tokio::test]
    async fn test_refusal_maps_to_typed_error() {
        let messenger = StubMessenger::new();
        let (op, rx) = start_default(messenger).await;

        op.clone()
            .deliver(
                correlation(),
                Delivery::Reply(GridReply::SpaceReserved(ReserveSpaceReply {
                    code: ReturnCode::PermissionDenied,
                    error: Some("quota exhausted".into()),
                    space_token: None,
                    granted: 0,
                })),
            )
            .await;

        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            OperationError::PermissionDenied { .. }
        ));
    }

    #[tokio::test]
    async fn test_timeout_then_late_grant_is_dropped() {
        let messenger = StubMessenger::new();
        let (op, rx) = start_default(messenger).await;

        op.clone().deliver(correlation(), Delivery::Timeout).await;
        op.clone()
            .deliver(
                correlation(),
                Delivery::Reply(GridReply::SpaceReserved(ReserveSpaceReply {
                    code: ReturnCode::Ok,
                    error: None,
                    space_token: Some("token-17".into()),
                    granted: 1,
                })),
            )
            .await;

        assert_eq!(rx.await.unwrap().unwrap_err(), OperationError::Timeout);
    }
}
