// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pinning and unpinning through the pin manager.
//!
//! A pin first resolves the path and checks read permission, then asks the
//! pin manager to hold a replica online for the requested lifetime. Unpin
//! is a single exchange keyed by either the granted pin id or the
//! originating request id; the caller already holds the file id, so no
//! lookup happens.

use super::{reply_error, split_path, OpContext};
use crate::completion::Completion;
use crate::error::{OperationError, OperationResult};
use crate::messaging::{CorrelationId, Delivery, Destination, ReplyHandler};
use crate::permissions::Subject;
use crate::protocols::{FileId, GridReply, GridRequest, PinKey};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A granted pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinOutcome {
    pub file_id: FileId,
    pub pin_id: u64,
}

/// A released pin; the id is absent when the pin manager matched by
/// request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpinOutcome {
    pub pin_id: Option<u64>,
}

#[derive(Debug)]
enum Stage {
    AwaitingMetadata,
    AwaitingPinConfirmation { file_id: FileId },
    Terminal,
}

pub struct PinOperation {
    ctx: Arc<OpContext>,
    subject: Subject,
    path: String,
    client_host: String,
    lifetime: Duration,
    stage: Mutex<Stage>,
    completion: Arc<Completion<PinOutcome>>,
}

enum Next {
    SendPin(FileId),
    Complete(OperationResult<PinOutcome>),
    Ignore,
}

impl PinOperation {
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        subject: Subject,
        path: String,
        client_host: String,
        lifetime: Duration,
        completion: Arc<Completion<PinOutcome>>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            ctx,
            subject,
            path,
            client_host,
            lifetime,
            stage: Mutex::new(Stage::AwaitingMetadata),
            completion,
        });

        if let Err(error) = split_path(&op.path) {
            op.fail(error);
            return op;
        }

        op.ctx
            .messenger
            .send(
                Destination::Namespace,
                GridRequest::GetMetadata {
                    path: op.path.clone(),
                },
                op.clone(),
                op.ctx.config.namespace_timeout,
            )
            .await;
        op
    }

    fn fail(&self, error: OperationError) {
        {
            let mut stage = self.stage.lock();
            if matches!(*stage, Stage::Terminal) {
                debug!(path = %self.path, %error, "failure after terminal stage dropped");
                return;
            }
            *stage = Stage::Terminal;
        }
        self.completion.complete(Err(error));
    }

    fn on_metadata(&self, stage: &mut Stage, m: crate::protocols::MetadataReply) -> Next {
        if !m.code.is_ok() {
            *stage = Stage::Terminal;
            return Next::Complete(Err(reply_error(m.code, m.error.as_deref(), &self.path)));
        }
        let entry = match m.entry {
            Some(entry) => entry,
            None => {
                *stage = Stage::Terminal;
                return Next::Complete(Err(OperationError::Internal {
                    detail: format!("metadata reply without entry for {}", self.path),
                }));
            }
        };
        if entry.is_directory {
            *stage = Stage::Terminal;
            return Next::Complete(Err(OperationError::InvalidPath {
                detail: format!("{} is a directory", self.path),
            }));
        }
        if !self.ctx.permissions.can_read(&self.subject, &entry) {
            *stage = Stage::Terminal;
            return Next::Complete(Err(OperationError::PermissionDenied {
                detail: format!(
                    "user {} has no permission to read {}",
                    self.subject.name, self.path
                ),
            }));
        }
        *stage = Stage::AwaitingPinConfirmation {
            file_id: entry.file_id,
        };
        Next::SendPin(entry.file_id)
    }
}

#[async_trait]
impl ReplyHandler for PinOperation {
    async fn deliver(self: Arc<Self>, correlation: CorrelationId, delivery: Delivery) {
        let reply = match delivery {
            Delivery::Reply(reply) => reply,
            Delivery::Exception(detail) => {
                return self.fail(OperationError::Communication { detail });
            }
            Delivery::Timeout => return self.fail(OperationError::Timeout),
        };

        let next = {
            let mut stage = self.stage.lock();
            match (&*stage, reply) {
                (Stage::AwaitingMetadata, GridReply::Metadata(m)) => {
                    self.on_metadata(&mut stage, m)
                }
                (Stage::AwaitingPinConfirmation { file_id }, GridReply::Pinned(p)) => {
                    let file_id = *file_id;
                    *stage = Stage::Terminal;
                    if !p.code.is_ok() {
                        Next::Complete(Err(reply_error(p.code, p.error.as_deref(), &self.path)))
                    } else {
                        match p.pin_id {
                            Some(pin_id) => {
                                Next::Complete(Ok(PinOutcome { file_id, pin_id }))
                            }
                            None => Next::Complete(Err(OperationError::Internal {
                                detail: format!("pin granted without id for {}", self.path),
                            })),
                        }
                    }
                }
                (stage, reply) => {
                    debug!(
                        %correlation,
                        path = %self.path,
                        stage = ?stage,
                        kind = reply.kind(),
                        "unexpected reply dropped"
                    );
                    Next::Ignore
                }
            }
        };

        match next {
            Next::SendPin(file_id) => {
                self.ctx
                    .messenger
                    .send(
                        Destination::PinManager,
                        GridRequest::Pin {
                            file_id,
                            client_host: self.client_host.clone(),
                            lifetime: self.lifetime,
                        },
                        self.clone(),
                        self.ctx.config.pin_timeout,
                    )
                    .await;
            }
            Next::Complete(result) => {
                self.completion.complete(result);
            }
            Next::Ignore => {}
        }
    }
}

pub struct UnpinOperation {
    file_id: FileId,
    terminal: Mutex<bool>,
    completion: Arc<Completion<UnpinOutcome>>,
}

impl UnpinOperation {
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        file_id: FileId,
        key: PinKey,
        completion: Arc<Completion<UnpinOutcome>>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            file_id,
            terminal: Mutex::new(false),
            completion,
        });
        ctx.messenger
            .send(
                Destination::PinManager,
                GridRequest::Unpin { file_id, key },
                op.clone(),
                ctx.config.pin_timeout,
            )
            .await;
        op
    }

    fn finish(&self, result: OperationResult<UnpinOutcome>) {
        {
            let mut terminal = self.terminal.lock();
            if *terminal {
                debug!(file_id = %self.file_id, "unpin outcome after terminal stage dropped");
                return;
            }
            *terminal = true;
        }
        self.completion.complete(result);
    }
}

#[async_trait]
impl ReplyHandler for UnpinOperation {
    async fn deliver(self: Arc<Self>, correlation: CorrelationId, delivery: Delivery) {
        match delivery {
            Delivery::Reply(GridReply::Unpinned(p)) => {
                if p.code.is_ok() {
                    self.finish(Ok(UnpinOutcome { pin_id: p.pin_id }));
                } else {
                    let path = self.file_id.to_string();
                    self.finish(Err(reply_error(p.code, p.error.as_deref(), &path)));
                }
            }
            Delivery::Reply(reply) => {
                debug!(
                    %correlation,
                    file_id = %self.file_id,
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
    use crate::protocols::{EntryMetadata, MetadataReply, PinReply, ReturnCode};
    use std::time::SystemTime;

    fn readable_entry() -> EntryMetadata {
        EntryMetadata {
            file_id: FileId::random(),
            is_directory: false,
            uid: 500,
            gid: 500,
            mode: 0o644,
            size: 42,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn metadata(entry: EntryMetadata) -> Delivery {
        Delivery::Reply(GridReply::Metadata(MetadataReply::found(entry)))
    }

    fn pinned(pin_id: u64) -> Delivery {
        Delivery::Reply(GridReply::Pinned(PinReply {
            code: ReturnCode::Ok,
            error: None,
            pin_id: Some(pin_id),
        }))
    }

    fn correlation() -> CorrelationId {
        crate::messaging::correlation::CorrelationCounter::new().next()
    }

    #[tokio::test]
    async fn test_pin_resolves_then_asks_the_pin_manager() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();

        let op = PinOperation::start(
            ctx,
            Subject::new("alice", 500, 500),
            "/data/f".into(),
            "client.example.org".into(),
            Duration::from_secs(3600),
            completion,
        )
        .await;
        let entry = readable_entry();
        let file_id = entry.file_id;
        op.clone().deliver(correlation(), metadata(entry)).await;
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata", "Pin"]);

        op.clone().deliver(correlation(), pinned(7)).await;
        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome, PinOutcome { file_id, pin_id: 7 });
    }

    #[tokio::test]
    async fn test_unreadable_file_is_denied_before_the_pin_manager_is_asked() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();

        let op = PinOperation::start(
            ctx,
            Subject::new("bob", 600, 600),
            "/data/f".into(),
            "client.example.org".into(),
            Duration::from_secs(3600),
            completion,
        )
        .await;
        let mut entry = readable_entry();
        entry.mode = 0o640;
        op.clone().deliver(correlation(), metadata(entry)).await;

        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            OperationError::PermissionDenied { .. }
        ));
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata"]);
    }

    #[tokio::test]
    async fn test_unpin_by_request_id() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let file_id = FileId::random();

        let op = UnpinOperation::start(ctx, file_id, PinKey::Request(42), completion).await;
        assert_eq!(messenger.sent_kinds(), vec!["Unpin"]);

        op.clone()
            .deliver(
                correlation(),
                Delivery::Reply(GridReply::Unpinned(PinReply {
                    code: ReturnCode::Ok,
                    error: None,
                    pin_id: Some(7),
                })),
            )
            .await;
        assert_eq!(rx.await.unwrap().unwrap(), UnpinOutcome { pin_id: Some(7) });
    }

    #[tokio::test]
    async fn test_pin_timeout_completes_once() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();

        let op = PinOperation::start(
            ctx,
            Subject::new("alice", 500, 500),
            "/data/f".into(),
            "client.example.org".into(),
            Duration::from_secs(3600),
            completion,
        )
        .await;
        op.clone().deliver(correlation(), metadata(readable_entry())).await;
        op.clone().deliver(correlation(), Delivery::Timeout).await;
        op.clone().deliver(correlation(), pinned(7)).await;

        assert_eq!(rx.await.unwrap().unwrap_err(), OperationError::Timeout);
    }
}
