// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Delete-by-path.
//!
//! initial → awaiting-metadata → awaiting-delete-confirmation → terminal.
//! A metadata miss, a directory entry, or a permission failure
//! short-circuits to the matching failure without any further sends.

use super::{reply_error, split_path, OpContext};
use crate::completion::Completion;
use crate::error::{OperationError, OperationResult};
use crate::messaging::{CorrelationId, Delivery, Destination, ReplyHandler};
use crate::permissions::Subject;
use crate::protocols::{FileId, GridReply, GridRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Successful deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub file_id: FileId,
}

#[derive(Debug)]
enum Stage {
    AwaitingMetadata,
    AwaitingDeleteConfirmation { file_id: FileId },
    Terminal,
}

pub struct DeleteOperation {
    ctx: Arc<OpContext>,
    subject: Subject,
    path: String,
    stage: Mutex<Stage>,
    completion: Arc<Completion<DeleteOutcome>>,
}

enum Next {
    SendDelete,
    Complete(OperationResult<DeleteOutcome>),
    Ignore,
}

impl DeleteOperation {
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        subject: Subject,
        path: String,
        completion: Arc<Completion<DeleteOutcome>>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            ctx,
            subject,
            path,
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

    /// Force the failed terminal stage; a no-op if already terminal.
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
        if !self.ctx.permissions.can_delete(&self.subject, &entry) {
            *stage = Stage::Terminal;
            return Next::Complete(Err(OperationError::PermissionDenied {
                detail: format!(
                    "user {} has no permission to delete {}",
                    self.subject.name, self.path
                ),
            }));
        }
        *stage = Stage::AwaitingDeleteConfirmation {
            file_id: entry.file_id,
        };
        Next::SendDelete
    }
}

#[async_trait]
impl ReplyHandler for DeleteOperation {
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
                (Stage::AwaitingDeleteConfirmation { file_id }, GridReply::EntryDeleted(d)) => {
                    let file_id = *file_id;
                    *stage = Stage::Terminal;
                    if d.code.is_ok() {
                        Next::Complete(Ok(DeleteOutcome { file_id }))
                    } else {
                        Next::Complete(Err(reply_error(d.code, d.error.as_deref(), &self.path)))
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
            Next::SendDelete => {
                self.ctx
                    .messenger
                    .send(
                        Destination::Namespace,
                        GridRequest::DeleteEntry {
                            path: self.path.clone(),
                        },
                        self.clone(),
                        self.ctx.config.namespace_timeout,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testing::{stub_context, StubMessenger};
    use crate::protocols::{DeleteReply, EntryMetadata, MetadataReply, ReturnCode};
    use std::time::SystemTime;

    fn file_entry(uid: u32) -> EntryMetadata {
        EntryMetadata {
            file_id: FileId::random(),
            is_directory: false,
            uid,
            gid: 500,
            mode: 0o644,
            size: 42,
            modified: SystemTime::UNIX_EPOCH,
        }
    }

    fn metadata_reply(entry: EntryMetadata) -> Delivery {
        Delivery::Reply(GridReply::Metadata(MetadataReply::found(entry)))
    }

    fn deleted_reply() -> Delivery {
        Delivery::Reply(GridReply::EntryDeleted(DeleteReply {
            code: ReturnCode::Ok,
            error: None,
        }))
    }

    fn correlation() -> CorrelationId {
        crate::messaging::correlation::CorrelationCounter::new().next()
    }

    #[tokio::test]
    async fn test_happy_path_and_duplicate_delivery_dropped() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let subject = Subject::new("alice", 500, 500);

        let op = DeleteOperation::start(ctx, subject, "/data/f".into(), completion).await;
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata"]);

        op.clone()
            .deliver(correlation(), metadata_reply(file_entry(500)))
            .await;
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata", "DeleteEntry"]);

        op.clone().deliver(correlation(), deleted_reply()).await;
        assert!(rx.await.unwrap().is_ok());

        // Post-terminal duplicates: dropped without new sends or completions.
        op.clone().deliver(correlation(), deleted_reply()).await;
        op.clone().deliver(correlation(), Delivery::Timeout).await;
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata", "DeleteEntry"]);
    }

    #[tokio::test]
    async fn test_directory_short_circuits_with_no_further_sends() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let subject = Subject::new("alice", 500, 500);

        let op = DeleteOperation::start(ctx, subject, "/data/dir".into(), completion).await;
        let mut entry = file_entry(500);
        entry.is_directory = true;
        op.clone().deliver(correlation(), metadata_reply(entry)).await;

        let error = rx.await.unwrap().unwrap_err();
        assert!(
            matches!(error, OperationError::InvalidPath { ref detail } if detail.contains("is a directory"))
        );
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata"]);
    }

    #[tokio::test]
    async fn test_foreign_file_is_permission_denied() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let subject = Subject::new("bob", 600, 600);

        let op = DeleteOperation::start(ctx, subject, "/data/f".into(), completion).await;
        op.clone()
            .deliver(correlation(), metadata_reply(file_entry(500)))
            .await;

        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            OperationError::PermissionDenied { .. }
        ));
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata"]);
    }

    #[tokio::test]
    async fn test_unexpected_reply_kind_is_dropped() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let subject = Subject::new("alice", 500, 500);

        let op = DeleteOperation::start(ctx, subject, "/data/f".into(), completion).await;
        op.clone().deliver(correlation(), deleted_reply()).await;
        assert_eq!(messenger.sent_kinds(), vec!["GetMetadata"]);

        // The machine is still waiting for metadata and works afterwards.
        op.clone()
            .deliver(correlation(), metadata_reply(file_entry(500)))
            .await;
        op.clone().deliver(correlation(), deleted_reply()).await;
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_malformed_path_fails_without_sends() {
        let messenger = StubMessenger::new();
        let ctx = stub_context(messenger.clone());
        let (completion, rx) = Completion::channel();
        let subject = Subject::new("alice", 500, 500);

        DeleteOperation::start(ctx, subject, "not-absolute".into(), completion).await;
        assert!(matches!(
            rx.await.unwrap().unwrap_err(),
            OperationError::InvalidPath { .. }
        ));
        assert!(messenger.sent_kinds().is_empty());
    }
}
