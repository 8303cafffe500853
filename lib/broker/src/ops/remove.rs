// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Remove-file with replica demotion.
//!
//! Before the namespace entry is deleted, every pool holding a replica is
//! told to demote it from precious to cached, and the namespace records the
//! deletion flag on the entry. The demotions and the flag write run in
//! parallel; a [`FanInSet`] joins them, and only the crossover sends the
//! final delete. A single pool refusing the demotion fails the whole
//! removal immediately — the entry stays, the remaining replies are
//! dropped.

use super::{reply_error, split_path, OpContext};
use crate::completion::Completion;
use crate::error::{OperationError, OperationResult};
use crate::fanin::{FanInSet, FanInStatus};
use crate::messaging::{CorrelationId, Delivery, Destination, ReplyHandler};
use crate::permissions::Subject;
use crate::protocols::{FileId, GridReply, GridRequest};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

const DELETION_FLAG: &str = "deletion-flag";

/// Successful removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub file_id: FileId,
}

#[derive(Debug)]
enum Stage {
    AwaitingMetadata,
    AwaitingCacheLocations { file_id: FileId },
    AwaitingFanIn { file_id: FileId },
    AwaitingDeleteConfirmation { file_id: FileId },
    Terminal,
}

pub struct RemoveOperation {
    ctx: Arc<OpContext>,
    subject: Subject,
    path: String,
    stage: Mutex<Stage>,
    fan_in: FanInSet,
    completion: Arc<Completion<RemoveOutcome>>,
}

enum Next {
    SendLocations(FileId),
    FanOut { file_id: FileId, pools: Vec<String> },
    SendDelete,
    Complete(OperationResult<RemoveOutcome>),
    Ignore,
}

impl RemoveOperation {
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        subject: Subject,
        path: String,
        completion: Arc<Completion<RemoveOutcome>>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            ctx,
            subject,
            path,
            stage: Mutex::new(Stage::AwaitingMetadata),
            fan_in: FanInSet::new(&[DELETION_FLAG]),
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
        if !self.ctx.permissions.can_delete(&self.subject, &entry) {
            *stage = Stage::Terminal;
            return Next::Complete(Err(OperationError::PermissionDenied {
                detail: format!(
                    "user {} has no permission to delete {}",
                    self.subject.name, self.path
                ),
            }));
        }
        *stage = Stage::AwaitingCacheLocations {
            file_id: entry.file_id,
        };
        Next::SendLocations(entry.file_id)
    }

    /// Translate a fan-in status into the machine's next move.
    fn on_fan_in(&self, stage: &mut Stage, file_id: FileId, status: FanInStatus) -> Next {
        match status {
            FanInStatus::Pending => Next::Ignore,
            FanInStatus::Complete => {
                *stage = Stage::AwaitingDeleteConfirmation { file_id };
                Next::SendDelete
            }
            FanInStatus::Failed(error) => {
                *stage = Stage::Terminal;
                Next::Complete(Err(error))
            }
        }
    }
}

#[async_trait]
impl ReplyHandler for RemoveOperation {
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
                (Stage::AwaitingCacheLocations { file_id }, GridReply::CacheLocations(c)) => {
                    let file_id = *file_id;
                    if c.code.is_ok() {
                        *stage = Stage::AwaitingFanIn { file_id };
                        Next::FanOut {
                            file_id,
                            pools: c.pools,
                        }
                    } else {
                        *stage = Stage::Terminal;
                        Next::Complete(Err(reply_error(c.code, c.error.as_deref(), &self.path)))
                    }
                }
                (Stage::AwaitingFanIn { file_id }, GridReply::PersistencyModified(p)) => {
                    let file_id = *file_id;
                    let outcome = if p.code.is_ok() {
                        Ok(())
                    } else {
                        Err(reply_error(p.code, p.error.as_deref(), &self.path))
                    };
                    let status = self.fan_in.peer_reply(&p.pool, outcome);
                    self.on_fan_in(&mut stage, file_id, status)
                }
                (Stage::AwaitingFanIn { file_id }, GridReply::FlagSet(f)) => {
                    let file_id = *file_id;
                    if f.code.is_ok() {
                        let status = self.fan_in.precondition_met(DELETION_FLAG);
                        self.on_fan_in(&mut stage, file_id, status)
                    } else {
                        *stage = Stage::Terminal;
                        Next::Complete(Err(reply_error(f.code, f.error.as_deref(), &self.path)))
                    }
                }
                (Stage::AwaitingDeleteConfirmation { file_id }, GridReply::EntryDeleted(d)) => {
                    let file_id = *file_id;
                    *stage = Stage::Terminal;
                    if d.code.is_ok() {
                        Next::Complete(Ok(RemoveOutcome { file_id }))
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
            Next::SendLocations(file_id) => {
                self.ctx
                    .messenger
                    .send(
                        Destination::Namespace,
                        GridRequest::ListCacheLocations { file_id },
                        self.clone(),
                        self.ctx.config.namespace_timeout,
                    )
                    .await;
            }
            Next::FanOut { file_id, pools } => {
                // Expected peers must be recorded before any reply can race
                // the crossover check.
                self.fan_in.begin(pools.iter().cloned());
                for pool in pools {
                    self.ctx
                        .messenger
                        .send(
                            Destination::Pool(pool.clone()),
                            GridRequest::ModifyPersistency {
                                pool,
                                file_id,
                                precious: false,
                            },
                            self.clone(),
                            self.ctx.config.pool_timeout,
                        )
                        .await;
                }
                self.ctx
                    .messenger
                    .send(
                        Destination::Namespace,
                        GridRequest::SetFlag {
                            file_id,
                            name: "d".to_string(),
                            value: "true".to_string(),
                        },
                        self.clone(),
                        self.ctx.config.namespace_timeout,
                    )
                    .await;
            }
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
