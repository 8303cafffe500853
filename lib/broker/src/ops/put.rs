// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Prepare-to-put with single-flight directory creation.
//!
//! The machine first interrogates the target path. An existing file either
//! fails the put (`file exists`) or, with overwrite, is captured so the
//! caller can replace it. A missing target starts the ancestor walk: the
//! machine ascends the parent chain one level at a time, registering with
//! the [`PathCoordinator`] at every level it visits. At the first level
//! another operation is already working on, it parks passively and is
//! replayed that owner's outcome; everywhere else it owns the level and
//! interrogates it itself. Once an existing directory is found the machine
//! descends again, creating each missing level exactly once and inheriting
//! ownership and mode bits from the level above.
//!
//! Whatever the machine learns about a level is published through
//! [`PathCoordinator::notify_outcome`], so siblings parked on that level
//! advance as if they had received the reply themselves. Any failure
//! abandons every level this machine owns, so nobody hangs behind it.

use super::{join_path, reply_error, split_path, OpContext};
use crate::completion::Completion;
use crate::coordinator::{OperationId, PathOutcome, PathWaiter};
use crate::error::OperationError;
use crate::messaging::{CorrelationId, Delivery, Destination, ReplyHandler};
use crate::permissions::Subject;
use crate::protocols::{
    CreateDirectoryReply, EntryMetadata, GridReply, GridRequest, MetadataReply, ReturnCode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::debug;

/// Per-request knobs for a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutOptions {
    /// Replace an existing file instead of failing with `file exists`.
    pub overwrite: bool,
    /// Create missing ancestor directories. Only honored when the broker-wide
    /// [`recursive_directory_creation`](crate::config::BrokerConfig) flag is
    /// also set.
    pub recursive: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            recursive: true,
        }
    }
}

/// Everything a caller needs to start the transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    /// The directory the file will land in, existing or freshly created.
    pub parent: EntryMetadata,
    /// The entry being replaced, present only for an overwriting put.
    pub existing: Option<EntryMetadata>,
}

#[derive(Debug)]
enum Stage {
    AwaitingTargetMetadata,
    /// Owning the level at `depth` and waiting for its metadata.
    AwaitingParentMetadata { depth: usize },
    /// Parked behind another operation's ticket for the level at `depth`.
    PassivelyWaiting { depth: usize },
    /// Waiting for the namespace to confirm creation of the level at
    /// `depth`, which inherits the recorded ownership and mode bits.
    AwaitingDirectoryCreation {
        depth: usize,
        uid: u32,
        gid: u32,
        mode: u32,
    },
    Terminal,
}

/// Follow-up work decided under the stage lock, executed after release.
enum Action {
    Send(GridRequest),
    /// Register at `depth`: own it and interrogate, or park behind the
    /// existing owner.
    AskParent { depth: usize },
    /// Publish a resolved level to parked siblings.
    NotifyResolved { path: String, entry: EntryMetadata },
    Fail(OperationError),
    Succeed(PutOutcome),
}

pub struct PutOperation {
    ctx: Arc<OpContext>,
    id: OperationId,
    subject: Subject,
    path: String,
    segments: Vec<String>,
    options: PutOptions,
    stage: Mutex<Stage>,
    /// The target entry captured when an overwriting put finds one.
    existing: Mutex<Option<EntryMetadata>>,
    completion: Arc<Completion<PutOutcome>>,
}

impl PutOperation {
    pub(crate) async fn start(
        ctx: Arc<OpContext>,
        subject: Subject,
        path: String,
        options: PutOptions,
        completion: Arc<Completion<PutOutcome>>,
    ) -> Arc<Self> {
        let segments = match split_path(&path) {
            Ok(segments) => segments,
            Err(error) => {
                let op = Arc::new(Self {
                    ctx,
                    id: OperationId::new(),
                    subject,
                    path,
                    segments: Vec::new(),
                    options,
                    stage: Mutex::new(Stage::Terminal),
                    existing: Mutex::new(None),
                    completion,
                });
                op.completion.complete(Err(error));
                return op;
            }
        };

        let op = Arc::new(Self {
            ctx,
            id: OperationId::new(),
            subject,
            path,
            segments,
            options,
            stage: Mutex::new(Stage::AwaitingTargetMetadata),
            existing: Mutex::new(None),
            completion,
        });

        op.send_namespace(GridRequest::GetMetadata {
            path: op.path.clone(),
        })
        .await;
        op
    }

    async fn send_namespace(self: &Arc<Self>, request: GridRequest) {
        self.ctx
            .messenger
            .send(
                Destination::Namespace,
                request,
                self.clone(),
                self.ctx.config.namespace_timeout,
            )
            .await;
    }

    fn recursion_enabled(&self) -> bool {
        self.options.recursive && self.ctx.config.recursive_directory_creation
    }

    /// Force the failed terminal stage, releasing every owned level.
    fn fail(&self, error: OperationError) {
        {
            let mut stage = self.stage.lock();
            if matches!(*stage, Stage::Terminal) {
                debug!(%self.id, path = %self.path, %error, "failure after terminal stage dropped");
                return;
            }
            *stage = Stage::Terminal;
        }
        self.ctx.coordinator.abandon(self.id, error.clone());
        self.completion.complete(Err(error));
    }

    /// The level at `depth` resolved to `parent`. Either this was the
    /// target's own parent and the put is done, or the next level down is
    /// still missing and gets created with inherited bits.
    fn continue_down(
        &self,
        stage: &mut Stage,
        actions: &mut Vec<Action>,
        depth: usize,
        parent: EntryMetadata,
    ) {
        if depth + 1 == self.segments.len() {
            let existing = self.existing.lock().take();
            // Replacing an entry mutates the directory just like adding one,
            // so both cases are decided on the parent.
            let allowed = if existing.is_some() {
                self.ctx.permissions.can_write(&self.subject, &parent)
            } else {
                self.ctx.permissions.can_create(&self.subject, &parent)
            };
            if !allowed {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::PermissionDenied {
                    detail: format!(
                        "user {} has no permission to write {}",
                        self.subject.name, self.path
                    ),
                }));
                return;
            }
            *stage = Stage::Terminal;
            actions.push(Action::Succeed(PutOutcome { parent, existing }));
            return;
        }

        let child = join_path(&self.segments, depth + 1);
        if !self.ctx.permissions.can_create(&self.subject, &parent) {
            *stage = Stage::Terminal;
            actions.push(Action::Fail(OperationError::PermissionDenied {
                detail: format!(
                    "user {} has no permission to create {child}",
                    self.subject.name
                ),
            }));
            return;
        }
        *stage = Stage::AwaitingDirectoryCreation {
            depth: depth + 1,
            uid: parent.uid,
            gid: parent.gid,
            mode: parent.mode,
        };
        actions.push(Action::Send(GridRequest::CreateDirectory {
            path: child,
            uid: parent.uid,
            gid: parent.gid,
            mode: parent.mode,
        }));
    }

    fn on_target_metadata(
        &self,
        stage: &mut Stage,
        actions: &mut Vec<Action>,
        m: MetadataReply,
    ) {
        if m.code.is_ok() {
            let entry = match m.entry {
                Some(entry) => entry,
                None => {
                    *stage = Stage::Terminal;
                    actions.push(Action::Fail(OperationError::Internal {
                        detail: format!("metadata reply without entry for {}", self.path),
                    }));
                    return;
                }
            };
            if entry.is_directory {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::InvalidPath {
                    detail: format!("{} is a directory", self.path),
                }));
                return;
            }
            if !self.options.overwrite {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::DuplicateExists));
                return;
            }
            *self.existing.lock() = Some(entry);
        } else if m.code == ReturnCode::NotFound {
            let name = &self.segments[self.segments.len() - 1];
            if name.len() > self.ctx.config.max_name_length {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::NameTooLong));
                return;
            }
        } else {
            *stage = Stage::Terminal;
            actions.push(Action::Fail(reply_error(
                m.code,
                m.error.as_deref(),
                &self.path,
            )));
            return;
        }

        let depth = self.segments.len() - 1;
        *stage = Stage::AwaitingParentMetadata { depth };
        actions.push(Action::AskParent { depth });
    }

    fn on_parent_metadata(
        &self,
        stage: &mut Stage,
        actions: &mut Vec<Action>,
        depth: usize,
        m: MetadataReply,
    ) {
        let level = join_path(&self.segments, depth);
        if m.code.is_ok() {
            match m.entry {
                Some(entry) if entry.is_directory => {
                    actions.push(Action::NotifyResolved {
                        path: level,
                        entry: entry.clone(),
                    });
                    self.continue_down(stage, actions, depth, entry);
                }
                Some(_) => {
                    *stage = Stage::Terminal;
                    actions.push(Action::Fail(OperationError::InvalidPath {
                        detail: format!("{level} is not a directory"),
                    }));
                }
                None => {
                    *stage = Stage::Terminal;
                    actions.push(Action::Fail(OperationError::Internal {
                        detail: format!("metadata reply without entry for {level}"),
                    }));
                }
            }
        } else if m.code == ReturnCode::NotFound {
            if !self.recursion_enabled() {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::InvalidPath {
                    detail: format!(
                        "{} or a component of its parent path does not exist",
                        self.path
                    ),
                }));
            } else if depth == 0 {
                // A namespace without a root answers for nothing.
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::PermissionDenied {
                    detail: "path does not exist and user has no permissions to create it"
                        .to_string(),
                }));
            } else {
                *stage = Stage::AwaitingParentMetadata { depth: depth - 1 };
                actions.push(Action::AskParent { depth: depth - 1 });
            }
        } else {
            *stage = Stage::Terminal;
            actions.push(Action::Fail(reply_error(m.code, m.error.as_deref(), &level)));
        }
    }

    fn on_directory_created(
        &self,
        stage: &mut Stage,
        actions: &mut Vec<Action>,
        depth: usize,
        uid: u32,
        gid: u32,
        mode: u32,
        c: CreateDirectoryReply,
    ) {
        let level = join_path(&self.segments, depth);
        if !c.code.is_ok() {
            *stage = Stage::Terminal;
            actions.push(Action::Fail(reply_error(c.code, c.error.as_deref(), &level)));
            return;
        }
        let file_id = match c.file_id {
            Some(file_id) => file_id,
            None => {
                *stage = Stage::Terminal;
                actions.push(Action::Fail(OperationError::Internal {
                    detail: format!("creation reply without file id for {level}"),
                }));
                return;
            }
        };
        let entry = EntryMetadata {
            file_id,
            is_directory: true,
            uid,
            gid,
            mode,
            size: 0,
            modified: SystemTime::now(),
        };
        actions.push(Action::NotifyResolved {
            path: level,
            entry: entry.clone(),
        });
        self.continue_down(stage, actions, depth, entry);
    }

    async fn execute(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(request) => self.send_namespace(request).await,
                Action::AskParent { depth } => {
                    let level = join_path(&self.segments, depth);
                    // Park before registering: the owner's outcome may be
                    // replayed the instant the waiter is attached to the
                    // ticket, and must find the stage already waiting.
                    let parked = {
                        let mut stage = self.stage.lock();
                        match &*stage {
                            Stage::AwaitingParentMetadata { depth: d } if *d == depth => {
                                *stage = Stage::PassivelyWaiting { depth };
                                true
                            }
                            _ => false,
                        }
                    };
                    if !parked {
                        continue;
                    }
                    if self
                        .ctx
                        .coordinator
                        .try_become_owner(&level, self.id, self.clone())
                    {
                        let resumed = {
                            let mut stage = self.stage.lock();
                            match &*stage {
                                Stage::PassivelyWaiting { depth: d } if *d == depth => {
                                    *stage = Stage::AwaitingParentMetadata { depth };
                                    true
                                }
                                _ => false,
                            }
                        };
                        if resumed {
                            self.send_namespace(GridRequest::GetMetadata { path: level }).await;
                        }
                    }
                }
                Action::NotifyResolved { path, entry } => {
                    self.ctx
                        .coordinator
                        .notify_outcome(&path, self.id, PathOutcome::Resolved(entry));
                }
                Action::Fail(error) => {
                    // Waiters behind this operation's own levels get the
                    // underlying failure; each of them adds its own tag.
                    let shared = match &error {
                        OperationError::AncestorFailed { source, .. } => (**source).clone(),
                        other => other.clone(),
                    };
                    self.ctx.coordinator.abandon(self.id, shared);
                    self.completion.complete(Err(error));
                }
                Action::Succeed(outcome) => {
                    self.completion.complete(Ok(outcome));
                }
            }
        }
    }
}

#[async_trait]
impl ReplyHandler for PutOperation {
    async fn deliver(self: Arc<Self>, correlation: CorrelationId, delivery: Delivery) {
        let reply = match delivery {
            Delivery::Reply(reply) => reply,
            Delivery::Exception(detail) => {
                return self.fail(OperationError::Communication { detail });
            }
            Delivery::Timeout => return self.fail(OperationError::Timeout),
        };

        self.ctx.coordinator.touch(self.id);

        let mut actions = Vec::new();
        {
            let mut stage = self.stage.lock();
            match (&*stage, reply) {
                (Stage::AwaitingTargetMetadata, GridReply::Metadata(m)) => {
                    self.on_target_metadata(&mut stage, &mut actions, m);
                }
                (Stage::AwaitingParentMetadata { depth }, GridReply::Metadata(m)) => {
                    let depth = *depth;
                    self.on_parent_metadata(&mut stage, &mut actions, depth, m);
                }
                (
                    Stage::AwaitingDirectoryCreation {
                        depth,
                        uid,
                        gid,
                        mode,
                    },
                    GridReply::DirectoryCreated(c),
                ) => {
                    let (depth, uid, gid, mode) = (*depth, *uid, *gid, *mode);
                    self.on_directory_created(&mut stage, &mut actions, depth, uid, gid, mode, c);
                }
                (stage, reply) => {
                    debug!(
                        %correlation,
                        %self.id,
                        path = %self.path,
                        stage = ?stage,
                        kind = reply.kind(),
                        "unexpected reply dropped"
                    );
                }
            }
        }
        self.execute(actions).await;
    }
}

#[async_trait]
impl PathWaiter for PutOperation {
    async fn path_outcome(self: Arc<Self>, path: String, outcome: PathOutcome) {
        let mut actions = Vec::new();
        {
            let mut stage = self.stage.lock();
            match (&*stage, outcome) {
                (Stage::PassivelyWaiting { depth }, PathOutcome::Resolved(entry))
                    if join_path(&self.segments, *depth) == path =>
                {
                    let depth = *depth;
                    self.continue_down(&mut stage, &mut actions, depth, entry);
                }
                (Stage::PassivelyWaiting { depth }, PathOutcome::Failed(error))
                    if join_path(&self.segments, *depth) == path =>
                {
                    *stage = Stage::Terminal;
                    actions.push(Action::Fail(error.for_waiter(&path)));
                }
                (stage, outcome) => {
                    debug!(
                        %self.id,
                        path,
                        stage = ?stage,
                        outcome = ?outcome,
                        "path outcome dropped"
                    );
                }
            }
        }
        self.execute(actions).await;
    }
}
