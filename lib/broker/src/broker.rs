// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Broker facade.
//!
//! One [`Broker`] per process wires the messaging substrate, the permission
//! evaluator, and the shared [`PathCoordinator`] into the operation state
//! machines. Every method returns as soon as the operation's first message
//! is on the wire; the outcome arrives through the caller's
//! [`Completion`] sink.

use crate::completion::Completion;
use crate::config::BrokerConfig;
use crate::coordinator::PathCoordinator;
use crate::messaging::Messenger;
use crate::ops::{
    DeleteOperation, DeleteOutcome, OpContext, PinOperation, PinOutcome, PutOperation,
    PutOptions, PutOutcome, RemoveOperation, RemoveOutcome, ReserveOperation, ReserveOutcome,
    UnpinOperation, UnpinOutcome,
};
use crate::permissions::{PermissionEvaluator, Subject};
use crate::protocols::{FileId, PinKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Entry point for every orchestrated operation.
pub struct Broker {
    ctx: Arc<OpContext>,
}

impl Broker {
    pub fn new(
        messenger: Arc<dyn Messenger>,
        permissions: Arc<dyn PermissionEvaluator>,
        config: BrokerConfig,
    ) -> Self {
        // An owner that has not touched its tickets for a full namespace
        // timeout cannot be waiting on anything anymore.
        let coordinator = PathCoordinator::new(config.namespace_timeout);
        info!(
            namespace_timeout_ms = config.namespace_timeout.as_millis() as u64,
            recursive = config.recursive_directory_creation,
            "broker up"
        );
        Self {
            ctx: Arc::new(OpContext {
                messenger,
                coordinator,
                permissions,
                config,
            }),
        }
    }

    /// The shared single-flight registry, exposed for admin inspection via
    /// [`PathCoordinator::dump`].
    pub fn coordinator(&self) -> &Arc<PathCoordinator> {
        &self.ctx.coordinator
    }

    /// Resolve the target of an upload, creating missing ancestor
    /// directories, and report the directory the file will land in.
    pub async fn prepare_to_put(
        &self,
        subject: Subject,
        path: String,
        options: PutOptions,
        completion: Arc<Completion<PutOutcome>>,
    ) {
        PutOperation::start(self.ctx.clone(), subject, path, options, completion).await;
    }

    /// Delete a single file by path.
    pub async fn delete_entry(
        &self,
        subject: Subject,
        path: String,
        completion: Arc<Completion<DeleteOutcome>>,
    ) {
        DeleteOperation::start(self.ctx.clone(), subject, path, completion).await;
    }

    /// Remove a file, demoting every replica and recording the deletion
    /// flag before the namespace entry goes away.
    pub async fn remove_file(
        &self,
        subject: Subject,
        path: String,
        completion: Arc<Completion<RemoveOutcome>>,
    ) {
        RemoveOperation::start(self.ctx.clone(), subject, path, completion).await;
    }

    /// Pin a file's replica online for `lifetime`.
    pub async fn pin_file(
        &self,
        subject: Subject,
        path: String,
        client_host: String,
        lifetime: Duration,
        completion: Arc<Completion<PinOutcome>>,
    ) {
        PinOperation::start(
            self.ctx.clone(),
            subject,
            path,
            client_host,
            lifetime,
            completion,
        )
        .await;
    }

    /// Release a pin by pin id or originating request id.
    pub async fn unpin_file(
        &self,
        file_id: FileId,
        key: PinKey,
        completion: Arc<Completion<UnpinOutcome>>,
    ) {
        UnpinOperation::start(self.ctx.clone(), file_id, key, completion).await;
    }

    /// Reserve `size` bytes for an upcoming transfer.
    pub async fn reserve_space(
        &self,
        subject: Subject,
        path: String,
        size: u64,
        client_host: String,
        lifetime: Duration,
        completion: Arc<Completion<ReserveOutcome>>,
    ) {
        ReserveOperation::start(
            self.ctx.clone(),
            subject,
            path,
            size,
            client_host,
            lifetime,
            completion,
        )
        .await;
    }
}
