// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Gridway Broker
//!
//! Asynchronous multi-step operation orchestrator for a storage-grid request
//! broker. Clients ask the broker to drive multi-phase operations against a
//! remote storage namespace and pool-management services reachable only
//! through an actor-style messaging substrate: a request is sent, and later
//! exactly one correlated reply, exception, or timeout comes back.
//!
//! The crate is organized around three pieces:
//!
//! - [`ops`]: per-operation state machines (put with directory creation,
//!   delete, remove with replica invalidation, pin/unpin, space reservation)
//!   that advance strictly forward and drop stale or duplicate replies.
//! - [`coordinator`]: a process-wide single-flight registry guaranteeing at
//!   most one in-flight directory creation per path, with every other
//!   interested operation attached as a waiter.
//! - [`fanin`]: per-operation fan-out/fan-in tracking for reply sets whose
//!   size is discovered at runtime (e.g. invalidating replicas on N pools).
//!
//! [`Broker`] wires these together over a [`messaging::Messenger`] substrate.

pub use anyhow::{Context as ErrorContext, Error, Result};

pub mod broker;
pub mod completion;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fanin;
pub mod logging;
pub mod messaging;
pub mod ops;
pub mod permissions;
pub mod protocols;

pub use broker::Broker;
pub use completion::Completion;
pub use config::BrokerConfig;
pub use coordinator::{OperationId, PathCoordinator, PathOutcome};
pub use error::{OperationError, OperationResult};
pub use fanin::{FanInSet, FanInStatus};
pub use messaging::{CorrelationId, Delivery, Destination, LocalGrid, Messenger, ReplyHandler};
pub use permissions::{PermissionEvaluator, Subject, UnixPermissions};
