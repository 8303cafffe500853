// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fan-out/fan-in synchronizer.
//!
//! One operation may need replies from a peer set whose size is only
//! discovered at runtime (one persistency demotion per cache location),
//! joined with independent sibling preconditions (the deletion flag). The
//! synchronizer, not the caller, detects the crossover: `Complete` is
//! returned exactly once, when the pending peer set is empty and every
//! precondition holds. Any peer failure latches the set failed immediately;
//! later replies are ignored. An empty peer set is legal and never
//! deadlocks — completion then rides on the preconditions alone.

use crate::error::OperationError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// What a fan-in event means for the owning operation.
#[derive(Debug, Clone, PartialEq)]
pub enum FanInStatus {
    /// Keep waiting; nothing to do.
    Pending,
    /// Every peer answered and every precondition holds. Returned exactly
    /// once per set.
    Complete,
    /// A peer failed; the parent fails now without waiting for the rest.
    Failed(OperationError),
}

#[derive(Debug, PartialEq)]
enum Phase {
    /// Preconditions may arrive, the peer set is not yet known.
    Idle,
    /// Peer set recorded, replies being collected.
    Collecting,
    /// Completed or failed; every further event is ignored.
    Latched,
}

struct Inner {
    pending: HashSet<String>,
    preconditions: HashMap<String, bool>,
    phase: Phase,
}

/// Tracks one operation's outstanding peer replies and preconditions.
pub struct FanInSet {
    inner: Mutex<Inner>,
}

impl FanInSet {
    /// Create a set whose completion additionally requires every named
    /// precondition to be reported via
    /// [`precondition_met`](FanInSet::precondition_met).
    pub fn new(preconditions: &[&str]) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: HashSet::new(),
                preconditions: preconditions
                    .iter()
                    .map(|name| (name.to_string(), false))
                    .collect(),
                phase: Phase::Idle,
            }),
        }
    }

    /// Record the expected peer set (may be empty) and start collecting.
    /// Returns `Complete` immediately if nothing is outstanding.
    pub fn begin(&self, expected: impl IntoIterator<Item = String>) -> FanInStatus {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Idle {
            debug!("fan-in begin on non-idle set ignored");
            return FanInStatus::Pending;
        }
        inner.pending = expected.into_iter().collect();
        inner.phase = Phase::Collecting;
        Self::crossover(&mut inner)
    }

    /// Record a peer's reply. Duplicate and unexpected peers are ignored.
    pub fn peer_reply(&self, peer: &str, outcome: Result<(), OperationError>) -> FanInStatus {
        let mut inner = self.inner.lock();
        if inner.phase != Phase::Collecting {
            debug!(peer, "peer reply outside collection ignored");
            return FanInStatus::Pending;
        }
        if !inner.pending.remove(peer) {
            debug!(peer, "reply from unexpected peer ignored");
            return FanInStatus::Pending;
        }
        match outcome {
            Ok(()) => Self::crossover(&mut inner),
            Err(error) => {
                inner.phase = Phase::Latched;
                FanInStatus::Failed(error)
            }
        }
    }

    /// Record an independent sibling precondition as satisfied.
    pub fn precondition_met(&self, name: &str) -> FanInStatus {
        let mut inner = self.inner.lock();
        if inner.phase == Phase::Latched {
            return FanInStatus::Pending;
        }
        match inner.preconditions.get_mut(name) {
            Some(flag) => *flag = true,
            None => {
                debug!(name, "unknown precondition ignored");
                return FanInStatus::Pending;
            }
        }
        if inner.phase == Phase::Idle {
            return FanInStatus::Pending;
        }
        Self::crossover(&mut inner)
    }

    fn crossover(inner: &mut Inner) -> FanInStatus {
        if inner.pending.is_empty() && inner.preconditions.values().all(|met| *met) {
            inner.phase = Phase::Latched;
            FanInStatus::Complete
        } else {
            FanInStatus::Pending
        }
    }
}
