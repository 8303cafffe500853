// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Single-flight path-creation coordinator.
//!
//! At most one operation at a time may interrogate or create a given
//! directory path. The first registrant becomes the owner and proceeds; any
//! later registrant becomes a waiter, sends nothing itself, and is replayed
//! the owner's outcome as if it had received the reply directly. Each depth
//! of an ancestor walk is single-flighted independently, so sibling uploads
//! sharing a missing ancestor create it exactly once while unrelated paths
//! proceed unimpeded.
//!
//! The registry lock guards only ownership acquisition, waiter registration,
//! and notify-and-remove; waiter notifications (and any messages they cause)
//! always happen after the lock is released.

use crate::error::OperationError;
use crate::protocols::EntryMetadata;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one operation instance, used to track ticket ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperationId(Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// The owner's outcome for a path, replayed verbatim to every waiter.
#[derive(Debug, Clone)]
pub enum PathOutcome {
    /// The path exists (or was just created) and is a directory.
    Resolved(EntryMetadata),
    /// Interrogation or creation of the path failed.
    Failed(OperationError),
}

/// Waiters attached to a ticket. The coordinator replays the owner's
/// outcome through this seam.
#[async_trait]
pub trait PathWaiter: Send + Sync {
    async fn path_outcome(self: Arc<Self>, path: String, outcome: PathOutcome);
}

struct Ticket {
    owner: OperationId,
    waiters: Vec<(OperationId, Arc<dyn PathWaiter>)>,
    last_activity: Instant,
}

/// Process-wide registry guaranteeing at most one in-flight creation per
/// path. Callers never touch the internal map; the whole surface is
/// [`try_become_owner`](PathCoordinator::try_become_owner),
/// [`notify_outcome`](PathCoordinator::notify_outcome),
/// [`touch`](PathCoordinator::touch) and
/// [`abandon`](PathCoordinator::abandon).
pub struct PathCoordinator {
    tickets: Mutex<HashMap<String, Ticket>>,
    /// An owner idle longer than this is considered wedged; the next
    /// registrant fails its tickets so waiters never hang behind it.
    stale_after: Duration,
}

impl PathCoordinator {
    pub fn new(stale_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            tickets: Mutex::new(HashMap::new()),
            stale_after,
        })
    }

    /// Atomically create a ticket for `path` and return `true`; or attach
    /// `op` as a waiter on the existing ticket and return `false`, in which
    /// case the caller must send nothing and wait for the replayed outcome.
    pub fn try_become_owner(
        &self,
        path: &str,
        op: OperationId,
        waiter: Arc<dyn PathWaiter>,
    ) -> bool {
        let stale_owner = {
            let mut tickets = self.tickets.lock();
            match tickets.get_mut(path) {
                None => {
                    tickets.insert(
                        path.to_string(),
                        Ticket {
                            owner: op,
                            waiters: Vec::new(),
                            last_activity: Instant::now(),
                        },
                    );
                    debug!(%op, path, "became path owner");
                    return true;
                }
                Some(ticket) => {
                    debug!(%op, path, owner = %ticket.owner, "waiting on existing owner");
                    ticket.waiters.push((op, waiter));
                    if ticket.last_activity.elapsed() > self.stale_after {
                        Some(ticket.owner)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(owner) = stale_owner {
            warn!(%owner, path, "path owner idle past timeout, failing its tickets");
            self.abandon(owner, OperationError::Timeout);
        }
        false
    }

    /// Record progress for every ticket `op` owns, resetting its staleness
    /// clock.
    pub fn touch(&self, op: OperationId) {
        let mut tickets = self.tickets.lock();
        for ticket in tickets.values_mut() {
            if ticket.owner == op {
                ticket.last_activity = Instant::now();
            }
        }
    }

    /// Remove the ticket for `path` and replay `outcome` to every waiter.
    /// Only the owner may deliver an outcome; a mismatched caller is logged
    /// and ignored.
    pub fn notify_outcome(&self, path: &str, op: OperationId, outcome: PathOutcome) {
        let waiters = {
            let mut tickets = self.tickets.lock();
            match tickets.get(path) {
                Some(ticket) if ticket.owner == op => {
                    tickets.remove(path).map(|t| t.waiters).unwrap_or_default()
                }
                Some(ticket) => {
                    warn!(
                        %op, path, owner = %ticket.owner,
                        "outcome from non-owner ignored"
                    );
                    return;
                }
                None => {
                    debug!(%op, path, "outcome for unknown ticket ignored");
                    return;
                }
            }
        };
        self.fan_out(path, waiters, outcome);
    }

    /// Release every ticket `op` owns, replaying `error` to the attached
    /// waiters, and detach `op` from any ticket it waits on. Called when an
    /// operation fails for reasons unrelated to the shared path (timeout,
    /// substrate exception) so nobody hangs behind it.
    pub fn abandon(&self, op: OperationId, error: OperationError) {
        let mut owned = Vec::new();
        {
            let mut tickets = self.tickets.lock();
            let paths: Vec<String> = tickets
                .iter()
                .filter(|(_, t)| t.owner == op)
                .map(|(p, _)| p.clone())
                .collect();
            for path in paths {
                if let Some(ticket) = tickets.remove(&path) {
                    owned.push((path, ticket.waiters));
                }
            }
            for ticket in tickets.values_mut() {
                ticket.waiters.retain(|(id, _)| *id != op);
            }
        }
        for (path, waiters) in owned {
            let outcome = PathOutcome::Failed(error.clone());
            self.fan_out(&path, waiters, outcome);
        }
    }

    fn fan_out(
        &self,
        path: &str,
        waiters: Vec<(OperationId, Arc<dyn PathWaiter>)>,
        outcome: PathOutcome,
    ) {
        for (id, waiter) in waiters {
            debug!(%id, path, "replaying path outcome to waiter");
            let path = path.to_string();
            let outcome = outcome.clone();
            tokio::spawn(async move {
                waiter.path_outcome(path, outcome).await;
            });
        }
    }

    /// Admin-facing listing of in-flight path creations.
    pub fn dump(&self) -> String {
        let tickets = self.tickets.lock();
        let mut out = String::new();
        for (path, ticket) in tickets.iter() {
            let _ = writeln!(
                out,
                "{path} owner={} waiters={} idle={}ms",
                ticket.owner,
                ticket.waiters.len(),
                ticket.last_activity.elapsed().as_millis()
            );
        }
        out
    }

    #[cfg(test)]
    fn ticket_count(&self) -> usize {
        self.tickets.lock().len()
    }
}
