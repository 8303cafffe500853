// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Correlation identifiers.
//!
//! The counter lives inside the messenger implementation — one per
//! substrate, never one per orchestrator — so ids stay unique across every
//! operation sharing the substrate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Matches an asynchronous reply back to the request that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(u64);

impl CorrelationId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c:{}", self.0)
    }
}

/// Monotonically increasing id source owned by a messenger.
#[derive(Debug)]
pub(crate) struct CorrelationCounter(AtomicU64);

impl CorrelationCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> CorrelationId {
        CorrelationId(self.0.fetch_add(1, Ordering::Relaxed))
    }
}
