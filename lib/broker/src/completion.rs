// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-shot outcome sink.
//!
//! Every operation carries exactly one [`Completion`]; the terminal
//! transition fires it exactly once. Late duplicate completions (a timeout
//! racing a reply, a stale coordinator notification) return `false` and are
//! dropped. The outer scheduler cancels simply by dropping the receiving
//! side; an operation completing into a dropped receiver is a no-op.

use crate::error::OperationResult;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;

type Sink<T> = Box<dyn FnOnce(OperationResult<T>) + Send>;

/// A one-shot sink for an operation's terminal outcome.
pub struct Completion<T> {
    sink: Mutex<Option<Sink<T>>>,
}

impl<T: Send + 'static> Completion<T> {
    /// Wrap an arbitrary callback. It runs at most once.
    pub fn new(sink: impl FnOnce(OperationResult<T>) + Send + 'static) -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(Some(Box::new(sink))),
        })
    }

    /// A completion paired with a receiver for callers that await the
    /// outcome instead of registering a callback.
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<OperationResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let completion = Self::new(move |result| {
            // Receiver dropped means the caller lost interest; nothing to do.
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    /// Fire the sink. Returns `false` if it already fired, in which case
    /// `result` is discarded.
    pub fn complete(&self, result: OperationResult<T>) -> bool {
        match self.sink.lock().take() {
            Some(sink) => {
                sink(result);
                true
            }
            None => false,
        }
    }

    /// Whether the terminal outcome has already been delivered.
    pub fn is_fired(&self) -> bool {
        self.sink.lock().is_none()
    }
}
