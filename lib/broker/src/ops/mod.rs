// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Operation state machines.
//!
//! Each operation is one instance of a finite state machine advancing
//! strictly forward through its protocol stages. A delivered message is
//! checked against the instance's current stage; mismatches — a reply of an
//! unexpected kind, or anything arriving after the terminal stage — are
//! logged and dropped, never surfaced to the caller. Exceptions and
//! timeouts force the failed terminal stage, and the completion sink fires
//! exactly once per instance no matter what arrives afterwards.
//!
//! Stage state lives behind a short `parking_lot::Mutex` section: each
//! delivery reads, matches, and writes the stage atomically, then performs
//! any follow-up sends after the lock is released. Because message N+1 is
//! only sent once message N's reply was consumed, transitions for one
//! instance are totally ordered; across instances there is no ordering.

pub mod delete;
pub mod pin;
pub mod put;
pub mod remove;
pub mod reserve;

pub use delete::{DeleteOperation, DeleteOutcome};
pub use pin::{PinOperation, PinOutcome, UnpinOperation, UnpinOutcome};
pub use put::{PutOperation, PutOptions, PutOutcome};
pub use remove::{RemoveOperation, RemoveOutcome};
pub use reserve::{ReserveOperation, ReserveOutcome};

use crate::config::BrokerConfig;
use crate::coordinator::PathCoordinator;
use crate::error::OperationError;
use crate::messaging::Messenger;
use crate::permissions::PermissionEvaluator;
use crate::protocols::ReturnCode;
use std::sync::Arc;

/// Everything an operation needs from its surroundings.
pub(crate) struct OpContext {
    pub messenger: Arc<dyn Messenger>,
    pub coordinator: Arc<PathCoordinator>,
    pub permissions: Arc<dyn PermissionEvaluator>,
    pub config: BrokerConfig,
}

/// Split an absolute path into its segments, rejecting malformed input
/// before anything is sent.
pub(crate) fn split_path(path: &str) -> Result<Vec<String>, OperationError> {
    if !path.starts_with('/') {
        return Err(OperationError::InvalidPath {
            detail: format!("{path} is not absolute"),
        });
    }
    let segments: Vec<String> = path
        .split('/')
        .skip(1)
        .map(str::to_string)
        .collect();
    if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(OperationError::InvalidPath {
            detail: format!("{path} contains empty or relative components"),
        });
    }
    Ok(segments)
}

/// Rebuild the path of the first `depth` segments; depth 0 is the root.
pub(crate) fn join_path(segments: &[String], depth: usize) -> String {
    if depth == 0 {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in &segments[..depth] {
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Map a collaborator's non-zero answer to the typed failure it stands for.
pub(crate) fn reply_error(code: ReturnCode, error: Option<&str>, path: &str) -> OperationError {
    let detail = |fallback: String| error.map(str::to_string).unwrap_or(fallback);
    match code {
        ReturnCode::Ok => OperationError::Internal {
            detail: format!("collaborator answered ok where a failure was mapped: {path}"),
        },
        ReturnCode::NotFound => OperationError::NotFound {
            path: path.to_string(),
        },
        ReturnCode::PermissionDenied => OperationError::PermissionDenied {
            detail: detail(format!("permission denied for {path}")),
        },
        ReturnCode::Exists => OperationError::DuplicateExists,
        ReturnCode::NotDirectory | ReturnCode::InvalidPath => OperationError::InvalidPath {
            detail: detail(format!("invalid path {path}")),
        },
        ReturnCode::Internal => OperationError::Internal {
            detail: detail(format!("collaborator failure on {path}")),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(
            split_path("/a/b/c").unwrap(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_path("relative/path").is_err());
        assert!(split_path("/a//b").is_err());
        assert!(split_path("/a/../b").is_err());
        assert!(split_path("/").is_err());
    }

    #[test]
    fn test_join_path() {
        let segments = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(join_path(&segments, 0), "/");
        assert_eq!(join_path(&segments, 1), "/a");
        assert_eq!(join_path(&segments, 3), "/a/b/c");
    }

    #[test]
    fn test_reply_error_mapping() {
        assert_eq!(
            reply_error(ReturnCode::Exists, None, "/x"),
            OperationError::DuplicateExists
        );
        assert!(matches!(
            reply_error(ReturnCode::NotFound, None, "/x"),
            OperationError::NotFound { .. }
        ));
        assert!(matches!(
            reply_error(ReturnCode::NotDirectory, Some("/x is a file"), "/x"),
            OperationError::InvalidPath { .. }
        ));
    }
}
