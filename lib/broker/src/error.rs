// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Typed failure taxonomy for broker operations.
//!
//! Every operation terminates with either a typed success or exactly one
//! [`OperationError`]. Domain failures (the collaborator answered non-zero)
//! map to a specific named variant; communication failures (substrate
//! exception or timeout) map to [`OperationError::Communication`] and
//! [`OperationError::Timeout`]. Protocol violations such as a reply for an
//! already-terminal operation never become errors at all; they are logged
//! and dropped by the state machines.

use serde::{Deserialize, Serialize};

/// Result alias used by every operation completion sink.
pub type OperationResult<T> = Result<T, OperationError>;

/// Terminal failure reasons reported through operation completions.
///
/// The outer request scheduler consumes these as values for control flow;
/// nothing is thrown past the orchestration boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum OperationError {
    /// The path or file does not exist.
    #[error("{path}: path or file not found")]
    NotFound { path: String },

    /// The subject is not allowed to perform the step.
    #[error("{detail}")]
    PermissionDenied { detail: String },

    /// A put found an existing target and overwrite is disabled.
    #[error("file exists")]
    DuplicateExists,

    /// The path is malformed or resolves to an entry of the wrong type.
    #[error("invalid path: {detail}")]
    InvalidPath { detail: String },

    /// The final path component exceeds the namespace limit.
    #[error("file name is too long")]
    NameTooLong,

    /// The messaging substrate reported an exception for an outbound message.
    #[error("communication failure: {detail}")]
    Communication { detail: String },

    /// An outbound message timed out without a reply.
    #[error("request timed out")]
    Timeout,

    /// A collaborator failed in a way that has no more specific mapping.
    #[error("internal error: {detail}")]
    Internal { detail: String },

    /// A shared-ancestor creation owned by another operation failed. The
    /// waiter receives the owner's outcome verbatim, tagged with the path so
    /// it can tell a shared failure apart from one of its own steps.
    #[error("creation of shared ancestor {path} failed: {source}")]
    AncestorFailed {
        path: String,
        #[source]
        source: Box<OperationError>,
    },
}

impl OperationError {
    /// Whether this failure came from the substrate rather than a
    /// collaborator's explicit answer. The outer scheduler uses this to
    /// decide whether a resubmit can help.
    pub fn is_communication(&self) -> bool {
        matches!(
            self,
            OperationError::Communication { .. } | OperationError::Timeout
        )
    }

    /// The failure a waiter should report when the owning operation's
    /// outcome for `path` was this error.
    pub(crate) fn for_waiter(&self, path: &str) -> OperationError {
        OperationError::AncestorFailed {
            path: path.to_string(),
            source: Box::new(self.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_matches_user_visible_strings() {
        assert_eq!(OperationError::DuplicateExists.to_string(), "file exists");
        assert_eq!(OperationError::NameTooLong.to_string(), "file name is too long");
        assert_eq!(OperationError::Timeout.to_string(), "request timed out");
        let e = OperationError::NotFound {
            path: "/data/f".into(),
        };
        assert_eq!(e.to_string(), "/data/f: path or file not found");
    }

    #[test]
    fn test_is_communication() {
        assert!(OperationError::Timeout.is_communication());
        assert!(OperationError::Communication {
            detail: "no route".into()
        }
        .is_communication());
        assert!(!OperationError::DuplicateExists.is_communication());
    }

    #[test]
    fn test_for_waiter_tags_the_path_and_keeps_the_source() {
        let owner = OperationError::Internal {
            detail: "directory creation failed".into(),
        };
        let waiter = owner.for_waiter("/data/shared");
        match waiter {
            OperationError::AncestorFailed { path, source } => {
                assert_eq!(path, "/data/shared");
                assert_eq!(*source, owner);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
