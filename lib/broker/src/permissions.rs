// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Permission evaluation seam.
//!
//! The permission evaluator is an external collaborator; the core only
//! consumes this trait. [`UnixPermissions`] is the default implementation
//! using classic owner/group/other bits.

use crate::protocols::EntryMetadata;
use serde::{Deserialize, Serialize};

/// The identity an operation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

impl Subject {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Decisions the state machines need before mutating the namespace.
pub trait PermissionEvaluator: Send + Sync {
    /// May `subject` read the entry (pinning, staging)?
    fn can_read(&self, subject: &Subject, entry: &EntryMetadata) -> bool;

    /// May `subject` write a new or replaced entry into `directory`?
    fn can_write(&self, subject: &Subject, directory: &EntryMetadata) -> bool;

    /// May `subject` create a child directory under `directory`?
    fn can_create(&self, subject: &Subject, directory: &EntryMetadata) -> bool;

    /// May `subject` delete the entry?
    fn can_delete(&self, subject: &Subject, entry: &EntryMetadata) -> bool;
}

const READ: u32 = 0o4;
const WRITE: u32 = 0o2;
const EXEC: u32 = 0o1;

/// Owner/group/other permission bits, root bypasses everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixPermissions;

impl UnixPermissions {
    fn class_bits(subject: &Subject, entry: &EntryMetadata) -> u32 {
        let shift = if subject.uid == entry.uid {
            6
        } else if subject.gid == entry.gid {
            3
        } else {
            0
        };
        (entry.mode >> shift) & 0o7
    }

    fn has(subject: &Subject, entry: &EntryMetadata, wanted: u32) -> bool {
        subject.is_root() || Self::class_bits(subject, entry) & wanted == wanted
    }
}

impl PermissionEvaluator for UnixPermissions {
    fn can_read(&self, subject: &Subject, entry: &EntryMetadata) -> bool {
        Self::has(subject, entry, READ)
    }

    fn can_write(&self, subject: &Subject, directory: &EntryMetadata) -> bool {
        // Adding or replacing an entry mutates the directory itself.
        Self::has(subject, directory, WRITE | EXEC)
    }

    fn can_create(&self, subject: &Subject, directory: &EntryMetadata) -> bool {
        Self::has(subject, directory, WRITE | EXEC)
    }

    fn can_delete(&self, subject: &Subject, entry: &EntryMetadata) -> bool {
        subject.is_root() || subject.uid == entry.uid || Self::has(subject, entry, WRITE)
    }
}
