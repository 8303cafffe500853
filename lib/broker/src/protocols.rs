// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Collaborator payload shapes.
//!
//! These are the semantic request/reply shapes the orchestration core
//! exchanges with the namespace service, pool manager, individual pools, the
//! pin manager, and the space-reservation service. Wire encoding is owned by
//! the substrate and out of scope here.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Opaque identifier the namespace assigns to every entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId(Uuid);

impl FileId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Answer code carried by every collaborator reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    Ok,
    NotFound,
    PermissionDenied,
    Exists,
    NotDirectory,
    InvalidPath,
    Internal,
}

impl ReturnCode {
    pub fn is_ok(self) -> bool {
        matches!(self, ReturnCode::Ok)
    }
}

/// Metadata for a namespace entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub file_id: FileId,
    pub is_directory: bool,
    pub uid: u32,
    pub gid: u32,
    /// Unix permission bits, e.g. `0o755`.
    pub mode: u32,
    pub size: u64,
    pub modified: SystemTime,
}

/// Key under which a pin can be released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinKey {
    /// The pin id returned when the pin was granted.
    Pin(u64),
    /// The request id of the originating client request.
    Request(u64),
}

/// Requests the core sends to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridRequest {
    GetMetadata {
        path: String,
    },
    CreateDirectory {
        path: String,
        uid: u32,
        gid: u32,
        mode: u32,
    },
    DeleteEntry {
        path: String,
    },
    ListCacheLocations {
        file_id: FileId,
    },
    ModifyPersistency {
        pool: String,
        file_id: FileId,
        precious: bool,
    },
    SetFlag {
        file_id: FileId,
        name: String,
        value: String,
    },
    Pin {
        file_id: FileId,
        client_host: String,
        lifetime: Duration,
    },
    Unpin {
        file_id: FileId,
        key: PinKey,
    },
    ReserveSpace {
        uid: u32,
        gid: u32,
        path: String,
        size: u64,
        client_host: String,
        lifetime: Duration,
    },
}

impl GridRequest {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GridRequest::GetMetadata { .. } => "GetMetadata",
            GridRequest::CreateDirectory { .. } => "CreateDirectory",
            GridRequest::DeleteEntry { .. } => "DeleteEntry",
            GridRequest::ListCacheLocations { .. } => "ListCacheLocations",
            GridRequest::ModifyPersistency { .. } => "ModifyPersistency",
            GridRequest::SetFlag { .. } => "SetFlag",
            GridRequest::Pin { .. } => "Pin",
            GridRequest::Unpin { .. } => "Unpin",
            GridRequest::ReserveSpace { .. } => "ReserveSpace",
        }
    }
}

/// Correlated replies delivered back by the substrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GridReply {
    Metadata(MetadataReply),
    DirectoryCreated(CreateDirectoryReply),
    EntryDeleted(DeleteReply),
    CacheLocations(CacheLocationsReply),
    PersistencyModified(PersistencyReply),
    FlagSet(FlagReply),
    Pinned(PinReply),
    Unpinned(PinReply),
    SpaceReserved(ReserveSpaceReply),
}

impl GridReply {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            GridReply::Metadata(_) => "Metadata",
            GridReply::DirectoryCreated(_) => "DirectoryCreated",
            GridReply::EntryDeleted(_) => "EntryDeleted",
            GridReply::CacheLocations(_) => "CacheLocations",
            GridReply::PersistencyModified(_) => "PersistencyModified",
            GridReply::FlagSet(_) => "FlagSet",
            GridReply::Pinned(_) => "Pinned",
            GridReply::Unpinned(_) => "Unpinned",
            GridReply::SpaceReserved(_) => "SpaceReserved",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub entry: Option<EntryMetadata>,
}

impl MetadataReply {
    pub fn found(entry: EntryMetadata) -> Self {
        Self {
            code: ReturnCode::Ok,
            error: None,
            entry: Some(entry),
        }
    }

    pub fn missing(detail: impl Into<String>) -> Self {
        Self {
            code: ReturnCode::NotFound,
            error: Some(detail.into()),
            entry: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateDirectoryReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub file_id: Option<FileId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteReply {
    pub code: ReturnCode,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheLocationsReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub pools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistencyReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub pool: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub prior: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub pin_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReserveSpaceReply {
    pub code: ReturnCode,
    pub error: Option<String>,
    pub space_token: Option<String>,
    pub granted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_return_code_is_ok() {
        assert!(ReturnCode::Ok.is_ok());
        assert!(!ReturnCode::NotFound.is_ok());
    }

    #[test]
    fn test_request_kind_names() {
        let req = GridRequest::GetMetadata {
            path: "/a".into(),
        };
        assert_eq!(req.kind(), "GetMetadata");
        let req = GridRequest::ModifyPersistency {
            pool: "pool-a".into(),
            file_id: FileId::random(),
            precious: false,
        };
        assert_eq!(req.kind(), "ModifyPersistency");
    }

    #[test]
    fn test_metadata_reply_helpers() {
        let missing = MetadataReply::missing("no such entry");
        assert_eq!(missing.code, ReturnCode::NotFound);
        assert!(missing.entry.is_none());
    }
}
