// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Shared harness for the integration tests: an in-memory namespace plus
//! canned pool, pin-manager, and space-manager collaborators, all attached
//! to a [`LocalGrid`].

#![allow(dead_code)]

use gridway_broker::protocols::{
    CacheLocationsReply, CreateDirectoryReply, DeleteReply, EntryMetadata, FileId, FlagReply,
    GridReply, GridRequest, MetadataReply, PersistencyReply, PinReply, ReserveSpaceReply,
    ReturnCode,
};
use gridway_broker::{Broker, BrokerConfig, Destination, LocalGrid, UnixPermissions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub fn dir_entry(uid: u32, gid: u32, mode: u32) -> EntryMetadata {
    EntryMetadata {
        file_id: FileId::random(),
        is_directory: true,
        uid,
        gid,
        mode,
        size: 0,
        modified: SystemTime::UNIX_EPOCH,
    }
}

pub fn file_entry(uid: u32, gid: u32, mode: u32) -> EntryMetadata {
    EntryMetadata {
        file_id: FileId::random(),
        is_directory: false,
        uid,
        gid,
        mode,
        size: 42,
        modified: SystemTime::UNIX_EPOCH,
    }
}

/// Short timeouts so failure paths resolve quickly under test.
pub fn fast_config() -> BrokerConfig {
    BrokerConfig {
        namespace_timeout: Duration::from_millis(200),
        pool_timeout: Duration::from_millis(200),
        pin_timeout: Duration::from_millis(200),
        space_timeout: Duration::from_millis(200),
        ..BrokerConfig::default()
    }
}

pub fn broker_on(grid: &Arc<LocalGrid>) -> Broker {
    gridway_broker::logging::init();
    Broker::new(grid.clone(), Arc::new(UnixPermissions), fast_config())
}

/// In-memory namespace collaborator.
pub struct TestNamespace {
    entries: Mutex<HashMap<String, EntryMetadata>>,
    locations: Mutex<HashMap<FileId, Vec<String>>>,
    flags: Mutex<Vec<(FileId, String, String)>>,
    requests: Mutex<Vec<GridRequest>>,
    fail_creates: AtomicBool,
}

impl TestNamespace {
    pub fn attach(grid: &LocalGrid) -> Arc<Self> {
        let ns = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            locations: Mutex::new(HashMap::new()),
            flags: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            fail_creates: AtomicBool::new(false),
        });
        let handler = ns.clone();
        grid.serve(Destination::Namespace, move |request| {
            handler.handle(request)
        });
        ns
    }

    pub fn insert(&self, path: &str, entry: EntryMetadata) {
        self.entries.lock().insert(path.to_string(), entry);
    }

    pub fn insert_with_replicas(&self, path: &str, entry: EntryMetadata, pools: &[&str]) {
        self.locations
            .lock()
            .insert(entry.file_id, pools.iter().map(|p| p.to_string()).collect());
        self.insert(path, entry);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn entry(&self, path: &str) -> Option<EntryMetadata> {
        self.entries.lock().get(path).cloned()
    }

    /// Every subsequent directory creation answers with an internal error.
    pub fn fail_creates(&self) {
        self.fail_creates.store(true, Ordering::SeqCst);
    }

    pub fn flags_for(&self, file_id: FileId) -> Vec<(String, String)> {
        self.flags
            .lock()
            .iter()
            .filter(|(id, _, _)| *id == file_id)
            .map(|(_, name, value)| (name.clone(), value.clone()))
            .collect()
    }

    /// How many creation requests were received for `path`.
    pub fn create_count(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| matches!(r, GridRequest::CreateDirectory { path: p, .. } if p == path))
            .count()
    }

    pub fn request_kinds(&self) -> Vec<&'static str> {
        self.requests.lock().iter().map(|r| r.kind()).collect()
    }

    fn handle(&self, request: GridRequest) -> Option<GridReply> {
        self.requests.lock().push(request.clone());
        match request {
            GridRequest::GetMetadata { path } => {
                let reply = match self.entries.lock().get(&path) {
                    Some(entry) => MetadataReply::found(entry.clone()),
                    None => MetadataReply::missing(format!("{path}: no such entry")),
                };
                Some(GridReply::Metadata(reply))
            }
            GridRequest::CreateDirectory {
                path,
                uid,
                gid,
                mode,
            } => {
                if self.fail_creates.load(Ordering::SeqCst) {
                    return Some(GridReply::DirectoryCreated(CreateDirectoryReply {
                        code: ReturnCode::Internal,
                        error: Some(format!("creation of {path} rejected")),
                        file_id: None,
                    }));
                }
                let entry = EntryMetadata {
                    file_id: FileId::random(),
                    is_directory: true,
                    uid,
                    gid,
                    mode,
                    size: 0,
                    modified: SystemTime::now(),
                };
                let file_id = entry.file_id;
                self.entries.lock().insert(path, entry);
                Some(GridReply::DirectoryCreated(CreateDirectoryReply {
                    code: ReturnCode::Ok,
                    error: None,
                    file_id: Some(file_id),
                }))
            }
            GridRequest::DeleteEntry { path } => {
                let code = if self.entries.lock().remove(&path).is_some() {
                    ReturnCode::Ok
                } else {
                    ReturnCode::NotFound
                };
                Some(GridReply::EntryDeleted(DeleteReply {
                    code,
                    error: None,
                }))
            }
            GridRequest::ListCacheLocations { file_id } => {
                let pools = self
                    .locations
                    .lock()
                    .get(&file_id)
                    .cloned()
                    .unwrap_or_default();
                Some(GridReply::CacheLocations(CacheLocationsReply {
                    code: ReturnCode::Ok,
                    error: None,
                    pools,
                }))
            }
            GridRequest::SetFlag {
                file_id,
                name,
                value,
            } => {
                self.flags.lock().push((file_id, name, value));
                Some(GridReply::FlagSet(FlagReply {
                    code: ReturnCode::Ok,
                    error: None,
                    prior: None,
                }))
            }
            // Requests the namespace does not own are parked so the sender
            // times out.
            _ => None,
        }
    }
}

/// Pools that demote whatever they are asked to; a pool listed in
/// `refusing` answers with an internal error instead.
pub fn serve_pools(grid: &LocalGrid, names: &[&str], refusing: &[&str]) {
    for name in names {
        let refuse = refusing.contains(name);
        grid.serve(Destination::Pool(name.to_string()), move |request| {
            match request {
                GridRequest::ModifyPersistency { pool, .. } => {
                    let (code, error) = if refuse {
                        (ReturnCode::Internal, Some(format!("{pool} refused")))
                    } else {
                        (ReturnCode::Ok, None)
                    };
                    Some(GridReply::PersistencyModified(PersistencyReply {
                        code,
                        error,
                        pool,
                    }))
                }
                _ => None,
            }
        });
    }
}

/// Pin manager granting sequential pin ids.
pub fn serve_pin_manager(grid: &LocalGrid) {
    let next_pin = AtomicU64::new(1);
    grid.serve(Destination::PinManager, move |request| match request {
        GridRequest::Pin { .. } => Some(GridReply::Pinned(PinReply {
            code: ReturnCode::Ok,
            error: None,
            pin_id: Some(next_pin.fetch_add(1, Ordering::SeqCst)),
        })),
        GridRequest::Unpin { key, .. } => {
            let pin_id = match key {
                gridway_broker::protocols::PinKey::Pin(id) => Some(id),
                gridway_broker::protocols::PinKey::Request(_) => None,
            };
            Some(GridReply::Unpinned(PinReply {
                code: ReturnCode::Ok,
                error: None,
                pin_id,
            }))
        }
        _ => None,
    });
}

/// Space manager granting every reservation at the requested size.
pub fn serve_space_manager(grid: &LocalGrid) {
    let next_token = AtomicU64::new(1);
    grid.serve(Destination::SpaceManager, move |request| match request {
        GridRequest::ReserveSpace { size, .. } => Some(GridReply::SpaceReserved(
            ReserveSpaceReply {
                code: ReturnCode::Ok,
                error: None,
                space_token: Some(format!("token-{}", next_token.fetch_add(1, Ordering::SeqCst))),
                granted: size,
            },
        )),
        _ => None,
    });
}
