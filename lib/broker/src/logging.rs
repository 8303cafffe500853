// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup for the broker.
//!
//! Logging can take two forms: `READABLE` or `JSONL`. The default is
//! `READABLE`; `JSONL` is enabled by setting `GRIDWAY_LOG_JSONL=1`. Filters
//! are read from `GRIDWAY_LOG` with the usual `EnvFilter` syntax
//! (`gridway_broker=debug,info`); the default level is `info`.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global tracing subscriber. Idempotent; later calls are
/// no-ops, as is calling it when a subscriber is already installed (so
/// tests may call it freely).
pub fn init() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_env("GRIDWAY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
        let jsonl = std::env::var("GRIDWAY_LOG_JSONL")
            .map(|v| v == "1")
            .unwrap_or(false);

        if jsonl {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_current_span(false)
                .try_init();
        } else {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    });
}
