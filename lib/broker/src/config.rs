// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Broker configuration.
//!
//! Defaults match the original deployment values (ten-minute namespace
//! timeout, 199-character name limit). Every field can be overridden from
//! the environment:
//!
//! - `GRIDWAY_NAMESPACE_TIMEOUT_MS`
//! - `GRIDWAY_POOL_TIMEOUT_MS`
//! - `GRIDWAY_PIN_TIMEOUT_MS`
//! - `GRIDWAY_SPACE_TIMEOUT_MS`
//! - `GRIDWAY_RECURSIVE_DIRS` (`0`/`false` to disable)
//! - `GRIDWAY_MAX_NAME_LENGTH`

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeouts and limits applied by the operation state machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Timeout for every message sent to the namespace service.
    pub namespace_timeout: Duration,
    /// Timeout for messages sent to individual pools and the pool manager.
    pub pool_timeout: Duration,
    /// Timeout for messages sent to the pin manager.
    pub pin_timeout: Duration,
    /// Timeout for messages sent to the space-reservation service.
    pub space_timeout: Duration,
    /// Default for whether a put may create missing ancestor directories.
    pub recursive_directory_creation: bool,
    /// Maximum length of the final path component.
    pub max_name_length: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace_timeout: Duration::from_secs(600),
            pool_timeout: Duration::from_secs(300),
            pin_timeout: Duration::from_secs(300),
            space_timeout: Duration::from_secs(300),
            recursive_directory_creation: true,
            max_name_length: 199,
        }
    }
}

impl BrokerConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            namespace_timeout: env_ms("GRIDWAY_NAMESPACE_TIMEOUT_MS", defaults.namespace_timeout),
            pool_timeout: env_ms("GRIDWAY_POOL_TIMEOUT_MS", defaults.pool_timeout),
            pin_timeout: env_ms("GRIDWAY_PIN_TIMEOUT_MS", defaults.pin_timeout),
            space_timeout: env_ms("GRIDWAY_SPACE_TIMEOUT_MS", defaults.space_timeout),
            recursive_directory_creation: env_bool(
                "GRIDWAY_RECURSIVE_DIRS",
                defaults.recursive_directory_creation,
            ),
            max_name_length: std::env::var("GRIDWAY_MAX_NAME_LENGTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_name_length),
        }
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"),
        Err(_) => default,
    }
}
