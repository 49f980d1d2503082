// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! revision = "1.3"
//! registry_budget = "64M"
//! loop_timeout_ms = 2000
//! allow_unspecified_output = true
//! verbose = false
//!
//! [burst]
//! request_queue_bytes = 4096
//! result_queue_bytes = 4096
//! poll_window_us = 0
//! ```

use crate::ExecutorConfig;
use buffer_registry::MemoryBudget;
use nn_core::Revision;
use std::path::Path;
use std::time::Duration;

/// Upper bound on the cumulative time a single WHILE loop may run.
pub const MAX_LOOP_TIMEOUT_MS: u64 = 15_000;

/// Loop budget used when none is configured.
pub const DEFAULT_LOOP_TIMEOUT_MS: u64 = 2_000;

/// Configuration for a [`crate::Driver`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Interface revision models are validated against.
    #[serde(default)]
    pub revision: Revision,
    /// Byte ceiling for registry buffers (human-readable, e.g., `"64M"`),
    /// or `"unlimited"`.
    #[serde(default = "default_budget")]
    pub registry_budget: String,
    /// Cumulative WHILE loop budget in milliseconds.
    #[serde(default = "default_loop_timeout_ms")]
    pub loop_timeout_ms: u64,
    /// Whether request outputs may leave dimensions unspecified.
    #[serde(default = "default_true")]
    pub allow_unspecified_output: bool,
    /// Emit a trace event per executed operation.
    #[serde(default)]
    pub verbose: bool,
    /// Burst channel sizing.
    #[serde(default)]
    pub burst: BurstConfig,
}

/// Queue sizing and polling for burst channels.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BurstConfig {
    /// Capacity of the client→server queue in bytes.
    #[serde(default = "default_queue_bytes")]
    pub request_queue_bytes: usize,
    /// Capacity of the server→client queue in bytes.
    #[serde(default = "default_queue_bytes")]
    pub result_queue_bytes: usize,
    /// How long a reader spins before blocking, in microseconds.
    #[serde(default)]
    pub poll_window_us: u64,
}

fn default_true() -> bool {
    true
}

fn default_budget() -> String {
    "64M".to_string()
}

fn default_loop_timeout_ms() -> u64 {
    DEFAULT_LOOP_TIMEOUT_MS
}

fn default_queue_bytes() -> usize {
    4096
}

impl BurstConfig {
    pub fn poll_window(&self) -> Duration {
        Duration::from_micros(self.poll_window_us)
    }
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            request_queue_bytes: default_queue_bytes(),
            result_queue_bytes: default_queue_bytes(),
            poll_window_us: 0,
        }
    }
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::ConfigError(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML parse error: {e}"))
        })
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML serialise error: {e}"))
        })
    }

    /// Parses the registry budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<MemoryBudget, super::RuntimeError> {
        MemoryBudget::parse(&self.registry_budget)
            .map_err(|e| super::RuntimeError::ConfigError(format!("invalid budget: {e}")))
    }

    /// The WHILE loop budget, clamped to [`MAX_LOOP_TIMEOUT_MS`].
    pub fn loop_timeout(&self) -> Duration {
        Duration::from_millis(self.loop_timeout_ms.min(MAX_LOOP_TIMEOUT_MS))
    }

    /// Executor settings derived from this config.
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            loop_timeout: self.loop_timeout(),
            verbose: self.verbose,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            revision: Revision::LATEST,
            registry_budget: default_budget(),
            loop_timeout_ms: DEFAULT_LOOP_TIMEOUT_MS,
            allow_unspecified_output: true,
            verbose: false,
            burst: BurstConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let c = RuntimeConfig::default();
        assert_eq!(c.registry_budget, "64M");
        assert_eq!(c.revision, Revision::V1_3);
        assert_eq!(c.loop_timeout(), Duration::from_secs(2));
        assert!(c.allow_unspecified_output);
        assert!(!c.verbose);
    }

    #[test]
    fn test_parse_budget() {
        let c = RuntimeConfig {
            registry_budget: "256M".into(),
            ..Default::default()
        };
        let b = c.parse_budget().unwrap();
        assert_eq!(b.as_bytes(), 256 * 1024 * 1024);

        let bad = RuntimeConfig {
            registry_budget: "lots".into(),
            ..Default::default()
        };
        assert!(matches!(bad.parse_budget(), Err(crate::RuntimeError::ConfigError(_))));

        let open = RuntimeConfig {
            registry_budget: "unlimited".into(),
            ..Default::default()
        };
        assert_eq!(open.parse_budget().unwrap(), MemoryBudget::unlimited());
    }

    #[test]
    fn test_loop_timeout_clamped() {
        let c = RuntimeConfig {
            loop_timeout_ms: 60_000,
            ..Default::default()
        };
        assert_eq!(c.loop_timeout(), Duration::from_millis(MAX_LOOP_TIMEOUT_MS));
        assert_eq!(c.executor_config().loop_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
revision = "1.2"
registry_budget = "1G"
loop_timeout_ms = 500
allow_unspecified_output = false
verbose = true

[burst]
request_queue_bytes = 1024
poll_window_us = 50
"#;
        let c = RuntimeConfig::from_toml(toml).unwrap();
        assert_eq!(c.revision, Revision::V1_2);
        assert_eq!(c.registry_budget, "1G");
        assert_eq!(c.loop_timeout(), Duration::from_millis(500));
        assert!(!c.allow_unspecified_output);
        assert!(c.verbose);
        assert_eq!(c.burst.request_queue_bytes, 1024);
        assert_eq!(c.burst.result_queue_bytes, 4096);
        assert_eq!(c.burst.poll_window(), Duration::from_micros(50));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let c = RuntimeConfig::from_toml("").unwrap();
        assert_eq!(c.registry_budget, "64M");
        assert_eq!(c.loop_timeout_ms, DEFAULT_LOOP_TIMEOUT_MS);
        assert_eq!(c.burst, BurstConfig::default());
    }

    #[test]
    fn test_to_toml_roundtrip() {
        let c = RuntimeConfig {
            verbose: true,
            ..Default::default()
        };
        let toml = c.to_toml().unwrap();
        let back = RuntimeConfig::from_toml(&toml).unwrap();
        assert_eq!(back.registry_budget, c.registry_budget);
        assert_eq!(back.revision, c.revision);
        assert!(back.verbose);
    }

    #[test]
    fn test_bad_toml() {
        assert!(RuntimeConfig::from_toml("loop_timeout_ms = \"soon\"").is_err());
    }
}
