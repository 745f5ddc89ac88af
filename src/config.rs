//! Configuration module
//!
//! TOML-backed configuration with full defaults; every section may be
//! omitted.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::application::conflict::sweep::SweepConfig;
use crate::application::transaction::TransactionOptions;
use crate::domain::{CoreError, CoreResult};
use crate::infrastructure::storage::IsolationLevel;

/// Defaults for coordinator invocations
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub isolation: IsolationLevel,
    pub max_retries: u32,
    pub retry_delay_base_ms: u64,
    pub timeout_ms: u64,
    pub enable_logging: bool,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        let options = TransactionOptions::default();
        Self {
            isolation: options.isolation,
            max_retries: options.max_retries,
            retry_delay_base_ms: options.retry_delay_base.as_millis() as u64,
            timeout_ms: options.timeout.as_millis() as u64,
            enable_logging: options.enable_logging,
        }
    }
}

impl TransactionConfig {
    pub fn to_options(&self) -> TransactionOptions {
        TransactionOptions {
            isolation: self.isolation,
            max_retries: self.max_retries,
            retry_delay_base: Duration::from_millis(self.retry_delay_base_ms),
            timeout: Duration::from_millis(self.timeout_ms),
            enable_logging: self.enable_logging,
        }
    }
}

/// Override-store eviction settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    /// TTL applied to entries flagged without an explicit one; absent
    /// means entries live until cleared.
    pub ttl_secs: Option<u64>,
}

impl OverrideConfig {
    pub fn ttl(&self) -> Option<chrono::Duration> {
        self.ttl_secs
            .map(|secs| chrono::Duration::seconds(secs as i64))
    }
}

/// Top-level booking-core configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub transaction: TransactionConfig,
    pub sweep: SweepConfig,
    pub overrides: OverrideConfig,
}

impl CoreConfig {
    pub fn from_toml_str(raw: &str) -> CoreResult<Self> {
        toml::from_str(raw).map_err(|err| CoreError::Validation(format!("invalid config: {err}")))
    }

    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|err| {
            CoreError::Validation(format!(
                "cannot read config {}: {err}",
                path.as_ref().display()
            ))
        })?;
        Self::from_toml_str(&raw)
    }
}

// ── Tests ──────────────────────────────────────────────────────
