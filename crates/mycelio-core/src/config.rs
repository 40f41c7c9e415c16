//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use mycelio_types::MAX_PAYLOAD_BYTES;

/// Escrow engine and sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Karma credited on registration
    pub initial_grant: u64,
    /// Smallest accepted bounty
    pub min_bounty: u64,
    /// Largest accepted bounty
    pub max_bounty: u64,
    /// Time a solver has to submit after claiming
    #[serde(with = "humantime_serde")]
    pub claim_window: Duration,
    /// Time a publisher has to settle after submission
    #[serde(with = "humantime_serde")]
    pub settle_window: Duration,
    /// Serialized size cap for task payloads and results
    pub max_payload_bytes: usize,
    /// Settle expired submissions as accepted
    pub auto_settle_enabled: bool,
    /// Sweep configuration
    pub sweep: SweepConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_grant: 100,
            min_bounty: 10,
            max_bounty: 1_000_000,
            claim_window: Duration::from_secs(5 * 60),
            settle_window: Duration::from_secs(24 * 60 * 60),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            auto_settle_enabled: true,
            sweep: SweepConfig::default(),
        }
    }
}

/// Background sweep timers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Run sweeps in-process (disable when an external scheduler triggers them)
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub reclaim_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub auto_settle_interval: Duration,
    /// Tasks handled per sweep
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reclaim_interval: Duration::from_secs(30),
            auto_settle_interval: Duration::from_secs(60 * 60),
            batch_size: 100,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.initial_grant == 0 {
            errors.push("Initial grant must be positive".to_string());
        }
        if self.min_bounty == 0 {
            errors.push("Minimum bounty must be positive".to_string());
        }
        if self.max_bounty < self.min_bounty {
            errors.push("Maximum bounty must not be below the minimum".to_string());
        }
        if i64::try_from(self.max_bounty).is_err() || i64::try_from(self.initial_grant).is_err() {
            errors.push("Karma amounts must fit a signed 64-bit ledger entry".to_string());
        }
        if self.claim_window.is_zero() || self.settle_window.is_zero() {
            errors.push("Claim and settle windows must be non-zero".to_string());
        }
        if chrono::Duration::from_std(self.claim_window).is_err()
            || chrono::Duration::from_std(self.settle_window).is_err()
        {
            errors.push("Claim and settle windows are out of range".to_string());
        }
        if self.max_payload_bytes == 0 {
            errors.push("Payload cap must be positive".to_string());
        }
        if self.sweep.batch_size == 0 {
            errors.push("Sweep batch size must be positive".to_string());
        }
        if self.sweep.reclaim_interval.is_zero() || self.sweep.auto_settle_interval.is_zero() {
            errors.push("Sweep intervals must be non-zero".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
