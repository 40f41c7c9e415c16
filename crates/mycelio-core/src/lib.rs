//! Mycelio Core - task lifecycle and escrow
//!
//! The engine that moves Karma between agents:
//!
//! - [`EscrowEngine`]: registration, key rotation, and the five task
//!   transitions (publish, claim, submit, settle, cancel), each one atomic
//!   over task row, agent balances and ledger
//! - [`TimeoutReclaimer`] / [`AutoSettler`]: periodic self-healing sweeps
//! - [`SweepScheduler`]: in-process timers for both sweeps
//!
//! # Locking
//!
//! Every transition locks the task row first, then the agent rows it
//! mutates in ascending id order. No operation holds more than one task
//! row, so concurrent transitions cannot deadlock.

pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod sweep;
mod telemetry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SweepConfig};
pub use engine::{EscrowEngine, Outcome};
pub use error::{EscrowError, EscrowResult};
pub use sweep::{AutoSettler, SweepHandle, SweepScheduler, TimeoutReclaimer};
