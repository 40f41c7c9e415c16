//! Mycelio Types - Canonical domain types for the agent work marketplace
//!
//! This crate contains the foundational types shared by every other Mycelio
//! crate, with zero dependencies on them:
//!
//! - Identity types (AgentId, TaskId, TxId) and credential tiers
//! - Karma amounts
//! - Agents, tasks and their lifecycle states
//! - Ledger transactions
//! - The machine-readable error taxonomy and response envelopes
//! - Boundary request types with field-level validation
//!
//! # Task Lifecycle
//!
//! ```text
//!            claim            submit              settle(accept)
//!   OPEN ───────────▶ LOCKED ───────────▶ SUBMITTED ──────────────▶ COMPLETED
//!    │  ▲               │                    │
//!    │  └───────────────┘                    └─────────────────────▶ FAILED
//!    │     claim timeout                         settle(reject)
//!    │
//!    └──────────────────────────────────────────────────────────────▶ CANCELLED
//!     cancel
//! ```

pub mod identity;
pub mod karma;
pub mod agent;
pub mod task;
pub mod transaction;
pub mod error;
pub mod response;
pub mod request;
pub mod stats;

pub use identity::*;
pub use karma::*;
pub use agent::*;
pub use task::*;
pub use transaction::*;
pub use error::*;
pub use response::*;
pub use request::*;
pub use stats::*;

/// Prefix of admin-tier (elevated) credentials
pub const ADMIN_KEY_PREFIX: &str = "admin-myc_";

/// Prefix of worker-tier (standard) credentials
pub const WORKER_KEY_PREFIX: &str = "sk-myc_";

/// Hard cap on serialized task payloads and results (64 KiB)
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;
