//! Mycelio Database Layer
//!
//! Persistence for agents (identity and balances), tasks and the Karma ledger.
//!
//! # Architecture
//!
//! - **[`Store`]**: unlocked reads plus [`StoreTx`] units of work with
//!   exclusive row locks
//! - **[`PgStore`]**: PostgreSQL via `sqlx`, `SELECT ... FOR UPDATE` inside one
//!   database transaction per unit of work
//! - **[`MemoryStore`]**: in-process rows behind per-row async mutexes, for
//!   tests and single-node development

pub mod config;
pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use memory::{MemoryStore, MemoryTx};
pub use models::*;
pub use postgres::{PgStore, PgTx};
pub use store::{Store, StoreTx, MAX_PREFIX_CANDIDATES};
