//! Request Handlers

pub mod agents;
pub mod cron;
pub mod health;
pub mod public;
pub mod tasks;
