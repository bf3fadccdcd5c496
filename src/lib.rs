//! Quarry - resilient persistence layer for collaborative document analysis.
//!
//! Quarry turns an unreliable connection to a relational store into a
//! dependable substrate: a bounded connection pool with classification-aware
//! retry, atomic multi-statement transactions, audit-grade change versioning
//! for templates, immutable point-in-time run snapshots, and a tiered
//! authorization resolver.
//!
//! The crate is a library; the UI panels, upload widgets, export rendering,
//! and analysis clients that consume it live elsewhere.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::DbConfig;
pub use db::Database;
pub use error::{QuarryError, Result};
