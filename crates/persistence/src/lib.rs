//! Persistence layer for the compliance orchestrator.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Postgres implementations of the domain repository traits
//! - Query metrics

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
