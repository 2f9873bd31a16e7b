//! Domain layer for the compliance orchestrator.
//!
//! This crate contains:
//! - Domain models (Assessment, ConfigurationIssue, RemediationAction, ExecutionResult)
//! - Repository traits and in-memory implementations
//! - Business logic services (assessment store, rule engine, circuit breaker)

pub mod models;
pub mod repositories;
pub mod services;
