//! Shared utilities and common types for the compliance orchestrator.
//!
//! This crate provides common functionality used across all other crates:
//! - Hashing utilities (API key digests, backup checksums)
//! - Offset pagination helpers
//! - Common validation logic

pub mod crypto;
pub mod pagination;
pub mod validation;
