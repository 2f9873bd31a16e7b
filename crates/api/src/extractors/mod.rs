//! Custom Axum extractors.

pub mod api_key;

pub use api_key::{ApiKeyAuth, Permission, API_KEY_HEADER};
