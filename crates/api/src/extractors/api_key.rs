//! API key authentication extractor.
//!
//! Keys are presented as `Authorization: Bearer co_...` (or `X-API-Key`) and
//! checked against the SHA-256 digests listed in `[security.api_keys]`.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Deserialize;

use crate::app::AppState;
use crate::config::ApiKeyConfig;
use crate::error::ApiError;
use shared::crypto::{digest_eq, extract_key_prefix, sha256_hex, API_KEY_PREFIX};

/// Header accepted as an alternative to a bearer token.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Operations a key may be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Permission {
    #[serde(rename = "assessment:read")]
    AssessmentRead,
    #[serde(rename = "assessment:write")]
    AssessmentWrite,
    #[serde(rename = "remediation:propose")]
    RemediationPropose,
    #[serde(rename = "remediation:approve")]
    RemediationApprove,
    #[serde(rename = "audit:read")]
    AuditRead,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AssessmentRead => "assessment:read",
            Permission::AssessmentWrite => "assessment:write",
            Permission::RemediationPropose => "remediation:propose",
            Permission::RemediationApprove => "remediation:approve",
            Permission::AuditRead => "audit:read",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated API key information.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    /// Configured key name, used as the audit actor.
    pub name: String,
    /// Key prefix for identification in logs.
    pub key_prefix: String,
    pub permissions: Vec<Permission>,
}

impl ApiKeyAuth {
    /// Validates a raw key against the configured digests.
    pub fn validate(keys: &[ApiKeyConfig], api_key: &str) -> Result<Self, ApiError> {
        let key_prefix = extract_key_prefix(api_key)
            .ok_or_else(|| ApiError::Unauthorized("Invalid or missing API key".to_string()))?;

        let key_hash = sha256_hex(api_key);
        let key = keys
            .iter()
            .find(|k| digest_eq(&k.key_hash.to_ascii_lowercase(), &key_hash))
            .ok_or_else(|| {
                tracing::warn!(key_prefix, "Rejected unknown API key");
                ApiError::Unauthorized("Invalid or missing API key".to_string())
            })?;

        Ok(ApiKeyAuth {
            name: key.name.clone(),
            key_prefix: format!("{}{}", API_KEY_PREFIX, key_prefix),
            permissions: key.permissions.clone(),
        })
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    /// `Forbidden` unless the key carries `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if self.has_permission(permission) {
            Ok(())
        } else {
            tracing::warn!(
                key = %self.name,
                permission = %permission,
                "API key lacks permission"
            );
            Err(ApiError::Forbidden(format!(
                "API key '{}' lacks permission {}",
                self.name, permission
            )))
        }
    }

    /// Name recorded in audit entries.
    pub fn actor(&self) -> &str {
        &self.name
    }

    /// Reads the raw key from the bearer header, falling back to `X-API-Key`.
    pub(crate) async fn raw_key(parts: &mut Parts) -> Option<String> {
        if let Ok(TypedHeader(Authorization(bearer))) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, &()).await
        {
            return Some(bearer.token().to_string());
        }
        parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Already validated by the auth middleware.
        if let Some(auth) = parts.extensions.get::<ApiKeyAuth>() {
            return Ok(auth.clone());
        }

        let api_key = Self::raw_key(parts)
            .await
            .ok_or_else(|| ApiError::Unauthorized("Invalid or missing API key".to_string()))?;

        Self::validate(&state.config.security.api_keys, &api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "co_abcdefgh12345678";

    fn keys() -> Vec<ApiKeyConfig> {
        vec![ApiKeyConfig {
            name: "ops".to_string(),
            key_hash: sha256_hex(KEY),
            permissions: vec![Permission::AssessmentRead, Permission::AuditRead],
        }]
    }

    #[test]
    fn test_validate_known_key() {
        let auth = ApiKeyAuth::validate(&keys(), KEY).unwrap();
        assert_eq!(auth.actor(), "ops");
        assert_eq!(auth.key_prefix, "co_abcdefgh");
        assert!(auth.has_permission(Permission::AuditRead));
    }

    #[test]
    fn test_validate_unknown_key() {
        let result = ApiKeyAuth::validate(&keys(), "co_zzzzzzzz00000000");
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_validate_wrong_prefix() {
        let result = ApiKeyAuth::validate(&keys(), "pm_abcdefgh12345678");
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn test_require_missing_permission() {
        let auth = ApiKeyAuth::validate(&keys(), KEY).unwrap();
        assert!(auth.require(Permission::AssessmentRead).is_ok());
        assert!(matches!(
            auth.require(Permission::RemediationApprove),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn test_permission_deserialize() {
        let permissions: Vec<Permission> =
            serde_json::from_str(r#"["assessment:write", "remediation:approve"]"#).unwrap();
        assert_eq!(
            permissions,
            vec![Permission::AssessmentWrite, Permission::RemediationApprove]
        );
        assert_eq!(Permission::AuditRead.to_string(), "audit:read");
    }
}
