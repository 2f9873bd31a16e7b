//! Audit logging service for assessment and remediation workflows.
//!
//! Every state change the orchestrator makes goes through [`AuditLogger`], so the
//! trail in `audit_logs` is the single record of who did what.

use serde_json::json;
use std::sync::Arc;

use crate::models::{AuditAction, AuditLogEntry, AuditResult, NewAuditLogEntry, SYSTEM_ACTOR};
use crate::repositories::{AuditLogRepository, RepoResult};

/// Builder for audit entries with a fluent API.
#[derive(Debug, Clone)]
pub struct AuditLogBuilder {
    action: AuditAction,
    actor: String,
    target: String,
    result: AuditResult,
    details: serde_json::Map<String, serde_json::Value>,
}

impl AuditLogBuilder {
    /// An action performed by a named caller (API key name, operator).
    pub fn actor_action(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            action,
            actor: actor.into(),
            target: String::new(),
            result: AuditResult::Success,
            details: serde_json::Map::new(),
        }
    }

    /// An action the orchestrator performed on its own.
    pub fn system_action(action: AuditAction) -> Self {
        Self::actor_action(SYSTEM_ACTOR, action)
    }

    /// Set the record the action applies to.
    pub fn on_target(mut self, target: impl ToString) -> Self {
        self.target = target.to_string();
        self
    }

    pub fn failed(mut self) -> Self {
        self.result = AuditResult::Failure;
        self
    }

    /// Add one detail field.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.failed().with_detail("error", message.into())
    }

    pub fn build(self) -> NewAuditLogEntry {
        NewAuditLogEntry {
            action: self.action,
            actor: self.actor,
            target: self.target,
            result: self.result,
            details: json!(self.details),
        }
    }
}

/// Appends audit entries to the configured repository.
#[derive(Clone)]
pub struct AuditLogger {
    repo: Arc<dyn AuditLogRepository>,
}

impl AuditLogger {
    pub fn new(repo: Arc<dyn AuditLogRepository>) -> Self {
        Self { repo }
    }

    /// Append an entry and surface storage failures to the caller.
    pub async fn record(&self, entry: AuditLogBuilder) -> RepoResult<AuditLogEntry> {
        let entry = entry.build();
        let action = entry.action;
        let stored = self.repo.append(entry).await?;
        tracing::debug!(
            action = %action,
            actor = %stored.actor,
            target = %stored.target,
            "Audit entry recorded"
        );
        Ok(stored)
    }

    /// Append an entry; a storage failure is logged and swallowed.
    pub async fn record_or_warn(&self, entry: AuditLogBuilder) {
        let action = entry.action;
        if let Err(e) = self.record(entry).await {
            tracing::warn!(action = %action, error = %e, "Failed to record audit entry");
        }
    }

    pub fn repository(&self) -> &Arc<dyn AuditLogRepository> {
        &self.repo
    }
}
