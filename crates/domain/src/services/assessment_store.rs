//! Authoritative, persisted state machine for assessments.
//!
//! The repository is the system of record. Every mutation re-reads the row,
//! validates the transition and writes with compare-and-swap on the version it
//! read; a lost race surfaces as [`StoreError::Conflict`]. The in-process cache
//! is write-through and is evicted whenever the store sees a conflict or a
//! missing record.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;
use validator::Validate;

use super::audit::{AuditLogBuilder, AuditLogger};
use crate::models::{
    Assessment, AssessmentRequest, AssessmentResult, AssessmentState, AssessmentStatistics,
    AssessmentStatus, AuditAction,
};
use crate::repositories::{AssessmentRepository, RepositoryError};
use shared::pagination::PageRequest;

/// Errors returned by the assessment store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("assessment {0} not found")]
    NotFound(Uuid),

    #[error("assessment {id} was modified concurrently (expected version {expected_version})")]
    Conflict { id: Uuid, expected_version: i64 },

    #[error("invalid transition for assessment {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: AssessmentState,
        to: AssessmentState,
    },

    #[error("timed out after {waited_ms}ms waiting for assessment {id}")]
    Timeout { id: Uuid, waited_ms: u64 },

    #[error("assessment {id} failed: {message}")]
    Failed { id: Uuid, message: String },

    #[error("assessment {0} was cancelled")]
    Cancelled(Uuid),

    #[error("invalid assessment request: {0}")]
    Validation(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl StoreError {
    /// Conflict and Timeout are resolved by re-reading or waiting longer.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Conflict { .. } | StoreError::Timeout { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Field changes applied by [`AssessmentStore::apply_update`]. `None` leaves a
/// field untouched; the nested options clear a field with `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct AssessmentUpdate {
    pub state: Option<AssessmentState>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub result: Option<AssessmentResult>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<i32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
}

/// Result of a cancellation request.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    Cancelled(AssessmentStatus),
    /// The record was already COMPLETED or CANCELLED; nothing changed.
    AlreadyTerminal(AssessmentState),
}

/// Tunables for the store.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Interval between reads in `wait_for_completion`.
    pub poll_interval: Duration,
    /// Attempts made by `update_state_with_retry` before giving up on conflicts.
    pub max_cas_attempts: u32,
    pub cas_backoff: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_cas_attempts: 5,
            cas_backoff: Duration::from_millis(20),
        }
    }
}

pub struct AssessmentStore {
    repo: Arc<dyn AssessmentRepository>,
    audit: AuditLogger,
    cache: RwLock<HashMap<Uuid, Assessment>>,
    settings: StoreSettings,
}

impl AssessmentStore {
    pub fn new(repo: Arc<dyn AssessmentRepository>, audit: AuditLogger) -> Self {
        Self::with_settings(repo, audit, StoreSettings::default())
    }

    pub fn with_settings(
        repo: Arc<dyn AssessmentRepository>,
        audit: AuditLogger,
        settings: StoreSettings,
    ) -> Self {
        Self {
            repo,
            audit,
            cache: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Persist a new PENDING assessment at version 1.
    pub async fn create_assessment(
        &self,
        request: AssessmentRequest,
        actor: &str,
    ) -> StoreResult<Assessment> {
        request
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;

        let assessment = Assessment::new(request);
        self.repo
            .insert(&assessment)
            .await
            .map_err(StoreError::Repository)?;
        self.cache_put(&assessment).await;

        tracing::info!(
            assessment_id = %assessment.id,
            assessment_type = %assessment.request.assessment_type,
            source = %assessment.request.source,
            "Assessment created"
        );
        self.audit
            .record_or_warn(
                AuditLogBuilder::actor_action(actor, AuditAction::AssessmentRequested)
                    .on_target(assessment.id)
                    .with_detail("assessmentType", assessment.request.assessment_type.to_string())
                    .with_detail("source", assessment.request.source.clone()),
            )
            .await;
        Ok(assessment)
    }

    /// Move an assessment to `new_state`, CAS-writing on the version just read.
    pub async fn update_state(
        &self,
        id: Uuid,
        new_state: AssessmentState,
        result: Option<AssessmentResult>,
        message: Option<String>,
    ) -> StoreResult<Assessment> {
        let current = self.load_fresh(id).await?;
        let update = AssessmentUpdate {
            state: Some(new_state),
            message,
            result,
            ..Default::default()
        };
        self.write(current, update).await
    }

    /// [`update_state`](Self::update_state), retrying on `Conflict` with
    /// exponential backoff up to the configured attempt count.
    pub async fn update_state_with_retry(
        &self,
        id: Uuid,
        new_state: AssessmentState,
        result: Option<AssessmentResult>,
        message: Option<String>,
    ) -> StoreResult<Assessment> {
        let mut attempt = 0;
        loop {
            match self
                .update_state(id, new_state, result.clone(), message.clone())
                .await
            {
                Err(StoreError::Conflict { .. }) if attempt + 1 < self.settings.max_cas_attempts => {
                    let delay = self.settings.cas_backoff * 2u32.saturating_pow(attempt);
                    tracing::debug!(assessment_id = %id, attempt, "Version conflict, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Apply `update` only if the stored version is still `expected_version`.
    pub async fn apply_update(
        &self,
        id: Uuid,
        expected_version: i64,
        update: AssessmentUpdate,
    ) -> StoreResult<Assessment> {
        let current = self.load_fresh(id).await?;
        if current.version != expected_version {
            self.cache_evict(id).await;
            return Err(StoreError::Conflict {
                id,
                expected_version,
            });
        }
        self.write(current, update).await
    }

    async fn write(&self, current: Assessment, update: AssessmentUpdate) -> StoreResult<Assessment> {
        let id = current.id;
        let expected_version = current.version;
        let mut next = current.clone();

        if let Some(state) = update.state {
            // Self-transitions are not in the table either; field-only
            // updates pass `state: None`.
            if !current.state.can_transition_to(state) {
                return Err(StoreError::InvalidTransition {
                    id,
                    from: current.state,
                    to: state,
                });
            }
            next.state = state;
        } else if current.state.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.state,
                to: current.state,
            });
        }

        if let Some(progress) = update.progress {
            next.progress = progress.min(100);
        }
        if let Some(message) = update.message {
            next.message = message;
        }
        if let Some(result) = update.result {
            next.result = Some(result);
        }
        if let Some(error_message) = update.error_message {
            next.error_message = error_message;
        }
        if let Some(retry_count) = update.retry_count {
            next.retry_count = retry_count;
        }
        if let Some(next_retry_at) = update.next_retry_at {
            next.next_retry_at = next_retry_at;
        }

        let now = Utc::now();
        next.updated_at = now;
        match next.state {
            AssessmentState::Completed => {
                next.progress = 100;
                next.completed_at = Some(now);
                next.next_retry_at = None;
                next.error_message = None;
            }
            AssessmentState::Cancelled => {
                next.completed_at = Some(now);
                next.next_retry_at = None;
            }
            AssessmentState::Processing => {
                next.next_retry_at = None;
            }
            _ => {}
        }

        match self.repo.compare_and_swap(expected_version, &next).await {
            Ok(stored) => {
                tracing::debug!(
                    assessment_id = %id,
                    from = %current.state,
                    to = %stored.state,
                    version = stored.version,
                    "Assessment updated"
                );
                self.cache_put(&stored).await;
                Ok(stored)
            }
            Err(RepositoryError::VersionMismatch { .. }) => {
                self.cache_evict(id).await;
                Err(StoreError::Conflict {
                    id,
                    expected_version,
                })
            }
            Err(RepositoryError::NotFound(_)) => {
                self.cache_evict(id).await;
                Err(StoreError::NotFound(id))
            }
            Err(e) => Err(StoreError::Repository(e)),
        }
    }

    /// Full record, served from the cache when present.
    pub async fn get_assessment_data(&self, id: Uuid) -> StoreResult<Assessment> {
        if let Some(cached) = self.cache.read().await.get(&id) {
            return Ok(cached.clone());
        }
        self.load_fresh(id).await
    }

    pub async fn get_state(&self, id: Uuid) -> StoreResult<AssessmentStatus> {
        Ok(self.get_assessment_data(id).await?.status())
    }

    /// Poll until the assessment completes, fails permanently or is cancelled.
    ///
    /// A FAILED record with a scheduled retry is still in flight and keeps
    /// the wait going.
    pub async fn wait_for_completion(
        &self,
        id: Uuid,
        timeout: Duration,
    ) -> StoreResult<AssessmentResult> {
        let started = tokio::time::Instant::now();
        let deadline = started + timeout;
        loop {
            let assessment = self.get_assessment_data(id).await?;
            match assessment.state {
                AssessmentState::Completed => {
                    return assessment.result.ok_or_else(|| StoreError::Failed {
                        id,
                        message: "completed without a result".to_string(),
                    });
                }
                AssessmentState::Cancelled => return Err(StoreError::Cancelled(id)),
                AssessmentState::Failed if assessment.next_retry_at.is_none() => {
                    return Err(StoreError::Failed {
                        id,
                        message: assessment
                            .error_message
                            .unwrap_or_else(|| "evaluation failed".to_string()),
                    });
                }
                _ => {}
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(StoreError::Timeout {
                    id,
                    waited_ms: (now - started).as_millis() as u64,
                });
            }
            tokio::time::sleep(self.settings.poll_interval.min(deadline - now)).await;
        }
    }

    /// Cancel a non-terminal assessment. Cancelling a COMPLETED or CANCELLED
    /// record is a no-op and writes no audit entry.
    pub async fn cancel_assessment(
        &self,
        id: Uuid,
        reason: &str,
        actor: &str,
    ) -> StoreResult<CancelOutcome> {
        let mut attempt = 0;
        loop {
            let current = self.load_fresh(id).await?;
            if current.state.is_terminal() {
                tracing::warn!(
                    assessment_id = %id,
                    state = %current.state,
                    "Cancellation requested for terminal assessment, ignoring"
                );
                return Ok(CancelOutcome::AlreadyTerminal(current.state));
            }
            let from = current.state;
            let update = AssessmentUpdate {
                state: Some(AssessmentState::Cancelled),
                message: Some(format!("Cancelled: {}", reason)),
                ..Default::default()
            };
            match self.write(current, update).await {
                Ok(stored) => {
                    tracing::info!(assessment_id = %id, actor, reason, "Assessment cancelled");
                    self.audit
                        .record_or_warn(
                            AuditLogBuilder::actor_action(actor, AuditAction::AssessmentCancelled)
                                .on_target(id)
                                .with_detail("reason", reason)
                                .with_detail("previousState", from.to_string()),
                        )
                        .await;
                    return Ok(CancelOutcome::Cancelled(stored.status()));
                }
                Err(StoreError::Conflict { .. }) if attempt + 1 < self.settings.max_cas_attempts => {
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn list_assessments(
        &self,
        state: Option<AssessmentState>,
        page: PageRequest,
    ) -> StoreResult<(Vec<Assessment>, i64)> {
        self.repo
            .list(state, page)
            .await
            .map_err(StoreError::Repository)
    }

    pub async fn get_statistics(&self) -> StoreResult<AssessmentStatistics> {
        self.repo.statistics().await.map_err(StoreError::Repository)
    }

    /// FAILED records due for retry and PENDING records never picked up.
    pub async fn get_assessments_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Assessment>> {
        self.repo
            .find_due_for_retry(now, limit)
            .await
            .map_err(StoreError::Repository)
    }

    /// Delete terminal assessments last updated before `cutoff`.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let removed = self
            .repo
            .delete_terminal_before(cutoff)
            .await
            .map_err(StoreError::Repository)?;
        self.cache
            .write()
            .await
            .retain(|_, a| !(a.state.is_terminal() && a.updated_at < cutoff));
        Ok(removed)
    }

    /// Fail records left PROCESSING by a previous run so the retry scan picks
    /// them up. Returns how many were recovered.
    pub async fn recover_interrupted(&self, limit: i64) -> StoreResult<usize> {
        self.recover_processing(limit, |_| false).await
    }

    /// Fail PROCESSING records for which `in_flight` returns false and
    /// schedule an immediate retry. The write is a compare-and-swap against
    /// the version read here, so a record that moves on meanwhile is left alone.
    pub async fn recover_processing<F>(&self, limit: i64, in_flight: F) -> StoreResult<usize>
    where
        F: Fn(Uuid) -> bool,
    {
        let stuck = self
            .repo
            .find_by_state(AssessmentState::Processing, limit)
            .await
            .map_err(StoreError::Repository)?;
        let mut recovered = 0;
        for assessment in stuck {
            let id = assessment.id;
            if in_flight(id) {
                continue;
            }
            let update = AssessmentUpdate {
                state: Some(AssessmentState::Failed),
                message: Some("Processing interrupted, retry scheduled".to_string()),
                error_message: Some(Some("processing interrupted".to_string())),
                next_retry_at: Some(Some(Utc::now())),
                ..Default::default()
            };
            match self.write(assessment, update).await {
                Ok(_) => {
                    recovered += 1;
                    self.audit
                        .record_or_warn(
                            AuditLogBuilder::system_action(AuditAction::AssessmentRecovered)
                                .on_target(id),
                        )
                        .await;
                }
                Err(StoreError::Conflict { .. }) => {
                    tracing::debug!(assessment_id = %id, "Assessment moved on before recovery");
                }
                Err(e) => tracing::warn!(assessment_id = %id, error = %e, "Failed to recover assessment"),
            }
        }
        Ok(recovered)
    }

    pub async fn ping(&self) -> StoreResult<()> {
        self.repo.ping().await.map_err(StoreError::Repository)
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    async fn load_fresh(&self, id: Uuid) -> StoreResult<Assessment> {
        match self.repo.find_by_id(id).await {
            Ok(Some(assessment)) => {
                self.cache_put(&assessment).await;
                Ok(assessment)
            }
            Ok(None) => {
                self.cache_evict(id).await;
                Err(StoreError::NotFound(id))
            }
            Err(e) => Err(StoreError::Repository(e)),
        }
    }

    async fn cache_put(&self, assessment: &Assessment) {
        let mut cache = self.cache.write().await;
        let stale = cache
            .get(&assessment.id)
            .map_or(false, |cached| cached.version > assessment.version);
        if !stale {
            cache.insert(assessment.id, assessment.clone());
        }
    }

    async fn cache_evict(&self, id: Uuid) {
        self.cache.write().await.remove(&id);
    }
}
