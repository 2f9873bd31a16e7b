//! Execution engine for approved remediation actions.
//!
//! Each action runs through the same pipeline: prerequisite validation, a
//! backup of the managed configuration files, the command itself under a
//! timeout, verification checks and, when something went wrong, a rollback.
//! Every non-dry-run action yields exactly one persisted [`ExecutionResult`].

pub mod backup;
pub mod command;
pub mod verification;

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ExecutionConfig;
use crate::middleware::metrics as app_metrics;
use backup::{Backup, BackupError, BackupManager};
use command::{resolve_executable, CommandError};
use domain::models::{
    ActiveExecution, AuditAction, ExecutionLookup, ExecutionOptions, ExecutionPhase,
    ExecutionResult, ExecutionStats, ExecutionStatus, RemediationAction, TestResult,
};
use domain::repositories::{RemediationRepository, RepositoryError};
use domain::services::{AuditLogBuilder, AuditLogger, RuleEngine};
use verification::Verifier;

pub const PREREQUISITES: &str = "prerequisites";
pub const BACKUP: &str = "backup";
pub const ROLLBACK: &str = "rollback";

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("execution {0} not found")]
    NotFound(Uuid),

    #[error("action {0} has already been executed")]
    AlreadyExecuted(Uuid),

    #[error("action {0} is already running")]
    AlreadyRunning(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Who asked for an execution and on behalf of which proposal.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub actor: String,
    pub proposal_id: Option<Uuid>,
}

impl ExecutionContext {
    pub fn new(actor: impl Into<String>, proposal_id: Option<Uuid>) -> Self {
        Self {
            actor: actor.into(),
            proposal_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backup_dir: PathBuf,
    pub managed_config_paths: Vec<PathBuf>,
    pub command_timeout: Duration,
    pub max_parallel: usize,
    pub result_history: usize,
}

impl EngineSettings {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            managed_config_paths: config.managed_config_paths.clone(),
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            max_parallel: config.max_parallel.max(1),
            result_history: config.result_history,
        }
    }
}

struct Running {
    snapshot: ActiveExecution,
    token: CancellationToken,
}

#[derive(Default)]
struct EngineState {
    active: HashMap<Uuid, Running>,
    running_actions: HashSet<Uuid>,
    executed_actions: HashSet<Uuid>,
    finished: VecDeque<ExecutionResult>,
    stats: ExecutionStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Outcome of the command step.
enum CommandStep {
    Applied,
    Failed(String),
    Cancelled,
}

pub struct ExecutionEngine {
    settings: EngineSettings,
    backups: BackupManager,
    verifier: Verifier,
    repo: Arc<dyn RemediationRepository>,
    audit: AuditLogger,
    state: Mutex<EngineState>,
    /// Held from backup until verification or rollback finishes, so a restore
    /// never overwrites a change another action made to a managed file.
    managed_files: tokio::sync::Mutex<()>,
}

impl ExecutionEngine {
    pub fn new(
        settings: EngineSettings,
        engine: Arc<RuleEngine>,
        repo: Arc<dyn RemediationRepository>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            backups: BackupManager::new(settings.backup_dir.clone()),
            verifier: Verifier::new(engine, settings.managed_config_paths.clone()),
            settings,
            repo,
            audit,
            state: Mutex::new(EngineState::default()),
            managed_files: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Run one action to completion.
    pub async fn execute_action(
        &self,
        action: &RemediationAction,
        options: &ExecutionOptions,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        let (execution_id, token) = self.register(action, options.dry_run)?;
        let result = self
            .run_registered(execution_id, action, options, context, &token)
            .await;
        self.finish(action, &result, token.is_cancelled());

        if let Err(e) = self.repo.insert_execution_result(&result).await {
            tracing::error!(
                execution_id = %result.id,
                action_id = %action.id,
                error = %e,
                "Failed to persist execution result"
            );
        }
        self.audit_result(&result, context).await;
        app_metrics::record_remediation_execution(result.status, result.rollback_executed);
        app_metrics::record_remediation_duration(
            action.action_type.to_string(),
            Duration::from_millis(result.duration_ms() as u64),
        );

        tracing::info!(
            execution_id = %result.id,
            action_id = %action.id,
            server = %action.server_name,
            status = %result.status,
            rollback_executed = result.rollback_executed,
            rollback_required = result.rollback_required,
            "Remediation action finished"
        );
        Ok(result)
    }

    /// Run several independent actions. Results keep the order of `actions`;
    /// a failing action never rolls back the others. Commands run concurrently
    /// only when no managed configuration files are configured.
    pub async fn execute_actions(
        self: &Arc<Self>,
        actions: &[RemediationAction],
        options: &ExecutionOptions,
        context: &ExecutionContext,
    ) -> Vec<Result<ExecutionResult, ExecutionError>> {
        if !options.parallel || actions.len() < 2 {
            let mut results = Vec::with_capacity(actions.len());
            for action in actions {
                results.push(self.execute_action(action, options, context).await);
            }
            return results;
        }

        let limit = options
            .max_parallel
            .unwrap_or(self.settings.max_parallel)
            .clamp(1, self.settings.max_parallel.max(1));
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();
        for (index, action) in actions.iter().cloned().enumerate() {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let options = options.clone();
            let context = context.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, engine.execute_action(&action, &options, &context).await)
            });
        }

        let mut slots: Vec<Option<Result<ExecutionResult, ExecutionError>>> =
            actions.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Remediation task panicked"),
            }
        }

        slots
            .into_iter()
            .zip(actions)
            .map(|(slot, action)| {
                slot.unwrap_or_else(|| {
                    Err(ExecutionError::Repository(RepositoryError::Storage(format!(
                        "execution of action {} aborted",
                        action.id
                    ))))
                })
            })
            .collect()
    }

    /// Cancel an in-flight execution. The running command is killed and the
    /// action is rolled back like any other failure.
    pub fn cancel_execution(&self, execution_id: Uuid) -> Result<ActiveExecution, ExecutionError> {
        let state = lock(&self.state);
        let running = state
            .active
            .get(&execution_id)
            .ok_or(ExecutionError::NotFound(execution_id))?;
        running.token.cancel();
        tracing::info!(execution_id = %execution_id, "Execution cancellation requested");
        Ok(running.snapshot.clone())
    }

    /// Live status first, then recent history, then the persisted record.
    pub async fn get_execution_status(
        &self,
        execution_id: Uuid,
    ) -> Result<ExecutionLookup, ExecutionError> {
        {
            let state = lock(&self.state);
            if let Some(running) = state.active.get(&execution_id) {
                return Ok(ExecutionLookup::Running(running.snapshot.clone()));
            }
            if let Some(result) = state.finished.iter().find(|r| r.id == execution_id) {
                return Ok(ExecutionLookup::Finished(result.clone()));
            }
        }

        self.repo
            .find_execution_result(execution_id)
            .await?
            .map(ExecutionLookup::Finished)
            .ok_or(ExecutionError::NotFound(execution_id))
    }

    pub fn get_active_executions(&self) -> Vec<ActiveExecution> {
        let state = lock(&self.state);
        let mut active: Vec<ActiveExecution> =
            state.active.values().map(|r| r.snapshot.clone()).collect();
        active.sort_by_key(|a| a.started_at);
        active
    }

    pub fn get_execution_stats(&self) -> ExecutionStats {
        let state = lock(&self.state);
        let mut stats = state.stats.clone();
        stats.active = state.active.len();
        stats
    }

    fn register(
        &self,
        action: &RemediationAction,
        dry_run: bool,
    ) -> Result<(Uuid, CancellationToken), ExecutionError> {
        let mut state = lock(&self.state);
        if !dry_run {
            if state.executed_actions.contains(&action.id) {
                return Err(ExecutionError::AlreadyExecuted(action.id));
            }
            if !state.running_actions.insert(action.id) {
                return Err(ExecutionError::AlreadyRunning(action.id));
            }
        }

        let execution_id = Uuid::new_v4();
        let token = CancellationToken::new();
        state.active.insert(
            execution_id,
            Running {
                snapshot: ActiveExecution {
                    execution_id,
                    action_id: action.id,
                    server_name: action.server_name.clone(),
                    action_type: action.action_type,
                    phase: ExecutionPhase::Validating,
                    started_at: Utc::now(),
                },
                token: token.clone(),
            },
        );
        Ok((execution_id, token))
    }

    fn set_phase(&self, execution_id: Uuid, phase: ExecutionPhase) {
        if let Some(running) = lock(&self.state).active.get_mut(&execution_id) {
            running.snapshot.phase = phase;
        }
    }

    fn finish(&self, action: &RemediationAction, result: &ExecutionResult, cancelled: bool) {
        let mut state = lock(&self.state);
        state.active.remove(&result.id);
        if !result.dry_run {
            state.running_actions.remove(&action.id);
            state.executed_actions.insert(action.id);
        }
        state.stats.record(result);
        if cancelled {
            state.stats.cancelled += 1;
        }
        if self.settings.result_history > 0 {
            while state.finished.len() >= self.settings.result_history {
                state.finished.pop_front();
            }
            state.finished.push_back(result.clone());
        }
    }

    async fn run_registered(
        &self,
        execution_id: Uuid,
        action: &RemediationAction,
        options: &ExecutionOptions,
        context: &ExecutionContext,
        token: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let mut result = ExecutionResult {
            id: execution_id,
            action_id: action.id,
            proposal_id: context.proposal_id,
            action_type: action.action_type,
            server_name: action.server_name.clone(),
            status: ExecutionStatus::Failed,
            started_at,
            ended_at: started_at,
            tests: Vec::new(),
            rollback_required: false,
            rollback_executed: false,
            error_message: None,
            dry_run: options.dry_run,
        };

        let prerequisites = check_prerequisites(action);
        let prerequisites_passed = prerequisites.passed;
        if !prerequisites_passed {
            result.error_message = Some(prerequisites.message.clone());
        }
        result.tests.push(prerequisites);

        if options.dry_run {
            result.status = ExecutionStatus::Pending;
            result.ended_at = Utc::now();
            return result;
        }
        if !prerequisites_passed {
            result.ended_at = Utc::now();
            return result;
        }

        let _managed_files = if self.settings.managed_config_paths.is_empty() {
            None
        } else {
            Some(self.managed_files.lock().await)
        };

        let backup = if options.rollback_on_failure {
            self.set_phase(execution_id, ExecutionPhase::BackingUp);
            match self.capture_backup(action).await {
                Ok(backup) => backup,
                Err(e) => {
                    result.tests.push(TestResult::fail(BACKUP, e.to_string(), 0));
                    result.error_message = Some(format!("backup failed: {}", e));
                    result.ended_at = Utc::now();
                    return result;
                }
            }
        } else {
            None
        };

        self.set_phase(execution_id, ExecutionPhase::Executing);
        let timeout = options
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.command_timeout);
        let step = match command::run(
            &action.command,
            &action.args,
            &action.env,
            timeout,
            token,
        )
        .await
        {
            Ok(output) => {
                tracing::debug!(
                    execution_id = %execution_id,
                    duration_ms = output.duration.as_millis() as u64,
                    "Remediation command succeeded"
                );
                CommandStep::Applied
            }
            Err(CommandError::Cancelled(_)) => CommandStep::Cancelled,
            Err(e) => CommandStep::Failed(e.to_string()),
        };

        let verified = match &step {
            CommandStep::Applied => {
                self.set_phase(execution_id, ExecutionPhase::Verifying);
                let checks = self.verifier.verify(action).await;
                let passed = checks.iter().all(|t| t.passed);
                if !passed {
                    let failed: Vec<&str> = checks
                        .iter()
                        .filter(|t| !t.passed)
                        .map(|t| t.name.as_str())
                        .collect();
                    result.error_message =
                        Some(format!("verification failed: {}", failed.join(", ")));
                }
                result.tests.extend(checks);
                passed
            }
            CommandStep::Failed(message) => {
                result.error_message = Some(message.clone());
                false
            }
            CommandStep::Cancelled => {
                result.error_message = Some("execution cancelled".to_string());
                false
            }
        };

        if verified {
            result.status = ExecutionStatus::Success;
            if let Some(backup) = &backup {
                self.discard_backup(backup).await;
            }
            result.ended_at = Utc::now();
            return result;
        }

        let rolled_back = if options.rollback_on_failure {
            self.set_phase(execution_id, ExecutionPhase::RollingBack);
            let outcome = self.rollback(action, backup.as_ref(), timeout).await;
            let succeeded = outcome.as_ref().map(|t| t.passed).unwrap_or(false);
            if let Some(test) = outcome {
                result.tests.push(test);
            }
            succeeded
        } else {
            false
        };

        result.rollback_executed = rolled_back;
        result.rollback_required = !rolled_back;
        result.status = match step {
            CommandStep::Applied if !rolled_back => ExecutionStatus::Partial,
            _ => ExecutionStatus::Failed,
        };
        if rolled_back {
            if let Some(backup) = &backup {
                self.discard_backup(backup).await;
            }
        }
        result.ended_at = Utc::now();
        result
    }

    async fn capture_backup(
        &self,
        action: &RemediationAction,
    ) -> Result<Option<Backup>, BackupError> {
        if self.settings.managed_config_paths.is_empty() {
            return Ok(None);
        }
        self.backups
            .capture(action.id, &self.settings.managed_config_paths)
            .await
            .map(Some)
    }

    async fn discard_backup(&self, backup: &Backup) {
        if let Err(e) = self.backups.discard(backup).await {
            tracing::warn!(dir = %backup.dir.display(), error = %e, "Failed to remove backup");
        }
    }

    /// Restore the backup when one was captured, otherwise run the action's
    /// rollback command. `None` when neither is available.
    async fn rollback(
        &self,
        action: &RemediationAction,
        backup: Option<&Backup>,
        timeout: Duration,
    ) -> Option<TestResult> {
        let start = Instant::now();
        if let Some(backup) = backup {
            return Some(match self.backups.restore(backup).await {
                Ok(files) => TestResult::pass(
                    ROLLBACK,
                    format!("Restored {} file(s) from backup", files),
                    elapsed_ms(start),
                ),
                Err(e) => {
                    tracing::error!(
                        action_id = %action.id,
                        dir = %backup.dir.display(),
                        error = %e,
                        "Backup restore failed, backup kept for manual recovery"
                    );
                    TestResult::fail(ROLLBACK, e.to_string(), elapsed_ms(start))
                }
            });
        }

        let rollback_command = action.rollback_command.as_deref()?;
        // The action's own token may already be cancelled.
        let token = CancellationToken::new();
        Some(
            match command::run(
                rollback_command,
                &action.rollback_args,
                &action.rollback_env,
                timeout,
                &token,
            )
            .await
            {
                Ok(_) => TestResult::pass(
                    ROLLBACK,
                    format!("{} succeeded", rollback_command),
                    elapsed_ms(start),
                ),
                Err(e) => TestResult::fail(ROLLBACK, e.to_string(), elapsed_ms(start)),
            },
        )
    }

    async fn audit_result(&self, result: &ExecutionResult, context: &ExecutionContext) {
        let mut entry =
            AuditLogBuilder::actor_action(context.actor.as_str(), AuditAction::RemediationExecuted)
                .on_target(result.action_id)
                .with_detail("executionId", result.id.to_string())
                .with_detail("serverName", result.server_name.as_str())
                .with_detail("actionType", result.action_type.to_string())
                .with_detail("status", result.status.as_str())
                .with_detail("dryRun", result.dry_run)
                .with_detail("rollbackRequired", result.rollback_required);
        if let Some(proposal_id) = result.proposal_id {
            entry = entry.with_detail("proposalId", proposal_id.to_string());
        }
        if let Some(error) = &result.error_message {
            entry = entry.with_error(error.as_str());
        }
        self.audit.record_or_warn(entry).await;

        if result.rollback_executed {
            self.audit
                .record_or_warn(
                    AuditLogBuilder::system_action(AuditAction::RemediationRolledBack)
                        .on_target(result.action_id)
                        .with_detail("executionId", result.id.to_string()),
                )
                .await;
        }
    }
}

/// Required env values set, command and dependencies resolvable.
fn check_prerequisites(action: &RemediationAction) -> TestResult {
    let start = Instant::now();
    let mut problems = Vec::new();

    for name in &action.required_env {
        match std::env::var(name) {
            Ok(value) if !value.trim().is_empty() => {}
            _ => problems.push(format!("environment variable {} is not set", name)),
        }
    }
    for executable in std::iter::once(&action.command).chain(&action.dependencies) {
        if let Err(e) = resolve_executable(executable) {
            problems.push(e.to_string());
        }
    }

    if problems.is_empty() {
        TestResult::pass(PREREQUISITES, "All prerequisites satisfied", elapsed_ms(start))
    } else {
        TestResult::fail(PREREQUISITES, problems.join("; "), elapsed_ms(start))
    }
}
