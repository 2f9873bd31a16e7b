//! Assessment processor: bounded FIFO queue, batch loop and evaluator calls.
//!
//! Ids enter the queue from `process_assessment` and from the retry scan. The
//! batch loop wakes on its interval or on an mpsc nudge, takes up to
//! `batch_size` ids while semaphore permits are available and evaluates each
//! one under the circuit breaker and the evaluation timeout. Every outcome is
//! written back to the store with compare-and-swap; an item is either
//! completed, rescheduled or permanently failed, never dropped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::ProcessorConfig;
use crate::middleware::metrics as app_metrics;
use domain::models::{Assessment, AssessmentResult, AssessmentState, AuditAction};
use domain::services::{
    Admission, AssessmentStore, AssessmentUpdate, AuditLogBuilder, CircuitBreaker, CircuitOpen,
    CircuitSnapshot, ComplianceEvaluator, EvaluationError, RetryDecision, RetryPolicy, StoreError,
};

/// Errors surfaced by the processor.
#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    #[error("assessment {0} is already being processed")]
    AlreadyProcessing(Uuid),

    #[error("processing queue is full ({capacity} items)")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of `process_assessment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued { position: usize },
    AlreadyQueued,
}

/// What happened to one dequeued assessment.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    Completed { score: f64 },
    RetryScheduled { attempt: i32, delay: Duration },
    Failed,
    /// Breaker open; pushed back to the breaker's reset time without using a retry.
    Deferred { retry_after: Duration },
    Cancelled,
    /// Not eligible when dequeued (already moved on, or retry not yet due).
    Skipped,
}

impl ProcessOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            ProcessOutcome::Completed { .. } => "completed",
            ProcessOutcome::RetryScheduled { .. } => "retry_scheduled",
            ProcessOutcome::Failed => "failed",
            ProcessOutcome::Deferred { .. } => "deferred",
            ProcessOutcome::Cancelled => "cancelled",
            ProcessOutcome::Skipped => "skipped",
        }
    }
}

/// Tunables derived from `[processor]`.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_concurrent: usize,
    pub max_queue_size: usize,
    pub evaluation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl ProcessorSettings {
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            batch_size: config.batch_size.max(1),
            max_concurrent: config.max_concurrent.max(1),
            max_queue_size: config.max_queue_size.max(1),
            evaluation_timeout: Duration::from_millis(config.evaluation_timeout_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
                max_jitter: Duration::from_millis(config.max_jitter_ms),
            },
        }
    }
}

/// Counters and gauges reported by `GET /assessment/processor`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorMetrics {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub deferred: u64,
    pub cancelled: u64,
    pub average_processing_ms: f64,
    pub queue_size: usize,
    pub active_count: usize,
    pub max_concurrent: usize,
    pub evaluator: &'static str,
    pub circuit_breaker: CircuitSnapshot,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_size: usize,
    pub capacity: usize,
    pub queued: Vec<Uuid>,
    pub active: Vec<Uuid>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    succeeded: u64,
    failed: u64,
    retried: u64,
    deferred: u64,
    cancelled: u64,
    total_processing_ms: u64,
}

#[derive(Debug, Default)]
struct Queue {
    items: VecDeque<Uuid>,
    members: HashSet<Uuid>,
}

pub struct AssessmentProcessor {
    store: Arc<AssessmentStore>,
    evaluator: Arc<dyn ComplianceEvaluator>,
    breaker: Arc<CircuitBreaker>,
    settings: ProcessorSettings,
    queue: Mutex<Queue>,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    permits: Arc<Semaphore>,
    counters: Mutex<Counters>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

/// Attempts at writing an evaluation outcome before the retry scan takes over.
const FINISH_ATTEMPTS: u32 = 4;
const FINISH_BACKOFF: Duration = Duration::from_millis(50);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Breaker-relevant failures: the evaluator itself is unhealthy.
fn is_service_failure(err: &EvaluationError) -> bool {
    matches!(
        err,
        EvaluationError::Timeout(_)
            | EvaluationError::Unavailable(_)
            | EvaluationError::InvalidResponse(_)
    )
}

impl AssessmentProcessor {
    pub fn new(
        store: Arc<AssessmentStore>,
        evaluator: Arc<dyn ComplianceEvaluator>,
        breaker: Arc<CircuitBreaker>,
        settings: ProcessorSettings,
    ) -> Self {
        let (wake_tx, wake_rx) = mpsc::channel(1);
        Self {
            store,
            evaluator,
            breaker,
            permits: Arc::new(Semaphore::new(settings.max_concurrent)),
            settings,
            queue: Mutex::new(Queue::default()),
            active: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
            wake_tx,
            wake_rx: Mutex::new(Some(wake_rx)),
        }
    }

    pub fn store(&self) -> &Arc<AssessmentStore> {
        &self.store
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    /// Queue an assessment for evaluation.
    pub fn process_assessment(&self, id: Uuid) -> Result<EnqueueOutcome, ProcessorError> {
        if lock(&self.active).contains_key(&id) {
            return Err(ProcessorError::AlreadyProcessing(id));
        }

        let position = {
            let mut queue = lock(&self.queue);
            if queue.members.contains(&id) {
                return Ok(EnqueueOutcome::AlreadyQueued);
            }
            if queue.items.len() >= self.settings.max_queue_size {
                tracing::warn!(
                    assessment_id = %id,
                    capacity = self.settings.max_queue_size,
                    "Processing queue full"
                );
                return Err(ProcessorError::QueueFull {
                    capacity: self.settings.max_queue_size,
                });
            }
            queue.items.push_back(id);
            queue.members.insert(id);
            queue.items.len()
        };

        tracing::debug!(assessment_id = %id, position, "Assessment queued");
        // A full channel already carries a pending wake-up.
        let _ = self.wake_tx.try_send(());
        Ok(EnqueueOutcome::Queued { position })
    }

    /// Queue every record whose retry has come due, plus orphaned PENDING ones.
    /// PROCESSING records with no evaluation in flight are failed first so
    /// they come due immediately.
    pub async fn enqueue_due(&self, limit: i64) -> Result<usize, ProcessorError> {
        let recovered = self
            .store
            .recover_processing(limit, |id| lock(&self.active).contains_key(&id))
            .await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Recovered assessments stuck in PROCESSING");
        }

        let due = self
            .store
            .get_assessments_for_retry(Utc::now(), limit)
            .await?;
        let mut queued = 0;
        for assessment in due {
            match self.process_assessment(assessment.id) {
                Ok(EnqueueOutcome::Queued { .. }) => queued += 1,
                Ok(EnqueueOutcome::AlreadyQueued) | Err(ProcessorError::AlreadyProcessing(_)) => {}
                Err(ProcessorError::QueueFull { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(queued)
    }

    /// Stop work on `id`: drop it from the queue and cancel an in-flight
    /// evaluation. Returns true when something was stopped.
    pub fn cancel(&self, id: Uuid) -> bool {
        let dequeued = {
            let mut queue = lock(&self.queue);
            if queue.members.remove(&id) {
                queue.items.retain(|queued| *queued != id);
                true
            } else {
                false
            }
        };
        let interrupted = match lock(&self.active).get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        if dequeued || interrupted {
            tracing::info!(assessment_id = %id, dequeued, interrupted, "Processing cancelled");
        }
        dequeued || interrupted
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).items.len()
    }

    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn queue_status(&self) -> QueueStatus {
        let queue = lock(&self.queue);
        let active = lock(&self.active);
        QueueStatus {
            queue_size: queue.items.len(),
            capacity: self.settings.max_queue_size,
            queued: queue.items.iter().copied().collect(),
            active: active.keys().copied().collect(),
        }
    }

    pub fn metrics(&self) -> ProcessorMetrics {
        let counters = lock(&self.counters);
        let finished = counters.succeeded + counters.failed + counters.retried;
        ProcessorMetrics {
            processed: counters.processed,
            succeeded: counters.succeeded,
            failed: counters.failed,
            retried: counters.retried,
            deferred: counters.deferred,
            cancelled: counters.cancelled,
            average_processing_ms: if finished == 0 {
                0.0
            } else {
                counters.total_processing_ms as f64 / finished as f64
            },
            queue_size: self.queue_len(),
            active_count: self.active_count(),
            max_concurrent: self.settings.max_concurrent,
            evaluator: self.evaluator.name(),
            circuit_breaker: self.breaker.snapshot(),
        }
    }

    /// Spawn the batch loop. It exits when `shutdown` fires, after in-flight
    /// evaluations finish.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let wake_rx = lock(&self.wake_rx).take();

        tokio::spawn(async move {
            let Some(mut wake_rx) = wake_rx else {
                tracing::error!("Assessment processor already started");
                return;
            };

            let mut ticker = tokio::time::interval(this.settings.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut tasks: JoinSet<()> = JoinSet::new();

            tracing::info!(
                interval_ms = this.settings.interval.as_millis() as u64,
                batch_size = this.settings.batch_size,
                max_concurrent = this.settings.max_concurrent,
                evaluator = this.evaluator.name(),
                "Assessment processor started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                    Some(()) = wake_rx.recv() => {}
                    Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                        if let Err(e) = joined {
                            tracing::error!(error = %e, "Assessment task panicked");
                        }
                    }
                }
                this.dispatch_batch(&mut tasks);
                app_metrics::record_processor_gauges(this.queue_len(), this.active_count());
            }

            tracing::info!(in_flight = tasks.len(), "Assessment processor draining");
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "Assessment task panicked");
                }
            }
            tracing::info!("Assessment processor stopped");
        })
    }

    fn pop_front(&self) -> Option<Uuid> {
        let mut queue = lock(&self.queue);
        let id = queue.items.pop_front()?;
        queue.members.remove(&id);
        Some(id)
    }

    /// Register `id` as active. None when it already is.
    fn activate(&self, id: Uuid) -> Option<CancellationToken> {
        let mut active = lock(&self.active);
        if active.contains_key(&id) {
            return None;
        }
        let token = CancellationToken::new();
        active.insert(id, token.clone());
        Some(token)
    }

    fn dispatch_batch(self: &Arc<Self>, tasks: &mut JoinSet<()>) {
        for _ in 0..self.settings.batch_size {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                break;
            };
            let Some(id) = self.pop_front() else {
                break;
            };
            let Some(token) = self.activate(id) else {
                tracing::debug!(assessment_id = %id, "Skipping assessment already in flight");
                continue;
            };

            let this = Arc::clone(self);
            tasks.spawn(async move {
                let _permit = permit;
                let _ = this.run_one(id, token).await;
                lock(&this.active).remove(&id);
            });
        }
    }

    /// Process one assessment now, bypassing the queue. Used by the batch
    /// loop and by tests.
    pub async fn run_one(
        &self,
        id: Uuid,
        token: CancellationToken,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let started = Instant::now();
        let result = self.process_one(id, &token).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(outcome) => {
                self.count(outcome, elapsed);
                if *outcome != ProcessOutcome::Skipped {
                    app_metrics::record_assessment_processed(outcome.metric_label(), elapsed);
                }
            }
            Err(e) => {
                tracing::error!(assessment_id = %id, error = %e, "Assessment processing error");
            }
        }
        result
    }

    fn count(&self, outcome: &ProcessOutcome, elapsed: Duration) {
        let mut counters = lock(&self.counters);
        match outcome {
            ProcessOutcome::Skipped => return,
            ProcessOutcome::Completed { .. } => counters.succeeded += 1,
            ProcessOutcome::RetryScheduled { .. } => counters.retried += 1,
            ProcessOutcome::Failed => counters.failed += 1,
            ProcessOutcome::Deferred { .. } => counters.deferred += 1,
            ProcessOutcome::Cancelled => counters.cancelled += 1,
        }
        counters.processed += 1;
        if matches!(
            outcome,
            ProcessOutcome::Completed { .. }
                | ProcessOutcome::RetryScheduled { .. }
                | ProcessOutcome::Failed
        ) {
            counters.total_processing_ms += elapsed.as_millis() as u64;
        }
    }

    fn is_eligible(assessment: &Assessment) -> bool {
        let now = Utc::now();
        match assessment.state {
            AssessmentState::Pending => assessment.next_retry_at.map_or(true, |at| at <= now),
            AssessmentState::Failed => assessment.is_retry_due(now),
            _ => false,
        }
    }

    async fn process_one(
        &self,
        id: Uuid,
        token: &CancellationToken,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let assessment = match self.store.get_assessment_data(id).await {
            Ok(a) => a,
            Err(StoreError::NotFound(_)) => {
                tracing::warn!(assessment_id = %id, "Queued assessment no longer exists");
                return Ok(ProcessOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };
        if !Self::is_eligible(&assessment) {
            tracing::debug!(assessment_id = %id, state = %assessment.state, "Assessment not eligible");
            return Ok(ProcessOutcome::Skipped);
        }
        if token.is_cancelled() {
            return Ok(ProcessOutcome::Cancelled);
        }

        let admission = match self.breaker.try_acquire() {
            Ok(admission) => admission,
            Err(open) => return self.defer(&assessment, open).await,
        };

        let claim = AssessmentUpdate {
            state: Some(AssessmentState::Processing),
            progress: Some(10),
            message: Some(format!("Evaluating with {} evaluator", self.evaluator.name())),
            ..Default::default()
        };
        let processing = match self
            .store
            .apply_update(id, assessment.version, claim)
            .await
        {
            Ok(a) => a,
            Err(StoreError::Conflict { .. }) | Err(StoreError::InvalidTransition { .. }) => {
                self.give_back(admission);
                tracing::debug!(assessment_id = %id, "Assessment changed before claim, skipping");
                return Ok(ProcessOutcome::Skipped);
            }
            Err(e) => {
                self.give_back(admission);
                return Err(e.into());
            }
        };

        self.store
            .audit()
            .record_or_warn(
                AuditLogBuilder::system_action(AuditAction::AssessmentStarted)
                    .on_target(id)
                    .with_detail("attempt", processing.retry_count + 1)
                    .with_detail("evaluator", self.evaluator.name()),
            )
            .await;

        let timeout = self.settings.evaluation_timeout;
        let evaluation = tokio::select! {
            _ = token.cancelled() => None,
            r = tokio::time::timeout(timeout, self.evaluator.evaluate(id, &processing.request)) => {
                Some(r.unwrap_or_else(|_| Err(EvaluationError::Timeout(timeout.as_millis() as u64))))
            }
        };

        let evaluation = match evaluation {
            Some(e) if !token.is_cancelled() => e,
            _ => {
                self.give_back(admission);
                tracing::info!(assessment_id = %id, "Evaluation abandoned after cancellation");
                return Ok(ProcessOutcome::Cancelled);
            }
        };

        match evaluation {
            Ok(result) => {
                self.breaker.record_success(admission);
                self.complete(&processing, result).await
            }
            Err(err) => {
                if is_service_failure(&err) {
                    self.breaker.record_failure(admission);
                } else if matches!(err, EvaluationError::Rejected(_)) {
                    // The evaluator answered; it is reachable.
                    self.breaker.record_success(admission);
                } else {
                    self.give_back(admission);
                }
                self.fail(&processing, err).await
            }
        }
    }

    fn give_back(&self, admission: Admission) {
        if admission == Admission::Trial {
            self.breaker.abandon_trial();
        }
    }

    async fn defer(
        &self,
        assessment: &Assessment,
        open: CircuitOpen,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let retry_at = Utc::now()
            + chrono::Duration::from_std(open.retry_after).unwrap_or_else(|_| chrono::Duration::zero());
        let update = AssessmentUpdate {
            message: Some("Deferred: compliance evaluator circuit open".to_string()),
            next_retry_at: Some(Some(retry_at)),
            ..Default::default()
        };
        match self
            .store
            .apply_update(assessment.id, assessment.version, update)
            .await
        {
            Ok(_) | Err(StoreError::Conflict { .. }) | Err(StoreError::InvalidTransition { .. }) => {
                tracing::debug!(
                    assessment_id = %assessment.id,
                    retry_after_ms = open.retry_after.as_millis() as u64,
                    "Circuit open, assessment deferred"
                );
                Ok(ProcessOutcome::Deferred {
                    retry_after: open.retry_after,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// CAS-write `update` onto a PROCESSING record, re-reading on conflicts.
    /// Repository errors are retried with backoff up to `FINISH_ATTEMPTS`.
    /// None when the record left PROCESSING meanwhile (cancelled).
    async fn finish(
        &self,
        id: Uuid,
        mut expected_version: i64,
        update: AssessmentUpdate,
    ) -> Result<Option<Assessment>, ProcessorError> {
        let mut attempt = 0;
        loop {
            let error = match self.store.apply_update(id, expected_version, update.clone()).await {
                Ok(stored) => return Ok(Some(stored)),
                Err(StoreError::Conflict { .. }) => match self.store.get_assessment_data(id).await {
                    Ok(fresh) if fresh.state != AssessmentState::Processing => return Ok(None),
                    Ok(fresh) => {
                        expected_version = fresh.version;
                        continue;
                    }
                    Err(StoreError::NotFound(_)) => return Ok(None),
                    Err(e) => e,
                },
                Err(StoreError::InvalidTransition { .. }) | Err(StoreError::NotFound(_)) => {
                    return Ok(None)
                }
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= FINISH_ATTEMPTS {
                return Err(error.into());
            }
            let delay = FINISH_BACKOFF * 2u32.pow(attempt - 1);
            tracing::warn!(
                assessment_id = %id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Failed to store evaluation outcome, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn complete(
        &self,
        processing: &Assessment,
        result: AssessmentResult,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let id = processing.id;
        let mut result = result.normalized();
        if result.evaluated_at.is_none() {
            result.evaluated_at = Some(Utc::now());
        }
        if !processing.request.options.include_details {
            result = result.without_details();
        }
        let score = result.overall_score;
        let issue_count = result.issues.len();

        let update = AssessmentUpdate {
            state: Some(AssessmentState::Completed),
            message: Some("Assessment completed".to_string()),
            result: Some(result),
            ..Default::default()
        };
        if self.finish(id, processing.version, update).await?.is_none() {
            return Ok(ProcessOutcome::Cancelled);
        }

        tracing::info!(assessment_id = %id, score, issue_count, "Assessment completed");
        self.store
            .audit()
            .record_or_warn(
                AuditLogBuilder::system_action(AuditAction::AssessmentCompleted)
                    .on_target(id)
                    .with_detail("score", score)
                    .with_detail("issueCount", issue_count),
            )
            .await;
        Ok(ProcessOutcome::Completed { score })
    }

    async fn fail(
        &self,
        processing: &Assessment,
        err: EvaluationError,
    ) -> Result<ProcessOutcome, ProcessorError> {
        let id = processing.id;
        let message = err.to_string();
        let decision = match err {
            EvaluationError::Rejected(_) => RetryDecision::GiveUp,
            _ => self.settings.retry.decide(processing.retry_count),
        };

        match decision {
            RetryDecision::RetryAfter { delay, attempt } => {
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                let update = AssessmentUpdate {
                    state: Some(AssessmentState::Failed),
                    message: Some(format!(
                        "Retry {}/{} scheduled",
                        attempt, self.settings.retry.max_retries
                    )),
                    error_message: Some(Some(message.clone())),
                    retry_count: Some(attempt),
                    next_retry_at: Some(Some(retry_at)),
                    ..Default::default()
                };
                if self.finish(id, processing.version, update).await?.is_none() {
                    return Ok(ProcessOutcome::Cancelled);
                }
                tracing::warn!(
                    assessment_id = %id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Evaluation failed, retry scheduled"
                );
                self.store
                    .audit()
                    .record_or_warn(
                        AuditLogBuilder::system_action(AuditAction::AssessmentRetryScheduled)
                            .on_target(id)
                            .with_detail("attempt", attempt)
                            .with_detail("nextRetryAt", retry_at.to_rfc3339())
                            .with_error(message),
                    )
                    .await;
                Ok(ProcessOutcome::RetryScheduled { attempt, delay })
            }
            RetryDecision::GiveUp => {
                let update = AssessmentUpdate {
                    state: Some(AssessmentState::Failed),
                    message: Some("Assessment failed permanently".to_string()),
                    error_message: Some(Some(message.clone())),
                    next_retry_at: Some(None),
                    ..Default::default()
                };
                if self.finish(id, processing.version, update).await?.is_none() {
                    return Ok(ProcessOutcome::Cancelled);
                }
                tracing::error!(
                    assessment_id = %id,
                    retry_count = processing.retry_count,
                    error = %message,
                    "Assessment failed permanently"
                );
                self.store
                    .audit()
                    .record_or_warn(
                        AuditLogBuilder::system_action(AuditAction::AssessmentFailed)
                            .on_target(id)
                            .with_detail("retryCount", processing.retry_count)
                            .with_error(message),
                    )
                    .await;
                Ok(ProcessOutcome::Failed)
            }
        }
    }
}
