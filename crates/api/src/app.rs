use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{Config, EvaluatorMode};
use crate::middleware::{metrics_handler, metrics_middleware, require_auth, trace_id};
use crate::routes::{assessments, audit_logs, health, remediation};
use crate::services::{
    AssessmentProcessor, EngineSettings, ExecutionEngine, ProcessorSettings,
    RemediationService, RemoteComplianceEvaluator,
};
use domain::repositories::memory::{
    InMemoryAssessmentRepository, InMemoryAuditLogRepository, InMemoryRemediationRepository,
    InMemorySystemMetricRepository,
};
use domain::repositories::{
    AssessmentRepository, AuditLogRepository, RemediationRepository, SystemMetricRepository,
};
use domain::services::{
    AssessmentStore, AuditLogger, CircuitBreaker, ComplianceEvaluator, LocalComplianceEvaluator,
    RuleEngine,
};
use persistence::repositories::{
    PgAssessmentRepository, PgAuditLogRepository, PgRemediationRepository,
    PgSystemMetricRepository,
};

/// Storage behind the services.
#[derive(Clone)]
pub struct Repositories {
    pub assessments: Arc<dyn AssessmentRepository>,
    pub audit_logs: Arc<dyn AuditLogRepository>,
    pub remediation: Arc<dyn RemediationRepository>,
    pub metrics: Arc<dyn SystemMetricRepository>,
}

impl Repositories {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            assessments: Arc::new(PgAssessmentRepository::new(pool.clone())),
            audit_logs: Arc::new(PgAuditLogRepository::new(pool.clone())),
            remediation: Arc::new(PgRemediationRepository::new(pool.clone())),
            metrics: Arc::new(PgSystemMetricRepository::new(pool)),
        }
    }

    /// Process-local storage for tests and development without a database.
    pub fn in_memory() -> Self {
        Self {
            assessments: Arc::new(InMemoryAssessmentRepository::new()),
            audit_logs: Arc::new(InMemoryAuditLogRepository::new()),
            remediation: Arc::new(InMemoryRemediationRepository::new()),
            metrics: Arc::new(InMemorySystemMetricRepository::new()),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<AssessmentStore>,
    pub processor: Arc<AssessmentProcessor>,
    pub remediation: Arc<RemediationService>,
    pub audit: AuditLogger,
    pub repositories: Repositories,
    /// Present when backed by Postgres; used for pool metrics.
    pub pool: Option<PgPool>,
}

impl AppState {
    /// Wire every service, picking the evaluator from `[evaluator]`.
    pub fn build(
        config: Config,
        repositories: Repositories,
        pool: Option<PgPool>,
    ) -> anyhow::Result<Self> {
        let evaluator: Arc<dyn ComplianceEvaluator> = match config.evaluator.mode {
            EvaluatorMode::Remote => Arc::new(RemoteComplianceEvaluator::new(&config.evaluator)?),
            EvaluatorMode::Local => Arc::new(LocalComplianceEvaluator::new(
                Arc::new(RuleEngine::with_default_rules()),
                config.execution.managed_config_paths.clone(),
            )),
        };
        tracing::info!(evaluator = evaluator.name(), "Compliance evaluator selected");
        Ok(Self::with_evaluator(config, repositories, pool, evaluator))
    }

    pub fn with_evaluator(
        config: Config,
        repositories: Repositories,
        pool: Option<PgPool>,
        evaluator: Arc<dyn ComplianceEvaluator>,
    ) -> Self {
        let audit = AuditLogger::new(repositories.audit_logs.clone());
        let store = Arc::new(AssessmentStore::new(
            repositories.assessments.clone(),
            audit.clone(),
        ));

        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_breaker.failure_threshold,
            Duration::from_secs(config.circuit_breaker.reset_timeout_secs),
        ));
        let processor = Arc::new(AssessmentProcessor::new(
            store.clone(),
            evaluator,
            breaker,
            ProcessorSettings::from_config(&config.processor),
        ));

        let engine = Arc::new(ExecutionEngine::new(
            EngineSettings::from_config(&config.execution),
            Arc::new(RuleEngine::with_default_rules()),
            repositories.remediation.clone(),
            audit.clone(),
        ));
        let remediation = Arc::new(RemediationService::new(
            store.clone(),
            repositories.remediation.clone(),
            engine,
            audit.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            processor,
            remediation,
            audit,
            repositories,
            pool,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let config = state.config.clone();

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Protected routes (require API key authentication)
    let protected_routes = Router::new()
        // Assessment routes (v1)
        .route(
            "/api/v1/assessment/request",
            post(assessments::request_assessment),
        )
        .route(
            "/api/v1/assessment/results/:id",
            get(assessments::get_results),
        )
        .route("/api/v1/assessment/status/:id", get(assessments::get_status))
        .route("/api/v1/assessment/list", get(assessments::list_assessments))
        .route(
            "/api/v1/assessment/statistics",
            get(assessments::get_statistics),
        )
        .route(
            "/api/v1/assessment/processor",
            get(assessments::get_processor_status),
        )
        .route("/api/v1/assessment/:id", delete(assessments::cancel_assessment))
        // Remediation routes (v1)
        .route("/api/v1/remediation/propose", post(remediation::propose))
        .route(
            "/api/v1/remediation/suggestions/:assessment_id",
            get(remediation::suggestions),
        )
        .route("/api/v1/remediation/approve", post(remediation::approve))
        .route(
            "/api/v1/remediation/proposals/:id",
            get(remediation::get_proposal),
        )
        .route(
            "/api/v1/remediation/executions",
            get(remediation::list_active_executions),
        )
        .route(
            "/api/v1/remediation/executions/:id",
            get(remediation::get_execution).delete(remediation::cancel_execution),
        )
        .route("/api/v1/remediation/stats", get(remediation::get_stats))
        // Audit routes (v1)
        .route("/api/v1/audit/logs", get(audit_logs::list_audit_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        // Global middleware (order matters: bottom layers run first)
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware)) // Prometheus metrics
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id)) // Request ID and logging
        .layer(cors)
        .with_state(state)
}
