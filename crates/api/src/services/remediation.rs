//! Remediation workflow: proposals, human approval and hand-off to the
//! execution engine.
//!
//! Nothing executes without an explicit `approved` decision. Approval moves a
//! proposal `pending_approval -> approved -> executing`, the actions run in the
//! background and the proposal ends `completed` or `failed`. Dry runs report
//! what would happen and leave the proposal undecided.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::task::TaskTracker;
use uuid::Uuid;
use validator::Validate;

use super::execution_engine::{ExecutionContext, ExecutionEngine, ExecutionError};
use domain::models::{
    ActiveExecution, ApprovalDecision, ApproveRemediationRequest, AssessmentState, AuditAction,
    ExecutionLookup, ExecutionOptions, ExecutionStatus, ProposalStatus, ProposeRemediationRequest,
    RemediationProposal,
};
use domain::repositories::{RemediationRepository, RepositoryError};
use domain::services::remediation_planner::{self, RemediationPlan};
use domain::services::{AssessmentStore, AuditLogBuilder, AuditLogger, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    #[error("approval {0} not found")]
    ApprovalNotFound(Uuid),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    #[error("approval {approval_id} was already decided ({status})")]
    AlreadyDecided {
        approval_id: Uuid,
        status: ProposalStatus,
    },

    #[error("assessment {id} is {state}, remediation needs a completed assessment")]
    AssessmentNotCompleted { id: Uuid, state: AssessmentState },

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Execution(ExecutionError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<ExecutionError> for RemediationError {
    fn from(err: ExecutionError) -> Self {
        match err {
            ExecutionError::NotFound(id) => RemediationError::ExecutionNotFound(id),
            other => RemediationError::Execution(other),
        }
    }
}

/// Response to a successful proposal.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalCreated {
    pub proposal_id: Uuid,
    pub approval_id: Uuid,
    pub status: ProposalStatus,
    pub estimated_time: u64,
}

/// Response to an approval decision.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalOutcome {
    pub proposal_id: Uuid,
    pub approval_id: Uuid,
    pub status: ProposalStatus,
    pub dry_run: bool,
    /// Per-action reports, only for dry runs.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<domain::models::ExecutionResult>,
}

pub struct RemediationService {
    store: Arc<AssessmentStore>,
    repo: Arc<dyn RemediationRepository>,
    engine: Arc<ExecutionEngine>,
    audit: AuditLogger,
    tasks: TaskTracker,
}

impl RemediationService {
    pub fn new(
        store: Arc<AssessmentStore>,
        repo: Arc<dyn RemediationRepository>,
        engine: Arc<ExecutionEngine>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            store,
            repo,
            engine,
            audit,
            tasks: TaskTracker::new(),
        }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Record a proposal awaiting approval.
    pub async fn propose(
        &self,
        request: ProposeRemediationRequest,
        actor: &str,
    ) -> Result<ProposalCreated, RemediationError> {
        request
            .validate()
            .map_err(|e| RemediationError::Validation(e.to_string()))?;

        let mut seen = HashSet::new();
        if let Some(duplicate) = request.actions.iter().find(|a| !seen.insert(a.id)) {
            return Err(RemediationError::Validation(format!(
                "actions: duplicate action id {}",
                duplicate.id
            )));
        }

        let assessment = self.store.get_assessment_data(request.assessment_id).await?;
        if assessment.state != AssessmentState::Completed {
            return Err(RemediationError::AssessmentNotCompleted {
                id: assessment.id,
                state: assessment.state,
            });
        }

        let proposal = RemediationProposal::new(request, actor);
        self.repo.insert_proposal(&proposal).await?;

        tracing::info!(
            proposal_id = %proposal.id,
            assessment_id = %proposal.assessment_id,
            actions = proposal.actions.len(),
            "Remediation proposed"
        );
        self.audit
            .record_or_warn(
                AuditLogBuilder::actor_action(actor, AuditAction::RemediationProposed)
                    .on_target(proposal.id)
                    .with_detail("assessmentId", proposal.assessment_id.to_string())
                    .with_detail("approvalId", proposal.approval_id.to_string())
                    .with_detail("actionCount", proposal.actions.len() as u64)
                    .with_detail("riskLevel", proposal.risk_assessment.level.to_string()),
            )
            .await;

        Ok(ProposalCreated {
            proposal_id: proposal.id,
            approval_id: proposal.approval_id,
            status: proposal.status,
            estimated_time: proposal.estimated_time_secs,
        })
    }

    /// Advisory suggestions for a completed assessment.
    pub async fn suggestions(&self, assessment_id: Uuid) -> Result<RemediationPlan, RemediationError> {
        let assessment = self.store.get_assessment_data(assessment_id).await?;
        match (assessment.state, assessment.result) {
            (AssessmentState::Completed, Some(result)) => Ok(remediation_planner::plan(&result)),
            (state, _) => Err(RemediationError::AssessmentNotCompleted {
                id: assessment_id,
                state,
            }),
        }
    }

    pub async fn get_proposal(&self, id: Uuid) -> Result<RemediationProposal, RemediationError> {
        self.repo
            .find_proposal(id)
            .await?
            .ok_or_else(|| RemediationError::Repository(RepositoryError::NotFound(format!("Proposal {}", id))))
    }

    /// Apply a decision. An approval starts execution in the background and
    /// returns immediately with status `executing`.
    pub async fn approve(
        &self,
        request: ApproveRemediationRequest,
        actor: &str,
    ) -> Result<ApprovalOutcome, RemediationError> {
        request
            .validate()
            .map_err(|e| RemediationError::Validation(e.to_string()))?;

        let proposal = self
            .repo
            .find_proposal_by_approval_id(request.approval_id)
            .await?
            .ok_or(RemediationError::ApprovalNotFound(request.approval_id))?;
        if proposal.status != ProposalStatus::PendingApproval {
            return Err(RemediationError::AlreadyDecided {
                approval_id: proposal.approval_id,
                status: proposal.status,
            });
        }

        match request.decision {
            ApprovalDecision::Rejected => self.reject(proposal, request.reason.as_deref(), actor).await,
            ApprovalDecision::Approved if request.dry_run => self.dry_run(proposal, actor).await,
            ApprovalDecision::Approved => {
                self.start_execution(proposal, request.reason.as_deref(), actor)
                    .await
            }
        }
    }

    async fn transition(
        &self,
        proposal: &RemediationProposal,
        from: ProposalStatus,
        to: ProposalStatus,
        decided_by: Option<&str>,
        reason: Option<&str>,
    ) -> Result<(), RemediationError> {
        if self
            .repo
            .update_proposal_status(proposal.id, from, to, decided_by, reason)
            .await?
        {
            return Ok(());
        }
        let current = self
            .repo
            .find_proposal(proposal.id)
            .await?
            .map(|p| p.status)
            .unwrap_or(from);
        Err(RemediationError::AlreadyDecided {
            approval_id: proposal.approval_id,
            status: current,
        })
    }

    async fn reject(
        &self,
        proposal: RemediationProposal,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<ApprovalOutcome, RemediationError> {
        self.transition(
            &proposal,
            ProposalStatus::PendingApproval,
            ProposalStatus::Rejected,
            Some(actor),
            reason,
        )
        .await?;

        tracing::info!(proposal_id = %proposal.id, actor = %actor, "Remediation rejected");
        let mut entry = AuditLogBuilder::actor_action(actor, AuditAction::RemediationRejected)
            .on_target(proposal.id)
            .with_detail("approvalId", proposal.approval_id.to_string());
        if let Some(reason) = reason {
            entry = entry.with_detail("reason", reason);
        }
        self.audit.record_or_warn(entry).await;

        Ok(ApprovalOutcome {
            proposal_id: proposal.id,
            approval_id: proposal.approval_id,
            status: ProposalStatus::Rejected,
            dry_run: false,
            results: Vec::new(),
        })
    }

    async fn dry_run(
        &self,
        proposal: RemediationProposal,
        actor: &str,
    ) -> Result<ApprovalOutcome, RemediationError> {
        let options = ExecutionOptions {
            dry_run: true,
            ..ExecutionOptions::default()
        };
        let context = ExecutionContext::new(actor, Some(proposal.id));
        let results = self
            .engine
            .execute_actions(&proposal.actions, &options, &context)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ApprovalOutcome {
            proposal_id: proposal.id,
            approval_id: proposal.approval_id,
            status: proposal.status,
            dry_run: true,
            results,
        })
    }

    async fn start_execution(
        &self,
        proposal: RemediationProposal,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<ApprovalOutcome, RemediationError> {
        self.transition(
            &proposal,
            ProposalStatus::PendingApproval,
            ProposalStatus::Approved,
            Some(actor),
            reason,
        )
        .await?;
        self.audit
            .record_or_warn(
                AuditLogBuilder::actor_action(actor, AuditAction::RemediationApproved)
                    .on_target(proposal.id)
                    .with_detail("approvalId", proposal.approval_id.to_string())
                    .with_detail("actionCount", proposal.actions.len() as u64),
            )
            .await;

        self.transition(
            &proposal,
            ProposalStatus::Approved,
            ProposalStatus::Executing,
            None,
            None,
        )
        .await?;

        tracing::info!(
            proposal_id = %proposal.id,
            actor = %actor,
            actions = proposal.actions.len(),
            "Remediation approved, executing"
        );

        let outcome = ApprovalOutcome {
            proposal_id: proposal.id,
            approval_id: proposal.approval_id,
            status: ProposalStatus::Executing,
            dry_run: false,
            results: Vec::new(),
        };

        let engine = Arc::clone(&self.engine);
        let repo = Arc::clone(&self.repo);
        let context = ExecutionContext::new(actor, Some(proposal.id));
        self.tasks.spawn(async move {
            let results = engine
                .execute_actions(&proposal.actions, &ExecutionOptions::default(), &context)
                .await;
            let succeeded = results
                .iter()
                .all(|r| matches!(r, Ok(result) if result.status == ExecutionStatus::Success));
            for error in results.iter().filter_map(|r| r.as_ref().err()) {
                tracing::warn!(proposal_id = %proposal.id, error = %error, "Remediation action not executed");
            }

            let to = if succeeded {
                ProposalStatus::Completed
            } else {
                ProposalStatus::Failed
            };
            match repo
                .update_proposal_status(proposal.id, ProposalStatus::Executing, to, None, None)
                .await
            {
                Ok(true) => tracing::info!(proposal_id = %proposal.id, status = %to, "Remediation finished"),
                Ok(false) => tracing::warn!(proposal_id = %proposal.id, "Proposal left executing state unexpectedly"),
                Err(e) => tracing::error!(proposal_id = %proposal.id, error = %e, "Failed to finalize proposal"),
            }
        });

        Ok(outcome)
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Result<ExecutionLookup, RemediationError> {
        Ok(self.engine.get_execution_status(execution_id).await?)
    }

    pub async fn cancel_execution(
        &self,
        execution_id: Uuid,
        actor: &str,
    ) -> Result<ActiveExecution, RemediationError> {
        let cancelled = self.engine.cancel_execution(execution_id)?;
        self.audit
            .record_or_warn(
                AuditLogBuilder::actor_action(actor, AuditAction::RemediationCancelled)
                    .on_target(cancelled.action_id)
                    .with_detail("executionId", execution_id.to_string())
                    .with_detail("serverName", cancelled.server_name.as_str()),
            )
            .await;
        Ok(cancelled)
    }

    /// Wait for background executions to finish.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }
}
