//! Assessment domain models and the assessment state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use super::issue::{ConfigurationIssue, IssueCounts, RuleCategory};

/// Lifecycle state of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl AssessmentState {
    pub const ALL: [AssessmentState; 5] = [
        AssessmentState::Pending,
        AssessmentState::Processing,
        AssessmentState::Completed,
        AssessmentState::Failed,
        AssessmentState::Cancelled,
    ];

    /// States reachable from `self` in one step.
    pub fn allowed_transitions(&self) -> &'static [AssessmentState] {
        match self {
            AssessmentState::Pending => &[AssessmentState::Processing, AssessmentState::Cancelled],
            AssessmentState::Processing => &[
                AssessmentState::Completed,
                AssessmentState::Failed,
                AssessmentState::Cancelled,
            ],
            AssessmentState::Failed => &[AssessmentState::Processing],
            AssessmentState::Completed | AssessmentState::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: AssessmentState) -> bool {
        self.allowed_transitions().contains(&next)
    }

    /// COMPLETED and CANCELLED accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentState::Pending => "PENDING",
            AssessmentState::Processing => "PROCESSING",
            AssessmentState::Completed => "COMPLETED",
            AssessmentState::Failed => "FAILED",
            AssessmentState::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for AssessmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssessmentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(AssessmentState::Pending),
            "PROCESSING" => Ok(AssessmentState::Processing),
            "COMPLETED" => Ok(AssessmentState::Completed),
            "FAILED" => Ok(AssessmentState::Failed),
            "CANCELLED" => Ok(AssessmentState::Cancelled),
            _ => Err(format!("Unknown assessment state: {}", s)),
        }
    }
}

/// What kind of assessment was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssessmentType {
    Compliance,
    Security,
    Performance,
    Configuration,
    Full,
}

impl AssessmentType {
    /// Rule categories evaluated for this assessment type.
    pub fn categories(&self) -> Vec<RuleCategory> {
        match self {
            AssessmentType::Compliance | AssessmentType::Full => RuleCategory::ALL.to_vec(),
            AssessmentType::Security => vec![RuleCategory::Security],
            AssessmentType::Performance => vec![RuleCategory::Performance],
            AssessmentType::Configuration => {
                vec![RuleCategory::Configuration, RuleCategory::Integration]
            }
        }
    }

    /// Rough duration estimate reported back to the requester, in seconds.
    pub fn estimated_time_secs(&self) -> u64 {
        match self {
            AssessmentType::Full => 120,
            AssessmentType::Compliance => 60,
            _ => 30,
        }
    }
}

impl std::fmt::Display for AssessmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssessmentType::Compliance => write!(f, "compliance"),
            AssessmentType::Security => write!(f, "security"),
            AssessmentType::Performance => write!(f, "performance"),
            AssessmentType::Configuration => write!(f, "configuration"),
            AssessmentType::Full => write!(f, "full"),
        }
    }
}

/// Options attached to an assessment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentOptions {
    #[serde(default)]
    pub include_details: bool,
    /// Restricts evaluation to these categories when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<RuleCategory>>,
    /// Options the orchestrator passes through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The original request. Immutable once the assessment exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRequest {
    pub assessment_type: AssessmentType,
    #[serde(default)]
    pub options: AssessmentOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "shared::validation::validate_server_name"))]
    pub server_name: Option<String>,
    #[validate(length(min = 1, max = 128, message = "Source must be 1-128 characters"))]
    pub source: String,
}

impl AssessmentRequest {
    /// Categories to evaluate: explicit options win over the type's defaults.
    pub fn effective_categories(&self) -> Vec<RuleCategory> {
        match &self.options.categories {
            Some(categories) if !categories.is_empty() => categories.clone(),
            _ => self.assessment_type.categories(),
        }
    }
}

/// Compliance status of one server inside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerComplianceStatus {
    pub server_name: String,
    pub score: f64,
    pub compliant: bool,
    #[serde(default)]
    pub issue_count: u32,
}

/// Structured result of a completed assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentResult {
    pub overall_score: f64,
    #[serde(default)]
    pub servers: Vec<ServerComplianceStatus>,
    #[serde(default)]
    pub issues: Vec<ConfigurationIssue>,
    #[serde(default)]
    pub issue_counts: IssueCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluated_at: Option<DateTime<Utc>>,
}

impl AssessmentResult {
    /// Clamp the score and derive counts from the issue list.
    ///
    /// Remote evaluators are not trusted to send consistent counts.
    pub fn normalized(mut self) -> Self {
        if !self.overall_score.is_finite() {
            self.overall_score = 0.0;
        }
        self.overall_score = self.overall_score.clamp(0.0, 100.0);
        self.issue_counts = IssueCounts::from_issues(&self.issues);
        self
    }

    /// Drop issue details when the requester did not ask for them.
    pub fn without_details(mut self) -> Self {
        for issue in &mut self.issues {
            issue.details = serde_json::Value::Null;
        }
        self
    }
}

/// A unit of compliance work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: Uuid,
    pub state: AssessmentState,
    pub version: i64,
    pub progress: u8,
    pub message: String,
    pub request: AssessmentRequest,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AssessmentResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Assessment {
    /// A fresh PENDING record at version 1.
    pub fn new(request: AssessmentRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            state: AssessmentState::Pending,
            version: 1,
            progress: 0,
            message: "Assessment requested".to_string(),
            request,
            result: None,
            error_message: None,
            retry_count: 0,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn status(&self) -> AssessmentStatus {
        AssessmentStatus {
            id: self.id,
            state: self.state,
            progress: self.progress,
            message: self.message.clone(),
            created_at: self.created_at,
            last_updated: self.updated_at,
            completed_at: self.completed_at,
            retry_count: self.retry_count,
            next_retry_at: self.next_retry_at,
        }
    }

    /// FAILED with a scheduled retry that has come due.
    pub fn is_retry_due(&self, now: DateTime<Utc>) -> bool {
        self.state == AssessmentState::Failed
            && self.next_retry_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Lightweight status view returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentStatus {
    pub id: Uuid,
    pub state: AssessmentState,
    pub progress: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Aggregate counts over all assessments.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentStatistics {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    /// FAILED records with a scheduled retry.
    pub awaiting_retry: i64,
    pub average_score: Option<f64>,
    pub average_completion_secs: Option<f64>,
}

impl AssessmentStatistics {
    pub fn count_for(&self, state: AssessmentState) -> i64 {
        match state {
            AssessmentState::Pending => self.pending,
            AssessmentState::Processing => self.processing,
            AssessmentState::Completed => self.completed,
            AssessmentState::Failed => self.failed,
            AssessmentState::Cancelled => self.cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> AssessmentRequest {
        AssessmentRequest {
            assessment_type: AssessmentType::Compliance,
            options: AssessmentOptions::default(),
            server_name: None,
            source: "dashboard".to_string(),
        }
    }

    #[test]
    fn test_transition_table() {
        use AssessmentState::*;
        let allowed = [
            (Pending, Processing),
            (Pending, Cancelled),
            (Processing, Completed),
            (Processing, Failed),
            (Processing, Cancelled),
            (Failed, Processing),
        ];
        for from in AssessmentState::ALL {
            for to in AssessmentState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(AssessmentState::Completed.is_terminal());
        assert!(AssessmentState::Cancelled.is_terminal());
        assert!(!AssessmentState::Failed.is_terminal());
        assert!(!AssessmentState::Pending.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&AssessmentState::Completed).unwrap(),
            "\"COMPLETED\""
        );
        assert_eq!(
            "processing".parse::<AssessmentState>().unwrap(),
            AssessmentState::Processing
        );
    }

    #[test]
    fn test_new_assessment_is_pending_v1() {
        let assessment = Assessment::new(request());
        assert_eq!(assessment.state, AssessmentState::Pending);
        assert_eq!(assessment.version, 1);
        assert_eq!(assessment.retry_count, 0);
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let json = r#"{
            "assessmentType": "compliance",
            "options": {"includeDetails": true, "customFlag": 3},
            "serverName": "postgres",
            "source": "cli"
        }"#;
        let request: AssessmentRequest = serde_json::from_str(json).unwrap();
        assert!(request.options.include_details);
        assert_eq!(request.options.extra.get("customFlag"), Some(&serde_json::json!(3)));
        assert_eq!(request.server_name.as_deref(), Some("postgres"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_validation() {
        let mut bad = request();
        bad.source = String::new();
        assert!(bad.validate().is_err());

        let mut bad_name = request();
        bad_name.server_name = Some("not a name".to_string());
        assert!(bad_name.validate().is_err());
    }

    #[test]
    fn test_effective_categories() {
        let mut req = request();
        req.assessment_type = AssessmentType::Security;
        assert_eq!(req.effective_categories(), vec![RuleCategory::Security]);

        req.options.categories = Some(vec![RuleCategory::Performance]);
        assert_eq!(req.effective_categories(), vec![RuleCategory::Performance]);
    }

    #[test]
    fn test_result_normalized() {
        let result: AssessmentResult = serde_json::from_str(
            r#"{"overallScore":62,"issues":[{"severity":"critical","type":"missing_config"}]}"#,
        )
        .unwrap();
        let result = result.normalized();
        assert_eq!(result.overall_score, 62.0);
        assert_eq!(result.issue_counts.critical, 1);

        let clamped = AssessmentResult {
            overall_score: 140.0,
            ..result
        }
        .normalized();
        assert_eq!(clamped.overall_score, 100.0);
    }
}
