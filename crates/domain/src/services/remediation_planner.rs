//! Turns assessment findings into remediation suggestions.
//!
//! Suggestions are advisory. Operators turn them into concrete
//! [`RemediationAction`](crate::models::RemediationAction)s and submit a proposal;
//! nothing here executes anything.

use serde::Serialize;

use crate::models::{
    AssessmentResult, ConfigurationIssue, IssueType, RemediationActionType, RiskAssessment,
    Severity,
};

/// One suggested remedy for one issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationSuggestion {
    pub server_name: String,
    pub action_type: RemediationActionType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub description: String,
    /// Merge patch for the server entry when the rule supplied one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch: Option<serde_json::Value>,
    pub automatable: bool,
}

/// Planner output for one assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationPlan {
    pub suggestions: Vec<RemediationSuggestion>,
    pub risk_assessment: RiskAssessment,
}

fn action_type_for(issue: &ConfigurationIssue) -> RemediationActionType {
    match issue.issue_type {
        IssueType::MissingConfig => RemediationActionType::InstallServer,
        IssueType::Security => RemediationActionType::SecurityFix,
        IssueType::Performance => RemediationActionType::PerformanceFix,
        IssueType::IncompleteConfig | IssueType::InvalidConfig => {
            RemediationActionType::UpdateServer
        }
    }
}

/// Suggestions ordered most severe first.
pub fn plan(result: &AssessmentResult) -> RemediationPlan {
    let mut suggestions: Vec<RemediationSuggestion> = result
        .issues
        .iter()
        .map(|issue| RemediationSuggestion {
            server_name: issue.server_name.clone(),
            action_type: action_type_for(issue),
            severity: issue.severity,
            rule_id: issue.rule_id.clone(),
            description: issue
                .auto_fix
                .as_ref()
                .map(|f| f.description.clone())
                .unwrap_or_else(|| issue.recommendation.clone()),
            patch: issue.auto_fix.as_ref().map(|f| f.patch.clone()),
            automatable: issue.auto_fix.is_some(),
        })
        .collect();
    suggestions.sort_by(|a, b| b.severity.cmp(&a.severity));

    RemediationPlan {
        risk_assessment: assess_risk(&suggestions),
        suggestions,
    }
}

fn assess_risk(suggestions: &[RemediationSuggestion]) -> RiskAssessment {
    let Some(level) = suggestions.iter().map(|s| s.severity).max() else {
        return RiskAssessment {
            level: Severity::Low,
            summary: "No remediation required".to_string(),
            factors: Vec::new(),
        };
    };

    let mut factors = Vec::new();
    if suggestions
        .iter()
        .any(|s| s.action_type == RemediationActionType::InstallServer)
    {
        factors.push("installs new server packages".to_string());
    }
    let manual = suggestions.iter().filter(|s| !s.automatable).count();
    if manual > 0 {
        factors.push(format!("{} suggestion(s) need manual input", manual));
    }
    let servers: std::collections::BTreeSet<&str> =
        suggestions.iter().map(|s| s.server_name.as_str()).collect();

    RiskAssessment {
        level,
        summary: format!(
            "{} suggestion(s) across {} server(s)",
            suggestions.len(),
            servers.len()
        ),
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutoFix, IssueCounts};
    use serde_json::json;

    fn issue(issue_type: IssueType, severity: Severity, fix: bool) -> ConfigurationIssue {
        ConfigurationIssue {
            server_name: "github".into(),
            issue_type,
            severity,
            details: json!({}),
            recommendation: "do the thing".into(),
            rule_id: Some("rule".into()),
            auto_fix: fix.then(|| AutoFix {
                description: "apply patch".into(),
                patch: json!({"timeoutMs": 30000}),
            }),
        }
    }

    fn result(issues: Vec<ConfigurationIssue>) -> AssessmentResult {
        AssessmentResult {
            overall_score: 50.0,
            servers: vec![],
            issue_counts: IssueCounts::from_issues(&issues),
            issues,
            evaluated_at: None,
        }
    }

    #[test]
    fn test_plan_orders_by_severity() {
        let plan = plan(&result(vec![
            issue(IssueType::Performance, Severity::Low, true),
            issue(IssueType::MissingConfig, Severity::Critical, false),
        ]));
        assert_eq!(plan.suggestions[0].action_type, RemediationActionType::InstallServer);
        assert!(!plan.suggestions[0].automatable);
        assert_eq!(plan.suggestions[1].action_type, RemediationActionType::PerformanceFix);
        assert_eq!(plan.suggestions[1].description, "apply patch");
        assert_eq!(plan.risk_assessment.level, Severity::Critical);
        assert_eq!(plan.risk_assessment.factors.len(), 2);
    }

    #[test]
    fn test_empty_plan_is_low_risk() {
        let plan = plan(&result(vec![]));
        assert!(plan.suggestions.is_empty());
        assert_eq!(plan.risk_assessment.level, Severity::Low);
    }
}
