//! Configuration issue models produced by the compliance rule engine.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Severity of a finding. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Weight used when aggregating scores.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 3,
            Severity::High => 6,
            Severity::Critical => 10,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Kind of configuration problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    MissingConfig,
    IncompleteConfig,
    InvalidConfig,
    Security,
    Performance,
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IssueType::MissingConfig => write!(f, "missing_config"),
            IssueType::IncompleteConfig => write!(f, "incomplete_config"),
            IssueType::InvalidConfig => write!(f, "invalid_config"),
            IssueType::Security => write!(f, "security"),
            IssueType::Performance => write!(f, "performance"),
        }
    }
}

/// Rule categories understood by the rule engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Security,
    Performance,
    Configuration,
    Integration,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 4] = [
        RuleCategory::Security,
        RuleCategory::Performance,
        RuleCategory::Configuration,
        RuleCategory::Integration,
    ];
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleCategory::Security => write!(f, "security"),
            RuleCategory::Performance => write!(f, "performance"),
            RuleCategory::Configuration => write!(f, "configuration"),
            RuleCategory::Integration => write!(f, "integration"),
        }
    }
}

/// Machine-applicable fix suggested by a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoFix {
    /// Human-readable description of the fix.
    pub description: String,
    /// JSON merge patch to apply to the server entry.
    #[serde(default)]
    pub patch: serde_json::Value,
}

/// One finding recorded against a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationIssue {
    #[serde(default)]
    pub server_name: String,
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default)]
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<AutoFix>,
}

/// Issue counts by severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCounts {
    #[serde(default)]
    pub critical: u32,
    #[serde(default)]
    pub high: u32,
    #[serde(default)]
    pub medium: u32,
    #[serde(default)]
    pub low: u32,
}

impl IssueCounts {
    pub fn from_issues(issues: &[ConfigurationIssue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            counts.add(issue.severity);
        }
        counts
    }

    pub fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low
    }
}
