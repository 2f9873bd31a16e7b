//! Compliance evaluator abstraction and the local, file-backed implementation.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use super::compliance_rules::RuleEngine;
use crate::models::{
    AssessmentRequest, AssessmentResult, ConfigurationIssue, IssueCounts, IssueType,
    ServerComplianceStatus, ServerConfig, Severity,
};
use crate::models::server_config::parse_servers;

/// Errors returned by a compliance evaluator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluationError {
    #[error("evaluation timed out after {0}ms")]
    Timeout(u64),

    #[error("evaluator unavailable: {0}")]
    Unavailable(String),

    #[error("evaluator rejected the request: {0}")]
    Rejected(String),

    #[error("invalid evaluator response: {0}")]
    InvalidResponse(String),

    #[error("configuration could not be read: {0}")]
    Configuration(String),
}

/// Produces an [`AssessmentResult`] for an assessment request.
#[async_trait]
pub trait ComplianceEvaluator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn evaluate(
        &self,
        assessment_id: Uuid,
        request: &AssessmentRequest,
    ) -> Result<AssessmentResult, EvaluationError>;
}

/// A parsed managed configuration document.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    pub path: PathBuf,
    /// `None` when the file does not exist.
    pub content: Option<Value>,
}

/// Read a managed configuration file. A missing file is not an error.
pub async fn read_config_document(path: &Path) -> Result<ConfigDocument, EvaluationError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let content = serde_json::from_slice(&bytes).map_err(|e| {
                EvaluationError::Configuration(format!("{}: {}", path.display(), e))
            })?;
            Ok(ConfigDocument {
                path: path.to_path_buf(),
                content: Some(content),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigDocument {
            path: path.to_path_buf(),
            content: None,
        }),
        Err(e) => Err(EvaluationError::Configuration(format!(
            "{}: {}",
            path.display(),
            e
        ))),
    }
}

/// Servers declared across `paths`, with issues for entries that failed to parse.
/// When a name appears in several files the first declaration wins.
pub async fn load_server_configs(
    paths: &[PathBuf],
) -> Result<(Vec<ServerConfig>, Vec<ConfigurationIssue>), EvaluationError> {
    let mut servers: Vec<ServerConfig> = Vec::new();
    let mut issues = Vec::new();
    for path in paths {
        let document = read_config_document(path).await?;
        let Some(content) = document.content else {
            continue;
        };
        for (name, parsed) in parse_servers(&content) {
            if servers.iter().any(|s| s.name == name) {
                continue;
            }
            match parsed {
                Ok(server) => servers.push(server),
                Err(e) => issues.push(ConfigurationIssue {
                    server_name: name,
                    issue_type: IssueType::InvalidConfig,
                    severity: Severity::Critical,
                    details: json!({ "path": path.display().to_string(), "error": e.to_string() }),
                    recommendation: "Fix the server entry so it parses".to_string(),
                    rule_id: Some("entry_parses".to_string()),
                    auto_fix: None,
                }),
            }
        }
    }
    Ok((servers, issues))
}

/// Evaluates managed configuration files in-process with the rule engine.
pub struct LocalComplianceEvaluator {
    engine: Arc<RuleEngine>,
    config_paths: Vec<PathBuf>,
}

impl LocalComplianceEvaluator {
    pub fn new(engine: Arc<RuleEngine>, config_paths: Vec<PathBuf>) -> Self {
        Self {
            engine,
            config_paths,
        }
    }
}

#[async_trait]
impl ComplianceEvaluator for LocalComplianceEvaluator {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn evaluate(
        &self,
        assessment_id: Uuid,
        request: &AssessmentRequest,
    ) -> Result<AssessmentResult, EvaluationError> {
        let (mut servers, mut parse_issues) = load_server_configs(&self.config_paths).await?;
        if let Some(target) = &request.server_name {
            servers.retain(|s| &s.name == target);
            parse_issues.retain(|i| &i.server_name == target);
        }

        let categories = request.effective_categories();
        let mut result = self.engine.evaluate_all(&servers, &categories);

        let declared = !servers.is_empty() || !parse_issues.is_empty();
        if let (Some(target), false) = (&request.server_name, declared) {
            parse_issues.push(ConfigurationIssue {
                server_name: target.clone(),
                issue_type: IssueType::MissingConfig,
                severity: Severity::Critical,
                details: json!({ "searched": self.config_paths }),
                recommendation: format!("Install and configure server '{}'", target),
                rule_id: Some("server_declared".to_string()),
                auto_fix: None,
            });
        }

        for issue in &parse_issues {
            if !result.servers.iter().any(|s| s.server_name == issue.server_name) {
                result.servers.push(ServerComplianceStatus {
                    server_name: issue.server_name.clone(),
                    score: 0.0,
                    compliant: false,
                    issue_count: 1,
                });
            }
        }
        if !parse_issues.is_empty() {
            result.issues.extend(parse_issues);
            let n = result.servers.len() as f64;
            result.overall_score =
                (result.servers.iter().map(|s| s.score).sum::<f64>() / n * 10.0).round() / 10.0;
            result.issue_counts = IssueCounts::from_issues(&result.issues);
        }

        tracing::debug!(
            assessment_id = %assessment_id,
            servers = result.servers.len(),
            issues = result.issues.len(),
            score = result.overall_score,
            "Local compliance evaluation finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssessmentOptions, AssessmentType};

    fn request(server_name: Option<&str>) -> AssessmentRequest {
        AssessmentRequest {
            assessment_type: AssessmentType::Full,
            options: AssessmentOptions::default(),
            server_name: server_name.map(String::from),
            source: "test".into(),
        }
    }

    fn write(dir: &Path, name: &str, content: Value) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_vec_pretty(&content).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_evaluates_declared_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "servers.json",
            json!({"mcpServers": {
                "good": {"command": "node", "args": ["server.js"]},
                "bad": {"args": []}
            }}),
        );
        let evaluator = LocalComplianceEvaluator::new(Arc::new(RuleEngine::default()), vec![path]);
        let result = evaluator.evaluate(Uuid::new_v4(), &request(None)).await.unwrap();

        assert_eq!(result.servers.len(), 2);
        assert_eq!(result.issue_counts.critical, 1);
        assert!(result.overall_score < 100.0);
    }

    #[tokio::test]
    async fn test_missing_target_server_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "servers.json", json!({"mcpServers": {}}));
        let evaluator = LocalComplianceEvaluator::new(Arc::new(RuleEngine::default()), vec![path]);
        let result = evaluator
            .evaluate(Uuid::new_v4(), &request(Some("github")))
            .await
            .unwrap();

        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].issue_type, IssueType::MissingConfig);
        assert_eq!(result.overall_score, 0.0);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = LocalComplianceEvaluator::new(
            Arc::new(RuleEngine::default()),
            vec![dir.path().join("absent.json")],
        );
        let result = evaluator.evaluate(Uuid::new_v4(), &request(None)).await.unwrap();
        assert!(result.servers.is_empty());
        assert_eq!(result.overall_score, 100.0);
    }

    #[tokio::test]
    async fn test_invalid_json_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();
        let evaluator = LocalComplianceEvaluator::new(Arc::new(RuleEngine::default()), vec![path]);
        let err = evaluator.evaluate(Uuid::new_v4(), &request(None)).await.unwrap_err();
        assert!(matches!(err, EvaluationError::Configuration(_)));
    }
}
