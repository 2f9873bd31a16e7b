//! Post-action checks run against the managed configuration files.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::command::resolve_executable;
use domain::models::server_config::{contains_server, parse_servers};
use domain::models::{
    RemediationAction, RemediationActionType, ServerConfig, Severity, TestResult,
};
use domain::services::evaluator::read_config_document;
use domain::services::RuleEngine;

pub const CONFIGURATION_INTEGRITY: &str = "configuration_integrity";
pub const HEALTH_CHECK: &str = "health_check";
pub const SERVER_PRESENT: &str = "server_present";
pub const SERVER_ABSENT: &str = "server_absent";
pub const ISSUES_RESOLVED: &str = "issues_resolved";

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Runs verification checks for executed actions.
pub struct Verifier {
    engine: Arc<RuleEngine>,
    config_paths: Vec<PathBuf>,
}

impl Verifier {
    pub fn new(engine: Arc<RuleEngine>, config_paths: Vec<PathBuf>) -> Self {
        Self {
            engine,
            config_paths,
        }
    }

    pub fn config_paths(&self) -> &[PathBuf] {
        &self.config_paths
    }

    /// Every check that applies to `action`, in order.
    pub async fn verify(&self, action: &RemediationAction) -> Vec<TestResult> {
        let (integrity, documents) = self.configuration_integrity().await;
        let mut tests = vec![integrity];

        let servers = declared_servers(&documents);
        if action.action_type.expects_running_server() {
            tests.push(health_check(action, &servers));
        }
        tests.push(self.type_check(action, &documents, &servers));
        tests
    }

    async fn configuration_integrity(&self) -> (TestResult, Vec<Value>) {
        let start = Instant::now();
        let mut documents = Vec::new();
        let mut problems = Vec::new();

        for path in &self.config_paths {
            match read_config_document(path).await {
                Ok(document) => match document.content {
                    Some(content) => documents.push(content),
                    None => problems.push(format!("{} is missing", path.display())),
                },
                Err(e) => problems.push(e.to_string()),
            }
        }

        let result = if self.config_paths.is_empty() {
            TestResult::pass(
                CONFIGURATION_INTEGRITY,
                "No managed configuration files",
                elapsed_ms(start),
            )
        } else if documents.is_empty() || problems.iter().any(|p| !p.ends_with("is missing")) {
            let message = if problems.is_empty() {
                "No managed configuration file is present".to_string()
            } else {
                problems.join("; ")
            };
            TestResult::fail(CONFIGURATION_INTEGRITY, message, elapsed_ms(start))
        } else {
            TestResult::pass(
                CONFIGURATION_INTEGRITY,
                format!("{} configuration file(s) parsed", documents.len()),
                elapsed_ms(start),
            )
        };
        (result, documents)
    }

    fn type_check(
        &self,
        action: &RemediationAction,
        documents: &[Value],
        servers: &[ServerConfig],
    ) -> TestResult {
        let start = Instant::now();
        let declared = documents
            .iter()
            .any(|doc| contains_server(doc, &action.server_name));

        match action.action_type {
            RemediationActionType::InstallServer | RemediationActionType::UpdateServer => {
                if declared {
                    TestResult::pass(
                        SERVER_PRESENT,
                        format!("{} is declared", action.server_name),
                        elapsed_ms(start),
                    )
                } else {
                    TestResult::fail(
                        SERVER_PRESENT,
                        format!("{} is not declared", action.server_name),
                        elapsed_ms(start),
                    )
                }
            }
            RemediationActionType::RemoveServer => {
                if declared {
                    TestResult::fail(
                        SERVER_ABSENT,
                        format!("{} is still declared", action.server_name),
                        elapsed_ms(start),
                    )
                } else {
                    TestResult::pass(
                        SERVER_ABSENT,
                        format!("{} was removed", action.server_name),
                        elapsed_ms(start),
                    )
                }
            }
            RemediationActionType::SecurityFix | RemediationActionType::PerformanceFix => {
                let Some(category) = action.action_type.fixed_category() else {
                    return TestResult::pass(ISSUES_RESOLVED, "Nothing to check", elapsed_ms(start));
                };
                let Some(server) = servers.iter().find(|s| s.name == action.server_name) else {
                    return TestResult::fail(
                        ISSUES_RESOLVED,
                        format!("{} is not declared", action.server_name),
                        elapsed_ms(start),
                    );
                };

                let evaluation = self.engine.evaluate_server(server, &[category]);
                let remaining: Vec<String> = evaluation
                    .issues
                    .iter()
                    .filter(|i| i.severity >= Severity::High)
                    .map(|i| i.rule_id.clone().unwrap_or_else(|| i.issue_type.to_string()))
                    .collect();
                if remaining.is_empty() {
                    TestResult::pass(
                        ISSUES_RESOLVED,
                        format!("No {} issue at high severity or above", category),
                        elapsed_ms(start),
                    )
                } else {
                    TestResult::fail(
                        ISSUES_RESOLVED,
                        format!("Remaining {} issues: {}", category, remaining.join(", ")),
                        elapsed_ms(start),
                    )
                }
            }
        }
    }
}

/// Servers across documents; the first declaration of a name wins.
fn declared_servers(documents: &[Value]) -> Vec<ServerConfig> {
    let mut servers: Vec<ServerConfig> = Vec::new();
    for document in documents {
        for (name, parsed) in parse_servers(document) {
            if servers.iter().any(|s| s.name == name) {
                continue;
            }
            if let Ok(server) = parsed {
                servers.push(server);
            }
        }
    }
    servers
}

fn health_check(action: &RemediationAction, servers: &[ServerConfig]) -> TestResult {
    let start = Instant::now();
    let Some(server) = servers.iter().find(|s| s.name == action.server_name) else {
        return TestResult::fail(
            HEALTH_CHECK,
            format!("{} is not declared", action.server_name),
            elapsed_ms(start),
        );
    };

    if server.transport.is_remote() {
        return match server.url.as_deref().filter(|u| !u.trim().is_empty()) {
            Some(url) => TestResult::pass(HEALTH_CHECK, format!("Remote endpoint {}", url), elapsed_ms(start)),
            None => TestResult::fail(HEALTH_CHECK, "Remote server has no url", elapsed_ms(start)),
        };
    }

    match server.command.as_deref() {
        Some(command) => match resolve_executable(command) {
            Ok(path) => TestResult::pass(
                HEALTH_CHECK,
                format!("{} resolves to {}", command, path.display()),
                elapsed_ms(start),
            ),
            Err(e) => TestResult::fail(HEALTH_CHECK, e.to_string(), elapsed_ms(start)),
        },
        None => TestResult::fail(HEALTH_CHECK, "Server has no command", elapsed_ms(start)),
    }
}
