//! Compliance rule engine.
//!
//! Rules are independent, stateless checks over a single [`ServerConfig`].
//! The engine runs every registered rule in the requested categories and
//! aggregates the outcomes into a severity-weighted score and a list of issues.

use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::json;

use crate::models::{
    AssessmentResult, AutoFix, ConfigurationIssue, IssueCounts, IssueType, RuleCategory,
    ServerComplianceStatus, ServerConfig, Severity, Transport,
};
use shared::validation::is_env_reference;

/// Accepted range for `timeout_ms`.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 300_000;

lazy_static! {
    static ref SECRET_KEY_RE: Regex =
        Regex::new(r"(?i)(token|secret|password|passwd|api[_-]?key|credential|private[_-]?key)")
            .unwrap();
    static ref SHELL_META_RE: Regex = Regex::new(r"(\|\||&&|[|;`]|\$\()").unwrap();
}

const SHELLS: [&str; 6] = ["sh", "bash", "zsh", "dash", "cmd", "powershell"];

/// Outcome of one rule against one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub passed: bool,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_fix: Option<AutoFix>,
}

impl RuleOutcome {
    pub fn pass(severity: Severity) -> Self {
        Self {
            passed: true,
            severity,
            message: String::new(),
            auto_fix: None,
        }
    }

    pub fn fail(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            passed: false,
            severity,
            message: message.into(),
            auto_fix: None,
        }
    }

    pub fn with_fix(mut self, description: impl Into<String>, patch: serde_json::Value) -> Self {
        self.auto_fix = Some(AutoFix {
            description: description.into(),
            patch,
        });
        self
    }
}

/// A named compliance check.
pub trait ComplianceRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn category(&self) -> RuleCategory;
    fn issue_type(&self) -> IssueType;
    fn severity(&self) -> Severity;
    fn recommendation(&self) -> &'static str;
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome;
}

// ============================================================================
// Built-in rules
// ============================================================================

struct CommandPresent;

impl ComplianceRule for CommandPresent {
    fn id(&self) -> &'static str {
        "command_present"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Configuration
    }
    fn issue_type(&self) -> IssueType {
        IssueType::MissingConfig
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
    fn recommendation(&self) -> &'static str {
        "Set the command used to launch the server"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        if server.transport.is_remote() {
            return RuleOutcome::pass(self.severity());
        }
        match server.command.as_deref().map(str::trim) {
            Some(cmd) if !cmd.is_empty() => RuleOutcome::pass(self.severity()),
            _ => RuleOutcome::fail(self.severity(), "stdio server has no command"),
        }
    }
}

struct ArgsWellFormed;

impl ComplianceRule for ArgsWellFormed {
    fn id(&self) -> &'static str {
        "args_well_formed"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Configuration
    }
    fn issue_type(&self) -> IssueType {
        IssueType::InvalidConfig
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Remove empty or whitespace-padded arguments"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        let bad: Vec<usize> = server
            .args
            .iter()
            .enumerate()
            .filter(|(_, a)| a.is_empty() || a.trim() != a.as_str() || a.contains('\0'))
            .map(|(i, _)| i)
            .collect();
        if bad.is_empty() {
            return RuleOutcome::pass(self.severity());
        }
        let cleaned: Vec<&str> = server
            .args
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .collect();
        RuleOutcome::fail(
            self.severity(),
            format!("malformed arguments at positions {:?}", bad),
        )
        .with_fix("Trim arguments and drop empty ones", json!({ "args": cleaned }))
    }
}

struct PlaintextSecrets;

impl ComplianceRule for PlaintextSecrets {
    fn id(&self) -> &'static str {
        "plaintext_secrets"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }
    fn issue_type(&self) -> IssueType {
        IssueType::Security
    }
    fn severity(&self) -> Severity {
        Severity::High
    }
    fn recommendation(&self) -> &'static str {
        "Reference secrets from the environment instead of storing them inline"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        let exposed: Vec<&String> = server
            .env
            .iter()
            .filter(|(k, v)| SECRET_KEY_RE.is_match(k) && !v.is_empty() && !is_env_reference(v))
            .map(|(k, _)| k)
            .collect();
        if exposed.is_empty() {
            return RuleOutcome::pass(self.severity());
        }
        let patch: serde_json::Map<String, serde_json::Value> = exposed
            .iter()
            .map(|k| (k.to_string(), json!(format!("${{{}}}", k))))
            .collect();
        RuleOutcome::fail(
            self.severity(),
            format!("plaintext secret values in {:?}", exposed),
        )
        .with_fix("Replace inline secrets with environment references", json!({ "env": patch }))
    }
}

fn is_loopback(url: &str) -> bool {
    let rest = url.split("://").nth(1).unwrap_or("");
    if rest.starts_with("[::1]") {
        return true;
    }
    let host = rest.split(|c: char| c == '/' || c == ':').next().unwrap_or("");
    matches!(host, "localhost" | "127.0.0.1")
}

struct InsecureTransport;

impl ComplianceRule for InsecureTransport {
    fn id(&self) -> &'static str {
        "insecure_transport"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }
    fn issue_type(&self) -> IssueType {
        IssueType::Security
    }
    fn severity(&self) -> Severity {
        Severity::High
    }
    fn recommendation(&self) -> &'static str {
        "Use https:// or wss:// for remote servers"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        let Some(url) = server.url.as_deref() else {
            return RuleOutcome::pass(self.severity());
        };
        let upgraded = if let Some(rest) = url.strip_prefix("http://") {
            format!("https://{}", rest)
        } else if let Some(rest) = url.strip_prefix("ws://") {
            format!("wss://{}", rest)
        } else {
            return RuleOutcome::pass(self.severity());
        };
        if is_loopback(url) {
            return RuleOutcome::pass(self.severity());
        }
        RuleOutcome::fail(self.severity(), format!("unencrypted endpoint {}", url))
            .with_fix("Switch to an encrypted scheme", json!({ "url": upgraded }))
    }
}

struct ShellPipeline;

impl ComplianceRule for ShellPipeline {
    fn id(&self) -> &'static str {
        "shell_pipeline"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Security
    }
    fn issue_type(&self) -> IssueType {
        IssueType::Security
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Launch the server binary directly rather than through a shell"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        let Some(command) = server.command.as_deref() else {
            return RuleOutcome::pass(self.severity());
        };
        let program = command
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(command)
            .trim_end_matches(".exe");
        let via_shell = SHELLS.contains(&program)
            && server.args.iter().any(|a| a == "-c" || a == "/c" || a == "-Command");
        let meta = SHELL_META_RE.is_match(command)
            || server.args.iter().any(|a| SHELL_META_RE.is_match(a));
        if via_shell || meta {
            RuleOutcome::fail(self.severity(), "server is launched through a shell pipeline")
        } else {
            RuleOutcome::pass(self.severity())
        }
    }
}

struct TimeoutConfigured;

impl ComplianceRule for TimeoutConfigured {
    fn id(&self) -> &'static str {
        "timeout_configured"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Performance
    }
    fn issue_type(&self) -> IssueType {
        IssueType::Performance
    }
    fn severity(&self) -> Severity {
        Severity::Low
    }
    fn recommendation(&self) -> &'static str {
        "Configure an explicit timeout for remote servers"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        if server.transport.is_remote() && server.timeout_ms.is_none() {
            RuleOutcome::fail(self.severity(), "remote server has no timeout")
                .with_fix("Set a 30 second timeout", json!({ "timeoutMs": 30_000 }))
        } else {
            RuleOutcome::pass(self.severity())
        }
    }
}

struct TimeoutBounds;

impl ComplianceRule for TimeoutBounds {
    fn id(&self) -> &'static str {
        "timeout_bounds"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Performance
    }
    fn issue_type(&self) -> IssueType {
        IssueType::Performance
    }
    fn severity(&self) -> Severity {
        Severity::Medium
    }
    fn recommendation(&self) -> &'static str {
        "Keep timeouts between 1 second and 5 minutes"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        match server.timeout_ms {
            Some(ms) if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&ms) => {
                let clamped = ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS);
                RuleOutcome::fail(self.severity(), format!("timeout {}ms out of range", ms))
                    .with_fix("Clamp the timeout into range", json!({ "timeoutMs": clamped }))
            }
            _ => RuleOutcome::pass(self.severity()),
        }
    }
}

struct TransportSupported;

impl ComplianceRule for TransportSupported {
    fn id(&self) -> &'static str {
        "transport_supported"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Integration
    }
    fn issue_type(&self) -> IssueType {
        IssueType::InvalidConfig
    }
    fn severity(&self) -> Severity {
        Severity::High
    }
    fn recommendation(&self) -> &'static str {
        "Use one of stdio, sse, http or websocket"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        match &server.transport {
            Transport::Other(name) => {
                RuleOutcome::fail(self.severity(), format!("unsupported transport '{}'", name))
            }
            _ => RuleOutcome::pass(self.severity()),
        }
    }
}

struct RemoteUrlPresent;

impl ComplianceRule for RemoteUrlPresent {
    fn id(&self) -> &'static str {
        "remote_url_present"
    }
    fn category(&self) -> RuleCategory {
        RuleCategory::Integration
    }
    fn issue_type(&self) -> IssueType {
        IssueType::IncompleteConfig
    }
    fn severity(&self) -> Severity {
        Severity::Critical
    }
    fn recommendation(&self) -> &'static str {
        "Set the endpoint URL for remote servers"
    }
    fn evaluate(&self, server: &ServerConfig) -> RuleOutcome {
        let has_url = server.url.as_deref().map_or(false, |u| !u.trim().is_empty());
        if server.transport.is_remote() && !has_url {
            RuleOutcome::fail(self.severity(), "remote server has no url")
        } else {
            RuleOutcome::pass(self.severity())
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Evaluation of one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvaluation {
    pub server_name: String,
    pub score: f64,
    pub compliant: bool,
    pub issues: Vec<ConfigurationIssue>,
    pub rules_evaluated: usize,
}

/// Registry of compliance rules.
pub struct RuleEngine {
    rules: Vec<Box<dyn ComplianceRule>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::with_default_rules()
    }
}

impl RuleEngine {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        let mut engine = Self::empty();
        engine.register(Box::new(CommandPresent));
        engine.register(Box::new(ArgsWellFormed));
        engine.register(Box::new(PlaintextSecrets));
        engine.register(Box::new(InsecureTransport));
        engine.register(Box::new(ShellPipeline));
        engine.register(Box::new(TimeoutConfigured));
        engine.register(Box::new(TimeoutBounds));
        engine.register(Box::new(TransportSupported));
        engine.register(Box::new(RemoteUrlPresent));
        engine
    }

    /// Register a rule. A rule with the same id replaces the existing one.
    pub fn register(&mut self, rule: Box<dyn ComplianceRule>) {
        self.rules.retain(|r| r.id() != rule.id());
        self.rules.push(rule);
    }

    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Run every rule in `categories` against one server.
    pub fn evaluate_server(
        &self,
        server: &ServerConfig,
        categories: &[RuleCategory],
    ) -> ServerEvaluation {
        let mut total_weight = 0u32;
        let mut passed_weight = 0u32;
        let mut issues = Vec::new();
        let mut evaluated = 0;

        for rule in self.rules.iter().filter(|r| categories.contains(&r.category())) {
            evaluated += 1;
            let outcome = rule.evaluate(server);
            let weight = outcome.severity.weight();
            total_weight += weight;
            if outcome.passed {
                passed_weight += weight;
                continue;
            }
            issues.push(ConfigurationIssue {
                server_name: server.name.clone(),
                issue_type: rule.issue_type(),
                severity: outcome.severity,
                details: json!({
                    "category": rule.category(),
                    "message": outcome.message,
                }),
                recommendation: rule.recommendation().to_string(),
                rule_id: Some(rule.id().to_string()),
                auto_fix: outcome.auto_fix,
            });
        }

        let score = if total_weight == 0 {
            100.0
        } else {
            round1(passed_weight as f64 * 100.0 / total_weight as f64)
        };
        let compliant = !issues.iter().any(|i| i.severity >= Severity::High);

        ServerEvaluation {
            server_name: server.name.clone(),
            score,
            compliant,
            issues,
            rules_evaluated: evaluated,
        }
    }

    /// Evaluate a set of servers into an assessment result. The overall score
    /// is the mean of the server scores, or 100 when there are no servers.
    pub fn evaluate_all(
        &self,
        servers: &[ServerConfig],
        categories: &[RuleCategory],
    ) -> AssessmentResult {
        let evaluations: Vec<ServerEvaluation> = servers
            .iter()
            .map(|s| self.evaluate_server(s, categories))
            .collect();

        let overall_score = if evaluations.is_empty() {
            100.0
        } else {
            round1(evaluations.iter().map(|e| e.score).sum::<f64>() / evaluations.len() as f64)
        };

        let mut statuses = Vec::with_capacity(evaluations.len());
        let mut issues = Vec::new();
        for evaluation in evaluations {
            statuses.push(ServerComplianceStatus {
                server_name: evaluation.server_name,
                score: evaluation.score,
                compliant: evaluation.compliant,
                issue_count: evaluation.issues.len() as u32,
            });
            issues.extend(evaluation.issues);
        }

        AssessmentResult {
            overall_score,
            servers: statuses,
            issue_counts: IssueCounts::from_issues(&issues),
            issues,
            evaluated_at: Some(Utc::now()),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
