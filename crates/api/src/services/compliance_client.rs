//! HTTP client for a remote compliance evaluator.
//!
//! One `POST {url}/evaluate` per assessment with a bearer token. The response
//! body is the assessment result document.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EvaluatorConfig;
use domain::models::{AssessmentOptions, AssessmentRequest, AssessmentResult, AssessmentType};
use domain::services::{ComplianceEvaluator, EvaluationError};

/// Longest response body excerpt kept in error messages.
const ERROR_BODY_EXCERPT: usize = 512;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest<'a> {
    assessment_id: Uuid,
    assessment_type: AssessmentType,
    options: &'a AssessmentOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    server_name: Option<&'a str>,
    source: &'a str,
}

/// Calls the configured evaluator service.
pub struct RemoteComplianceEvaluator {
    client: Client,
    endpoint: String,
    token: String,
    timeout_ms: u64,
}

impl RemoteComplianceEvaluator {
    pub fn new(config: &EvaluatorConfig) -> Result<Self, EvaluationError> {
        if config.url.is_empty() {
            return Err(EvaluationError::Unavailable(
                "evaluator URL not configured".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| EvaluationError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/evaluate", config.url.trim_end_matches('/')),
            token: config.token.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> EvaluationError {
        if e.is_timeout() {
            EvaluationError::Timeout(self.timeout_ms)
        } else {
            EvaluationError::Unavailable(e.to_string())
        }
    }
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn classify_status(status: StatusCode, body: &str) -> EvaluationError {
    let message = format!("HTTP {}: {}", status, excerpt(body));
    if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
        EvaluationError::Unavailable(message)
    } else if status.is_client_error() {
        EvaluationError::Rejected(message)
    } else {
        EvaluationError::Unavailable(message)
    }
}

#[async_trait]
impl ComplianceEvaluator for RemoteComplianceEvaluator {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn evaluate(
        &self,
        assessment_id: Uuid,
        request: &AssessmentRequest,
    ) -> Result<AssessmentResult, EvaluationError> {
        let body = EvaluateRequest {
            assessment_id,
            assessment_type: request.assessment_type,
            options: &request.options,
            server_name: request.server_name.as_deref(),
            source: &request.source,
        };

        let start = Instant::now();
        let mut call = self.client.post(&self.endpoint).json(&body);
        if !self.token.is_empty() {
            call = call.bearer_auth(&self.token);
        }

        let response = call.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let result: AssessmentResult = response.json().await.map_err(|e| {
            if e.is_timeout() {
                EvaluationError::Timeout(self.timeout_ms)
            } else {
                EvaluationError::InvalidResponse(e.to_string())
            }
        })?;

        tracing::debug!(
            assessment_id = %assessment_id,
            duration_ms = start.elapsed().as_millis() as u64,
            score = result.overall_score,
            "Remote compliance evaluation finished"
        );

        Ok(result)
    }
}
