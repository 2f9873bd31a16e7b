//! Audit log routes.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Serialize;

use super::audited;
use crate::app::AppState;
use crate::error::ApiError;
use crate::extractors::{ApiKeyAuth, Permission};
use domain::models::{AuditLogEntry, AuditLogQuery};
use shared::pagination::PageRequest;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogPagination {
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Serialize)]
pub struct ListAuditLogsResponse {
    pub data: Vec<AuditLogEntry>,
    pub pagination: AuditLogPagination,
}

/// List audit logs with filtering and pagination, newest first.
pub async fn list_audit_logs(
    State(state): State<AppState>,
    auth: ApiKeyAuth,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<ListAuditLogsResponse>, ApiError> {
    let result = async {
        auth.require(Permission::AuditRead)?;
        if let (Some(from), Some(to)) = (query.from, query.to) {
            if from > to {
                return Err(ApiError::Validation(
                    "from must not be later than to".to_string(),
                ));
            }
        }

        let page = PageRequest::from_page(query.page, query.per_page);
        let (logs, total) = state.audit.repository().list(&query, page).await?;

        let per_page = page.limit;
        let total_pages = (total + per_page - 1) / per_page;
        Ok(Json(ListAuditLogsResponse {
            data: logs,
            pagination: AuditLogPagination {
                page: page.offset / per_page + 1,
                per_page,
                total,
                total_pages,
            },
        }))
    }
    .await;
    audited(&state, auth.actor(), "audit.list", "", result).await
}
