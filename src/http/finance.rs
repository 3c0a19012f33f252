use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

use super::{ApiError, AppState, authorize, error_response, map_finance_error, parse_json};
use crate::auth::Role;
use crate::finance::{
    BillableEvent, FinancialRecord, RawBillableEvent, ReportSummary, RollupOutcome,
};

const REPORT_ROLES: &[Role] = &[Role::Finance, Role::Admin];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ReportQuery {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    consultation_type: Option<String>,
}

impl ReportQuery {
    fn duration(&self) -> Result<&str, ApiError> {
        self.duration
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                error_response(
                    StatusCode::BAD_REQUEST,
                    "invalid_request",
                    "duration is required",
                )
            })
    }
}

pub(super) async fn records(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Vec<FinancialRecord>>, ApiError> {
    authorize(&state, &headers, REPORT_ROLES)?;
    let records = state
        .reports
        .records(query.duration()?, query.consultation_type.as_deref())
        .await
        .map_err(map_finance_error)?;
    Ok(Json(records))
}

pub(super) async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Json<ReportSummary>, ApiError> {
    authorize(&state, &headers, REPORT_ROLES)?;
    let summary = state
        .reports
        .summary(query.duration()?, query.consultation_type.as_deref())
        .await
        .map_err(map_finance_error)?;
    Ok(Json(summary))
}

/// Applies one billable event synchronously; unlike task creation the caller
/// sees the store's outcome.
pub(super) async fn record_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<RollupOutcome>), ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let payload: RawBillableEvent = parse_json(&body)?;
    let event = BillableEvent::from_payload(payload).map_err(map_finance_error)?;
    let outcome = state
        .rollups
        .record(&event)
        .await
        .map_err(map_finance_error)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
