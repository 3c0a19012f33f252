//! axum surface: one router over [`AppState`], bearer-token roles checked per
//! handler, and a uniform `{"error": {"code", "message"}}` body on failure.

mod clinic;
mod finance;

use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::auth::{AuthError, Authenticator, Principal, Role};
use crate::clinic::{ClinicError, ClinicService};
use crate::finance::{FinanceError, ReportService, RollupEngine};

#[derive(Clone)]
pub struct AppState {
    clinic: ClinicService,
    reports: ReportService,
    rollups: RollupEngine,
    auth: Arc<Authenticator>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("rollups", &self.rollups)
            .field("auth", &self.auth)
            .finish()
    }
}

impl AppState {
    /// Reports and direct rollups share the finance store behind the clinic
    /// service's dispatcher.
    pub fn new(clinic: ClinicService) -> Self {
        let rollups = clinic.dispatcher().rollups().clone();
        Self {
            reports: ReportService::new(rollups.store().clone()),
            rollups,
            clinic,
            auth: Arc::new(Authenticator::default()),
        }
    }

    pub fn with_authenticator(mut self, auth: Authenticator) -> Self {
        self.auth = Arc::new(auth);
        self
    }

    pub fn clinic(&self) -> &ClinicService {
        &self.clinic
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tasks", post(clinic::create_task))
        .route("/patient/tasks", get(clinic::patient_tasks))
        .route("/patient/tasks/:task_id", get(clinic::patient_task))
        .route("/doctor/tasks", get(clinic::doctor_tasks))
        .route("/doctor/tasks/:task_id", put(clinic::close_task))
        .route("/admin/tasks", get(clinic::admin_tasks))
        .route("/admin/tasks/:task_id/assign", put(clinic::assign_task))
        .route(
            "/admin/users",
            get(clinic::list_users).post(clinic::create_user),
        )
        .route(
            "/admin/users/:user_id",
            put(clinic::update_user).delete(clinic::delete_user),
        )
        .route("/consultation-types", get(clinic::list_consultation_types))
        .route(
            "/admin/consultation-types",
            post(clinic::create_consultation_type),
        )
        .route(
            "/admin/consultation-types/:id",
            put(clinic::update_consultation_type),
        )
        .route(
            "/admin/doctor-competencies",
            put(clinic::sync_doctor_competencies),
        )
        .route(
            "/admin/doctor-competencies/:doctor_id",
            get(clinic::doctor_competencies),
        )
        .route("/finance/records", get(finance::records))
        .route("/finance/summary", get(finance::summary))
        .route("/finance/events", post(finance::record_event))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

fn authorize(state: &AppState, headers: &HeaderMap, roles: &[Role]) -> Result<Principal, ApiError> {
    let principal = state.auth.authenticate(headers).map_err(map_auth_error)?;
    principal.require(roles).map_err(map_auth_error)?;
    Ok(principal)
}

/// Call after `authorize`: anonymous requests get 401 whatever their body.
fn parse_json<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            format!("invalid JSON body: {err}"),
        )
    })
}

fn map_auth_error(err: AuthError) -> ApiError {
    match err {
        AuthError::Missing | AuthError::Unknown => {
            error_response(StatusCode::UNAUTHORIZED, "unauthorized", err.to_string())
        }
        AuthError::Forbidden { .. } | AuthError::MissingSubject { .. } => {
            error_response(StatusCode::FORBIDDEN, "forbidden", err.to_string())
        }
    }
}

fn map_clinic_error(err: ClinicError) -> ApiError {
    match err {
        ClinicError::Invalid(message) => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
        }
        ClinicError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        ClinicError::Conflict(message) => error_response(StatusCode::CONFLICT, "conflict", message),
        ClinicError::Forbidden(message) => {
            error_response(StatusCode::FORBIDDEN, "forbidden", message)
        }
        ClinicError::Store { .. } => {
            error!(error = %err, "clinic store failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            )
        }
    }
}

fn map_finance_error(err: FinanceError) -> ApiError {
    match err {
        FinanceError::InvalidDuration { .. } => {
            error_response(StatusCode::BAD_REQUEST, "invalid_duration", err.to_string())
        }
        FinanceError::InvalidEvent { .. } => {
            error_response(StatusCode::BAD_REQUEST, "invalid_event", err.to_string())
        }
        FinanceError::Store { .. } => {
            error!(error = %err, "finance store failure");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_error",
                err.to_string(),
            )
        }
    }
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
        }),
    )
}
