use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;

use super::{
    ApiError, AppState, authorize, error_response, map_auth_error, map_clinic_error, parse_json,
};
use crate::auth::Role;
use crate::clinic::{
    CompetencyItem, ConsultationType, ConsultationTypeUpdate, DoctorCompetency,
    NewConsultationType, NewTask, NewUser, Task, TaskFilter, User, UserRole, UserUpdate,
};

const ANY_ROLE: &[Role] = &[Role::Admin, Role::Doctor, Role::Patient, Role::Finance];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct TaskListQuery {
    #[serde(default)]
    patient_id: Option<String>,
    #[serde(default)]
    doctor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct UserListQuery {
    #[serde(default)]
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AssignRequest {
    #[serde(default)]
    doctor_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct CloseRequest {
    #[serde(default)]
    notes: Option<String>,
}

pub(super) async fn create_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    let principal = authorize(&state, &headers, &[Role::Patient, Role::Admin])?;
    let mut request: NewTask = parse_json(&body)?;
    if principal.is(Role::Patient) {
        let subject = principal.subject().map_err(map_auth_error)?;
        if request
            .patient_id
            .as_deref()
            .is_some_and(|patient_id| patient_id != subject)
        {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                "patients may only create their own tasks",
            ));
        }
        if request.doctor_id.is_some() || request.price.is_some() {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                "only admins may set doctorId or price",
            ));
        }
        request.patient_id = Some(subject.to_string());
    }

    let task = state
        .clinic
        .create_task(request)
        .await
        .map_err(map_clinic_error)?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub(super) async fn patient_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    let principal = authorize(&state, &headers, &[Role::Patient])?;
    let subject = principal.subject().map_err(map_auth_error)?;
    let tasks = state
        .clinic
        .tasks_for_patient(subject)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(tasks))
}

pub(super) async fn patient_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
) -> Result<Json<Task>, ApiError> {
    let principal = authorize(&state, &headers, &[Role::Patient, Role::Admin])?;
    let task = state
        .clinic
        .get_task(&task_id)
        .await
        .map_err(map_clinic_error)?;
    if principal.is(Role::Patient) {
        let subject = principal.subject().map_err(map_auth_error)?;
        if task.patient_id != subject {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "forbidden",
                "task belongs to another patient",
            ));
        }
    }
    Ok(Json(task))
}

pub(super) async fn doctor_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Task>>, ApiError> {
    let principal = authorize(&state, &headers, &[Role::Doctor])?;
    let subject = principal.subject().map_err(map_auth_error)?;
    let tasks = state
        .clinic
        .tasks_for_doctor(subject)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(tasks))
}

pub(super) async fn close_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<Task>, ApiError> {
    let principal = authorize(&state, &headers, &[Role::Doctor])?;
    let request: CloseRequest = parse_json(&body)?;
    let subject = principal.subject().map_err(map_auth_error)?;
    let task = state
        .clinic
        .close_task(&task_id, subject, request.notes)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(task))
}

pub(super) async fn admin_tasks(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let filter = TaskFilter {
        patient_id: query.patient_id.filter(|id| !id.trim().is_empty()),
        doctor_id: query.doctor_id.filter(|id| !id.trim().is_empty()),
    };
    let tasks = state
        .clinic
        .list_tasks(&filter)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(tasks))
}

pub(super) async fn assign_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    body: Bytes,
) -> Result<Json<Task>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let request: AssignRequest = parse_json(&body)?;
    let Some(doctor_id) = request.doctor_id.filter(|id| !id.trim().is_empty()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "doctorId is required",
        ));
    };
    let task = state
        .clinic
        .assign_task(&task_id, &doctor_id)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(task))
}

pub(super) async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UserListQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let role = match query.role.as_deref().filter(|role| !role.trim().is_empty()) {
        Some(raw) => Some(UserRole::parse(raw).ok_or_else(|| {
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                format!("unknown role: {raw}"),
            )
        })?),
        None => None,
    };
    let users = state
        .clinic
        .list_users(role)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(users))
}

pub(super) async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<User>), ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let request: NewUser = parse_json(&body)?;
    let user = state
        .clinic
        .create_user(request)
        .await
        .map_err(map_clinic_error)?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub(super) async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
    body: Bytes,
) -> Result<Json<User>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let update: UserUpdate = parse_json(&body)?;
    let user = state
        .clinic
        .update_user(&user_id, update)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(user))
}

pub(super) async fn delete_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    state
        .clinic
        .delete_user(&user_id)
        .await
        .map_err(map_clinic_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn list_consultation_types(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ConsultationType>>, ApiError> {
    authorize(&state, &headers, ANY_ROLE)?;
    let kinds = state
        .clinic
        .list_consultation_types()
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(kinds))
}

pub(super) async fn create_consultation_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<ConsultationType>), ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let request: NewConsultationType = parse_json(&body)?;
    let kind = state
        .clinic
        .create_consultation_type(request)
        .await
        .map_err(map_clinic_error)?;
    Ok((StatusCode::CREATED, Json(kind)))
}

pub(super) async fn update_consultation_type(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ConsultationType>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let update: ConsultationTypeUpdate = parse_json(&body)?;
    let kind = state
        .clinic
        .update_consultation_type(&id, update)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(kind))
}

pub(super) async fn sync_doctor_competencies(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Vec<DoctorCompetency>>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let items: Vec<CompetencyItem> = parse_json(&body)?;
    let created = state
        .clinic
        .sync_doctor_competencies(items)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(created))
}

pub(super) async fn doctor_competencies(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(doctor_id): Path<String>,
) -> Result<Json<Vec<DoctorCompetency>>, ApiError> {
    authorize(&state, &headers, &[Role::Admin])?;
    let competencies = state
        .clinic
        .list_doctor_competencies(&doctor_id)
        .await
        .map_err(map_clinic_error)?;
    Ok(Json(competencies))
}
