use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, Func, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, SqlErr,
};
use tracing::info;

use crate::clock::fixed_now;
use crate::entities::patient;
use crate::models::patient::{
    PaginatedResponse, PatientCreate, PatientListQuery, PatientResponse, PatientUpdate,
};
use crate::patient::{MAX_PAGE_SIZE, SortKey, page_offset, total_pages};
use crate::state::AppState;

use super::HttpError;

const DEFAULT_PAGE_SIZE: u64 = 20;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_patients).post(create_patient))
        .route(
            "/{patient_id}",
            get(get_patient).put(update_patient).delete(delete_patient),
        )
}

async fn list_patients(
    State(state): State<AppState>,
    query: Result<Query<PatientListQuery>, QueryRejection>,
) -> Result<Json<PaginatedResponse>, HttpError> {
    let Query(query) = query.map_err(|err| HttpError::bad_request(err.body_text()))?;
    let page = query.page.unwrap_or(1);
    if page == 0 {
        return Err(HttpError::bad_request("page must be at least 1"));
    }
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(HttpError::bad_request(format!(
            "pageSize must be within 1..={MAX_PAGE_SIZE}"
        )));
    }
    let offset = page_offset(page, page_size)
        .ok_or_else(|| HttpError::bad_request("page is too large for the requested pageSize"))?;

    let mut select = patient::Entity::find();
    if let Some(term) = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|term| !term.is_empty())
    {
        let pattern = format!("%{}%", term.to_lowercase());
        select = select.filter(
            Condition::any()
                .add(Expr::expr(Func::lower(Expr::col(patient::Column::PatientId))).like(pattern.clone()))
                .add(Expr::expr(Func::lower(Expr::col(patient::Column::Name))).like(pattern)),
        );
    }

    let total = select
        .clone()
        .count(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to fetch patients", err))?;

    let column = match SortKey::parse(query.sort_by.as_deref()) {
        SortKey::PatientId => patient::Column::PatientId,
        SortKey::Name => patient::Column::Name,
        SortKey::Age => patient::Column::Age,
    };
    let order = match query.sort_order.as_deref() {
        Some(order) if order.eq_ignore_ascii_case("desc") => Order::Desc,
        _ => Order::Asc,
    };

    let rows = select
        .order_by(column, order)
        .order_by_asc(patient::Column::Id)
        .offset(offset)
        .limit(page_size)
        .all(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to fetch patients", err))?;

    Ok(Json(PaginatedResponse {
        items: rows.into_iter().map(PatientResponse::from).collect(),
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

async fn get_patient(
    Path(patient_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PatientResponse>, HttpError> {
    let row = find_patient(&state, &patient_id)
        .await?
        .ok_or_else(|| HttpError::not_found(&patient_id))?;
    Ok(Json(PatientResponse::from(row)))
}

async fn create_patient(
    State(state): State<AppState>,
    payload: Result<Json<PatientCreate>, JsonRejection>,
) -> Result<(StatusCode, Json<PatientResponse>), HttpError> {
    let Json(payload) = payload.map_err(|err| HttpError::bad_request(err.body_text()))?;
    let patient = payload
        .validate()
        .map_err(|err| HttpError::bad_request(err.to_string()))?;

    if find_patient(&state, &patient.patient_id).await?.is_some() {
        return Err(conflict(&patient.patient_id));
    }

    let patient_id = patient.patient_id.clone();
    let created = patient
        .into_active_model(fixed_now())
        .insert(&state.database)
        .await
        .map_err(|err| write_error("Failed to create patient", &patient_id, err))?;

    info!("Created patient {}", created.patient_id);
    Ok((StatusCode::CREATED, Json(PatientResponse::from(created))))
}

async fn update_patient(
    Path(patient_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<PatientUpdate>, JsonRejection>,
) -> Result<Json<PatientResponse>, HttpError> {
    let Json(payload) = payload.map_err(|err| HttpError::bad_request(err.body_text()))?;
    let changes = payload
        .validate()
        .map_err(|err| HttpError::bad_request(err.to_string()))?;

    let existing = find_patient(&state, &patient_id)
        .await?
        .ok_or_else(|| HttpError::not_found(&patient_id))?;
    if changes.is_empty() {
        return Ok(Json(PatientResponse::from(existing)));
    }

    if let Some(new_id) = changes.patient_id.as_deref() {
        if new_id != existing.patient_id && find_patient(&state, new_id).await?.is_some() {
            return Err(conflict(new_id));
        }
    }

    let target_id = changes
        .patient_id
        .clone()
        .unwrap_or_else(|| existing.patient_id.clone());
    let mut row = patient::ActiveModel::from(existing);
    if let Some(value) = changes.patient_id {
        row.patient_id = Set(value);
    }
    if let Some(value) = changes.name {
        row.name = Set(value);
    }
    if let Some(value) = changes.age {
        row.age = Set(value);
    }
    if let Some(value) = changes.gender {
        row.gender = Set(value.to_string());
    }
    if let Some(value) = changes.medical_condition {
        row.medical_condition = Set(value);
    }
    if let Some(value) = changes.last_visit {
        row.last_visit = Set(value);
    }
    row.updated_at = Set(fixed_now());

    let updated = row
        .update(&state.database)
        .await
        .map_err(|err| write_error("Failed to update patient", &target_id, err))?;
    info!("Updated patient {patient_id}");
    Ok(Json(PatientResponse::from(updated)))
}

async fn delete_patient(
    Path(patient_id): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, HttpError> {
    let result = patient::Entity::delete_many()
        .filter(patient::Column::PatientId.eq(patient_id.as_str()))
        .exec(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to delete patient", err))?;
    if result.rows_affected == 0 {
        return Err(HttpError::not_found(&patient_id));
    }
    info!("Deleted patient {patient_id}");
    Ok(StatusCode::NO_CONTENT)
}

async fn find_patient(
    state: &AppState,
    patient_id: &str,
) -> Result<Option<patient::Model>, HttpError> {
    patient::Entity::find()
        .filter(patient::Column::PatientId.eq(patient_id))
        .one(&state.database)
        .await
        .map_err(|err| HttpError::internal("Failed to fetch patient", err))
}

fn conflict(patient_id: &str) -> HttpError {
    HttpError::new(
        StatusCode::CONFLICT,
        format!("Patient with ID '{patient_id}' already exists"),
    )
}

fn write_error(context: &str, patient_id: &str, err: DbErr) -> HttpError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => conflict(patient_id),
        _ => HttpError::internal(context, err),
    }
}
