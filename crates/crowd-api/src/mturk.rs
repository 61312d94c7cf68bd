use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crowd_types::api::{
    Claims, CreateHitRequest, CreateTaskRequest, HitResponse, TaskResponse, UpdateHitRequest,
};

use crate::error::ApiError;
use crate::state::{AppState, run_db};
use crate::views::{hit_response, task_response};

/// POST /tasks
pub async fn create_task(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let task = new_task(&state, req).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn new_task(state: &AppState, req: CreateTaskRequest) -> Result<TaskResponse, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("task name must not be empty".into()));
    }
    let id = Uuid::new_v4().to_string();
    let row = run_db(state, move |db| Ok(db.create_task(&id, &req.name, Utc::now())?)).await?;
    Ok(task_response(&row))
}

/// POST /tasks/{task_id}/mturk-hit
pub async fn create_hit(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<CreateHitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hit = attach_hit(&state, task_id, req).await?;
    Ok((StatusCode::CREATED, Json(hit)))
}

/// Records the MTurk HIT published for a task. A task has at most one.
pub async fn attach_hit(
    state: &AppState,
    task_id: Uuid,
    req: CreateHitRequest,
) -> Result<HitResponse, ApiError> {
    let num_assignments = req.num_assignments.unwrap_or(1);
    if num_assignments < 1 {
        return Err(ApiError::BadRequest("num_assignments must be at least 1".into()));
    }
    if req.hit_id.trim().is_empty() {
        return Err(ApiError::BadRequest("hit_id must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let tid = task_id.to_string();
    let row = run_db(state, move |db| {
        if !db.task_exists(&tid)? {
            return Err(ApiError::NotFound);
        }
        db.create_hit(
            &id,
            &tid,
            &req.hit_id,
            req.hit_type_id.as_deref(),
            num_assignments,
            Utc::now(),
        )?
        .ok_or_else(|| ApiError::Conflict("task already has a HIT".into()))
    })
    .await?;

    info!("HIT {} attached to task {}", row.hit_id, row.task_id);
    Ok(hit_response(&row))
}

/// GET /tasks/{task_id}/mturk-hit
pub async fn get_hit(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let tid = task_id.to_string();
    let row = run_db(&state, move |db| Ok(db.get_hit_for_task(&tid)?))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(hit_response(&row)))
}

/// PATCH /mturk-hits/{id}
pub async fn update_hit(
    State(state): State<AppState>,
    Path(hit_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<UpdateHitRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let hit = change_hit(&state, hit_id, req).await?;
    Ok(Json(hit))
}

pub async fn change_hit(
    state: &AppState,
    hit_id: Uuid,
    req: UpdateHitRequest,
) -> Result<HitResponse, ApiError> {
    if req.num_assignments.is_some_and(|n| n < 1) {
        return Err(ApiError::BadRequest("num_assignments must be at least 1".into()));
    }

    let id = hit_id.to_string();
    let status = req.status.map(|s| s.code());
    let row = run_db(state, move |db| {
        db.update_hit(&id, status, req.num_assignments, Utc::now())?
            .ok_or(ApiError::NotFound)
    })
    .await?;
    Ok(hit_response(&row))
}
