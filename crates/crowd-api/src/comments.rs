use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crowd_types::api::{Claims, CommentResponse, CreateCommentRequest};
use crowd_types::models::Viewer;

use crate::error::ApiError;
use crate::state::{AppState, run_db};
use crate::views::comment_response;

/// POST /comments
pub async fn create_comment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let comment = post_comment(&state, &viewer, req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn post_comment(
    state: &AppState,
    viewer: &Viewer,
    req: CreateCommentRequest,
    now: DateTime<Utc>,
) -> Result<CommentResponse, ApiError> {
    if req.body.trim().is_empty() {
        return Err(ApiError::BadRequest("comment body must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let sender_id = viewer.id.to_string();
    let parent = req.parent.map(|p| p.to_string());

    let row = run_db(state, move |db| {
        if let Some(parent_id) = parent.as_deref() {
            if db.get_comment(parent_id)?.is_none() {
                return Err(ApiError::BadRequest("parent comment does not exist".into()));
            }
        }
        Ok(db.insert_comment(&id, &sender_id, &req.body, parent.as_deref(), now)?)
    })
    .await?;

    Ok(comment_response(&row, now))
}

/// GET /comments/{id}
pub async fn get_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = comment_id.to_string();
    let row = run_db(&state, move |db| Ok(db.get_comment(&id)?))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(comment_response(&row, Utc::now())))
}

/// GET /comments/{id}/replies
pub async fn get_replies(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let id = comment_id.to_string();
    let rows = run_db(&state, move |db| {
        if db.get_comment(&id)?.is_none() {
            return Err(ApiError::NotFound);
        }
        Ok(db.get_replies(&id)?)
    })
    .await?;

    let now = Utc::now();
    let replies: Vec<CommentResponse> = rows.iter().map(|r| comment_response(r, now)).collect();
    Ok(Json(replies))
}

/// DELETE /comments/{id}: soft delete, sender only.
pub async fn delete_comment(
    State(state): State<AppState>,
    Path(comment_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let comment = soft_delete(&state, &viewer, comment_id, Utc::now()).await?;
    Ok(Json(comment))
}

pub async fn soft_delete(
    state: &AppState,
    viewer: &Viewer,
    comment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<CommentResponse, ApiError> {
    let id = comment_id.to_string();
    let user_id = viewer.id.to_string();

    let row = run_db(state, move |db| {
        let existing = db.get_comment(&id)?.ok_or(ApiError::NotFound)?;
        if existing.sender_id != user_id {
            return Err(ApiError::Forbidden);
        }
        db.soft_delete_comment(&id, now)?.ok_or(ApiError::NotFound)
    })
    .await?;

    Ok(comment_response(&row, now))
}
