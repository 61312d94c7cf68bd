use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crowd_db::models::{ConversationRow, MemberRow, MessageRow};
use crowd_presence::{CONVERSATION, build_key};
use crowd_types::api::{Claims, ConversationResponse, CreateConversationRequest};
use crowd_types::models::Viewer;

use crate::error::ApiError;
use crate::state::{AppState, run_db};
use crate::views::conversation_response;

/// Everything needed to render one conversation.
pub(crate) struct ConversationBundle {
    pub row: ConversationRow,
    pub members: Vec<MemberRow>,
    pub last_message: Option<MessageRow>,
}

/// POST /conversations: 201 with a new conversation, 200 when an existing one
/// with the same recipients is reused.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let (created, view) = find_or_create(&state, &viewer, req, Utc::now()).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(view)))
}

/// Finds the viewer's conversation with exactly `req.recipients` or creates it.
/// On creation the participant usernames are published to the presence cache.
pub async fn find_or_create(
    state: &AppState,
    viewer: &Viewer,
    req: CreateConversationRequest,
    now: DateTime<Utc>,
) -> Result<(bool, ConversationResponse), ApiError> {
    // The sender always joins; only the others count as recipients.
    let recipient_ids: Vec<String> = req
        .recipients
        .iter()
        .filter(|id| **id != viewer.id)
        .map(Uuid::to_string)
        .collect();
    if recipient_ids.is_empty() {
        return Err(ApiError::BadRequest("recipients must name someone besides the sender".into()));
    }

    let sender_id = viewer.id.to_string();
    let new_id = Uuid::new_v4().to_string();
    let subject = req.subject;

    let outcome = run_db(state, move |db| {
        let missing = db.missing_users(&recipient_ids)?;
        if !missing.is_empty() {
            return Err(ApiError::BadRequest(format!(
                "unknown recipients: {}",
                missing.join(", ")
            )));
        }
        Ok(db.find_or_create_conversation(&new_id, &sender_id, &subject, &recipient_ids, now)?)
    })
    .await?;

    if outcome.created {
        let key = build_key(CONVERSATION, &outcome.conversation_id);
        if !state.presence().push_if_absent(&key, &outcome.participants).await? {
            warn!("Participant list for {} was already cached", key);
        }
        info!(
            "{} created conversation {} with {} participants",
            viewer.username,
            outcome.conversation_id,
            outcome.participants.len()
        );
    }

    let view = conversation_view(state, outcome.conversation_id, viewer, now)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok((outcome.created, view))
}

/// GET /conversations: the viewer's conversations, most recently updated first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let now = Utc::now();
    let user_id = viewer.id.to_string();

    let bundles = run_db(&state, move |db| {
        let rows = db.list_conversations_for_user(&user_id)?;
        let mut bundles = Vec::with_capacity(rows.len());
        for row in rows {
            let members = db.conversation_members(&row.id)?;
            let last_message = db.last_message(&row.id)?;
            bundles.push(ConversationBundle {
                row,
                members,
                last_message,
            });
        }
        Ok(bundles)
    })
    .await?;

    let mut views = Vec::with_capacity(bundles.len());
    for bundle in &bundles {
        views.push(render(&state, bundle, &viewer, now).await?);
    }
    Ok(Json(views))
}

/// GET /conversations/{id}: members only.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let view = conversation_view(&state, conversation_id.to_string(), &viewer, Utc::now())
        .await?
        .ok_or(ApiError::NotFound)?;

    if !view.recipients.contains(&viewer.id) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(view))
}

pub(crate) async fn load_bundle(
    state: &AppState,
    conversation_id: String,
) -> Result<Option<ConversationBundle>, ApiError> {
    run_db(state, move |db| {
        let Some(row) = db.get_conversation(&conversation_id)? else {
            return Ok(None);
        };
        let members = db.conversation_members(&conversation_id)?;
        let last_message = db.last_message(&conversation_id)?;
        Ok(Some(ConversationBundle {
            row,
            members,
            last_message,
        }))
    })
    .await
}

pub(crate) async fn render(
    state: &AppState,
    bundle: &ConversationBundle,
    viewer: &Viewer,
    now: DateTime<Utc>,
) -> Result<ConversationResponse, ApiError> {
    Ok(conversation_response(
        state.presence(),
        &bundle.row,
        &bundle.members,
        bundle.last_message.as_ref(),
        viewer,
        now,
    )
    .await?)
}

/// Loads and renders a conversation for `viewer`; `None` when it does not exist.
pub(crate) async fn conversation_view(
    state: &AppState,
    conversation_id: String,
    viewer: &Viewer,
    now: DateTime<Utc>,
) -> Result<Option<ConversationResponse>, ApiError> {
    match load_bundle(state, conversation_id).await? {
        Some(bundle) => Ok(Some(render(state, &bundle, viewer, now).await?)),
        None => Ok(None),
    }
}
