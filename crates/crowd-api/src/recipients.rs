use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crowd_db::models::MemberRow;
use crowd_types::api::{Claims, ConversationRecipientResponse, UpdateRecipientStatusRequest};
use crowd_types::models::Viewer;

use crate::conversations::conversation_view;
use crate::error::ApiError;
use crate::state::{AppState, run_db};
use crate::views::{parse_id, recipient_status};

/// GET /conversation-recipients/{id}
pub async fn get_recipient(
    State(state): State<AppState>,
    Path(membership_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let id = membership_id.to_string();
    let member = run_db(&state, move |db| Ok(db.get_membership(&id)?))
        .await?
        .ok_or(ApiError::NotFound)?;
    let view = recipient_view(&state, member, &viewer, Utc::now()).await?;
    Ok(Json(view))
}

/// PATCH /conversation-recipients/{id}
pub async fn patch_recipient(
    State(state): State<AppState>,
    Path(membership_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateRecipientStatusRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let view = update_recipient_status(&state, &viewer, membership_id, req, Utc::now()).await?;
    Ok(Json(view))
}

/// Sets the membership status when one is given and returns the stored
/// membership. Any existing membership can be updated.
pub async fn update_recipient_status(
    state: &AppState,
    viewer: &Viewer,
    membership_id: Uuid,
    req: UpdateRecipientStatusRequest,
    now: DateTime<Utc>,
) -> Result<ConversationRecipientResponse, ApiError> {
    let id = membership_id.to_string();
    let member = run_db(state, move |db| {
        let updated = match req.status {
            Some(status) => db.update_membership_status(&id, status.code(), now)?,
            None => db.get_membership(&id)?,
        };
        Ok(updated)
    })
    .await?
    .ok_or(ApiError::NotFound)?;

    recipient_view(state, member, viewer, now).await
}

async fn recipient_view(
    state: &AppState,
    member: MemberRow,
    viewer: &Viewer,
    now: DateTime<Utc>,
) -> Result<ConversationRecipientResponse, ApiError> {
    let conversation = conversation_view(state, member.conversation_id.clone(), viewer, now).await?;
    Ok(ConversationRecipientResponse {
        id: parse_id(&member.id, "membership id"),
        status: recipient_status(member.status),
        recipient: parse_id(&member.recipient_id, "membership recipient_id"),
        conversation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::find_or_create;
    use crate::testing::{add_user, state};
    use crowd_types::api::CreateConversationRequest;
    use crowd_types::models::RecipientStatus;

    #[tokio::test]
    async fn test_status_update_persists() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let req = CreateConversationRequest {
            subject: String::new(),
            recipients: vec![bob.id],
        };
        let (_, convo) = find_or_create(&state, &alice, req, Utc::now()).await.unwrap();
        let membership = state
            .db
            .conversation_members(&convo.id.to_string())
            .unwrap()
            .into_iter()
            .find(|m| m.username == "bob")
            .unwrap();
        let membership_id: Uuid = membership.id.parse().unwrap();

        let muted = update_recipient_status(
            &state,
            &bob,
            membership_id,
            UpdateRecipientStatusRequest {
                status: Some(RecipientStatus::Muted),
            },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(muted.status, RecipientStatus::Muted);
        assert_eq!(muted.recipient, bob.id);
        assert_eq!(muted.conversation.unwrap().recipient_names, vec!["alice"]);

        // No status keeps the stored one.
        let unchanged = update_recipient_status(
            &state,
            &bob,
            membership_id,
            UpdateRecipientStatusRequest { status: None },
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(unchanged.status, RecipientStatus::Muted);
    }

    #[tokio::test]
    async fn test_unknown_membership_is_not_found() {
        let state = state();
        let alice = add_user(&state, "alice");
        let result = update_recipient_status(
            &state,
            &alice,
            Uuid::new_v4(),
            UpdateRecipientStatusRequest {
                status: Some(RecipientStatus::Closed),
            },
            Utc::now(),
        )
        .await;
        assert!(matches!(result, Err(ApiError::NotFound)));
    }
}
