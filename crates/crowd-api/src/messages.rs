use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crowd_types::api::{Claims, DeliveryResponse, MessageResponse, SendMessageRequest};
use crowd_types::events::GatewayEvent;
use crowd_types::models::Viewer;

use crate::error::ApiError;
use crate::state::{AppState, run_db};
use crate::views::{delivery_response, message_response, parse_id};

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: the id of the oldest message on the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

/// POST /conversations/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let message = post_message(&state, &viewer, conversation_id, req.body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// Stores a message from `viewer` and stamps delivery for every member of the
/// conversation, then pushes it to members connected to the gateway.
pub async fn post_message(
    state: &AppState,
    viewer: &Viewer,
    conversation_id: Uuid,
    body: String,
    now: DateTime<Utc>,
) -> Result<MessageResponse, ApiError> {
    if body.trim().is_empty() {
        return Err(ApiError::BadRequest("message body must not be empty".into()));
    }

    let cid = conversation_id.to_string();
    let sender_id = viewer.id.to_string();
    let message_id = Uuid::new_v4();

    let (row, deliveries) = run_db(state, move |db| {
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::NotFound);
        }
        if !db.is_member(&cid, &sender_id)? {
            return Err(ApiError::Forbidden);
        }
        Ok(db.post_message(&message_id.to_string(), &cid, &sender_id, &body, now)?)
    })
    .await?;

    let message = message_response(&row, viewer, now);
    let recipients: Vec<Uuid> = deliveries
        .iter()
        .map(|d| parse_id(&d.recipient_id, "delivery recipient_id"))
        .collect();

    let event = GatewayEvent::MessageCreate {
        id: message.id,
        conversation_id,
        sender_id: viewer.id,
        sender_username: viewer.username.clone(),
        body: message.body.clone(),
        timestamp: message.created_at,
    };
    let pushed = state.dispatcher.send_to_users(&recipients, &event).await;
    debug!(
        "Message {} stamped for {} recipients, {} online",
        message.id,
        recipients.len(),
        pushed
    );

    Ok(message)
}

/// GET /conversations/{id}/messages: newest first, members only.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let cid = conversation_id.to_string();
    let user_id = viewer.id.to_string();
    let limit = query.limit.min(200);
    let before = query.before.map(|id| id.to_string());

    let rows = run_db(&state, move |db| {
        if db.get_conversation(&cid)?.is_none() {
            return Err(ApiError::NotFound);
        }
        if !db.is_member(&cid, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        if let Some(cursor) = before.as_deref() {
            let in_conversation = db
                .get_message(cursor)?
                .is_some_and(|m| m.conversation_id == cid);
            if !in_conversation {
                return Err(ApiError::BadRequest("before must name a message in this conversation".into()));
            }
        }
        Ok(db.get_messages(&cid, limit, before.as_deref())?)
    })
    .await?;

    let now = Utc::now();
    let messages: Vec<MessageResponse> = rows
        .iter()
        .map(|row| message_response(row, &viewer, now))
        .collect();
    Ok(Json(messages))
}

/// POST /messages/{id}/deliveries: re-runs the delivery pass.
pub async fn redeliver_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = Viewer::from(&claims);
    let deliveries = redeliver(&state, &viewer, message_id, Utc::now()).await?;
    Ok(Json(deliveries))
}

pub async fn redeliver(
    state: &AppState,
    viewer: &Viewer,
    message_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<DeliveryResponse>, ApiError> {
    let mid = message_id.to_string();
    let user_id = viewer.id.to_string();

    let rows = run_db(state, move |db| {
        let message = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;
        if !db.is_member(&message.conversation_id, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        Ok(db.deliver_message(&mid, now)?)
    })
    .await?;

    Ok(rows.iter().map(delivery_response).collect())
}

/// GET /messages/{id}/deliveries
pub async fn get_deliveries(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let mid = message_id.to_string();
    let user_id = claims.sub.to_string();

    let rows = run_db(&state, move |db| {
        let message = db.get_message(&mid)?.ok_or(ApiError::NotFound)?;
        if !db.is_member(&message.conversation_id, &user_id)? {
            return Err(ApiError::Forbidden);
        }
        Ok(db.message_deliveries(&mid)?)
    })
    .await?;

    let deliveries: Vec<DeliveryResponse> = rows.iter().map(delivery_response).collect();
    Ok(Json(deliveries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversations::{conversation_view, find_or_create};
    use crate::testing::{add_user, state};
    use chrono::Duration;
    use crowd_types::api::CreateConversationRequest;

    async fn conversation(state: &AppState, sender: &Viewer, recipients: &[&Viewer]) -> Uuid {
        let req = CreateConversationRequest {
            subject: String::new(),
            recipients: recipients.iter().map(|v| v.id).collect(),
        };
        find_or_create(state, sender, req, Utc::now()).await.unwrap().1.id
    }

    #[tokio::test]
    async fn test_post_message_creates_one_delivery_per_recipient() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let carol = add_user(&state, "carol");
        let cid = conversation(&state, &alice, &[&bob, &carol]).await;

        let message = post_message(&state, &alice, cid, "hello".into(), Utc::now())
            .await
            .unwrap();
        assert!(message.is_self);
        assert_eq!(message.time_relative, "just now");

        let deliveries = state.db.message_deliveries(&message.id.to_string()).unwrap();
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries.iter().all(|d| d.delivered_at.is_some()));
    }

    #[tokio::test]
    async fn test_redeliver_refreshes_timestamps() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let cid = conversation(&state, &alice, &[&bob]).await;

        let t0 = Utc::now();
        let message = post_message(&state, &alice, cid, "hello".into(), t0).await.unwrap();
        let first = redeliver(&state, &bob, message.id, t0 + Duration::seconds(1)).await.unwrap();
        let second = redeliver(&state, &bob, message.id, t0 + Duration::seconds(2)).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert!(b.delivered_at > a.delivered_at);
        }
    }

    #[tokio::test]
    async fn test_last_message_appears_on_conversation() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let cid = conversation(&state, &alice, &[&bob]).await;

        let t0 = Utc::now();
        post_message(&state, &alice, cid, "first".into(), t0).await.unwrap();
        post_message(&state, &bob, cid, "second".into(), t0 + Duration::seconds(1))
            .await
            .unwrap();

        let view = conversation_view(&state, cid.to_string(), &alice, t0 + Duration::seconds(2))
            .await
            .unwrap()
            .unwrap();
        let last = view.last_message.unwrap();
        assert_eq!(last.body, "second");
        assert_eq!(last.time_relative, "just now");
    }

    #[tokio::test]
    async fn test_post_message_pushes_to_connected_members() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let cid = conversation(&state, &alice, &[&bob]).await;
        let (_conn, mut rx) = state.dispatcher.register_user_channel(bob.id).await;

        post_message(&state, &alice, cid, "ping".into(), Utc::now()).await.unwrap();
        match rx.recv().await {
            Some(GatewayEvent::MessageCreate { body, conversation_id, .. }) => {
                assert_eq!(body, "ping");
                assert_eq!(conversation_id, cid);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_message_rejections() {
        let state = state();
        let alice = add_user(&state, "alice");
        let bob = add_user(&state, "bob");
        let mallory = add_user(&state, "mallory");
        let cid = conversation(&state, &alice, &[&bob]).await;

        let outsider = post_message(&state, &mallory, cid, "hi".into(), Utc::now()).await;
        assert!(matches!(outsider, Err(ApiError::Forbidden)));

        let missing = post_message(&state, &alice, Uuid::new_v4(), "hi".into(), Utc::now()).await;
        assert!(matches!(missing, Err(ApiError::NotFound)));

        let blank = post_message(&state, &alice, cid, "   ".into(), Utc::now()).await;
        assert!(matches!(blank, Err(ApiError::BadRequest(_))));
    }
}
