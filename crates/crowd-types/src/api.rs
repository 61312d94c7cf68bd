use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{HitStatus, RecipientStatus};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    /// Public alias shown on comments. Defaults to the username.
    #[serde(default)]
    pub handle: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub subject: String,
    pub recipients: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub id: Uuid,
    pub subject: String,
    /// Sender's username.
    pub sender: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub recipients: Vec<Uuid>,
    pub last_message: Option<MessageSummary>,
    pub recipient_names: Vec<String>,
    pub is_sender_online: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateRecipientStatusRequest {
    #[serde(default)]
    pub status: Option<RecipientStatus>,
}

#[derive(Debug, Serialize)]
pub struct ConversationRecipientResponse {
    pub id: Uuid,
    pub status: RecipientStatus,
    pub recipient: Uuid,
    pub conversation: Option<ConversationResponse>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub conversation: Uuid,
    pub sender: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub body: String,
    pub time_relative: String,
    pub is_self: bool,
}

/// Reduced message view embedded as a conversation's `last_message`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSummary {
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub time_relative: String,
}

#[derive(Debug, Serialize)]
pub struct DeliveryResponse {
    pub id: Uuid,
    pub message: Uuid,
    pub recipient: Uuid,
    pub delivered_at: Option<DateTime<Utc>>,
}

// -- Comments --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateCommentRequest {
    pub body: String,
    #[serde(default)]
    pub parent: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: Uuid,
    pub sender: Uuid,
    pub body: String,
    pub parent: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sender_alias: Option<String>,
    pub posted_time: String,
}

// -- Tasks / MTurk --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateTaskRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateHitRequest {
    pub hit_id: String,
    #[serde(default)]
    pub hit_type_id: Option<String>,
    #[serde(default)]
    pub num_assignments: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateHitRequest {
    #[serde(default)]
    pub status: Option<HitStatus>,
    #[serde(default)]
    pub num_assignments: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HitResponse {
    pub id: Uuid,
    pub hit_id: String,
    pub hit_type_id: Option<String>,
    pub task: Uuid,
    pub status: HitStatus,
    pub num_assignments: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
