//! Row -> response rendering. Every derived field takes the viewer and the
//! render time explicitly.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use crowd_db::models::{
    CommentRow, ConversationRow, HitRow, MemberRow, MessageRecipientRow, MessageRow, TaskRow,
};
use crowd_presence::{ONLINE, PresenceCache};
use crowd_types::api::{
    CommentResponse, ConversationResponse, DeliveryResponse, HitResponse, MessageResponse,
    MessageSummary, TaskResponse,
};
use crowd_types::models::{HitStatus, RecipientStatus, Viewer};
use crowd_types::time::relative_time;

pub(crate) fn parse_id(raw: &str, what: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, raw, e);
        Uuid::default()
    })
}

pub(crate) fn parse_time(raw: &str, what: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by hand in sqlite3 use "YYYY-MM-DD HH:MM:SS" without a zone.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt {} '{}': {}", what, raw, e);
            DateTime::default()
        })
}

pub fn message_response(row: &MessageRow, viewer: &Viewer, now: DateTime<Utc>) -> MessageResponse {
    let sender = parse_id(&row.sender_id, "message sender_id");
    let created_at = parse_time(&row.created_at, "message created_at");
    MessageResponse {
        id: parse_id(&row.id, "message id"),
        conversation: parse_id(&row.conversation_id, "message conversation_id"),
        sender,
        created_at,
        updated_at: parse_time(&row.updated_at, "message updated_at"),
        body: row.body.clone(),
        time_relative: relative_time(created_at, now),
        is_self: sender == viewer.id,
    }
}

pub fn message_summary(row: &MessageRow, now: DateTime<Utc>) -> MessageSummary {
    let created_at = parse_time(&row.created_at, "message created_at");
    MessageSummary {
        body: row.body.clone(),
        created_at,
        time_relative: relative_time(created_at, now),
    }
}

/// Member usernames other than the viewer's own.
pub fn recipient_names(members: &[MemberRow], viewer: &Viewer) -> Vec<String> {
    members
        .iter()
        .filter(|m| m.username != viewer.username)
        .map(|m| m.username.clone())
        .collect()
}

/// False without a sender; otherwise whether the sender has an open gateway connection.
pub async fn is_sender_online(presence: &dyn PresenceCache, sender_id: Option<Uuid>) -> Result<bool> {
    match sender_id {
        Some(id) => Ok(presence.get_status(ONLINE, id).await? > 0),
        None => Ok(false),
    }
}

pub async fn conversation_response(
    presence: &dyn PresenceCache,
    row: &ConversationRow,
    members: &[MemberRow],
    last_message: Option<&MessageRow>,
    viewer: &Viewer,
    now: DateTime<Utc>,
) -> Result<ConversationResponse> {
    let sender_id = row
        .sender_id
        .as_deref()
        .map(|id| parse_id(id, "conversation sender_id"));

    Ok(ConversationResponse {
        id: parse_id(&row.id, "conversation id"),
        subject: row.subject.clone(),
        sender: row.sender_username.clone(),
        created_at: parse_time(&row.created_at, "conversation created_at"),
        updated_at: parse_time(&row.updated_at, "conversation updated_at"),
        recipients: members
            .iter()
            .map(|m| parse_id(&m.recipient_id, "recipient_id"))
            .collect(),
        last_message: last_message.map(|m| message_summary(m, now)),
        recipient_names: recipient_names(members, viewer),
        is_sender_online: is_sender_online(presence, sender_id).await?,
    })
}

pub(crate) fn recipient_status(code: i64) -> RecipientStatus {
    RecipientStatus::from_code(code).unwrap_or_else(|| {
        warn!("Unknown recipient status code {}", code);
        RecipientStatus::default()
    })
}

pub fn delivery_response(row: &MessageRecipientRow) -> DeliveryResponse {
    DeliveryResponse {
        id: parse_id(&row.id, "delivery id"),
        message: parse_id(&row.message_id, "delivery message_id"),
        recipient: parse_id(&row.recipient_id, "delivery recipient_id"),
        delivered_at: row
            .delivered_at
            .as_deref()
            .map(|t| parse_time(t, "delivered_at")),
    }
}

pub fn comment_response(row: &CommentRow, now: DateTime<Utc>) -> CommentResponse {
    let created_at = parse_time(&row.created_at, "comment created_at");
    CommentResponse {
        id: parse_id(&row.id, "comment id"),
        sender: parse_id(&row.sender_id, "comment sender_id"),
        body: row.body.clone(),
        parent: row.parent_id.as_deref().map(|p| parse_id(p, "comment parent_id")),
        deleted_at: row
            .deleted_at
            .as_deref()
            .map(|t| parse_time(t, "comment deleted_at")),
        created_at,
        updated_at: parse_time(&row.updated_at, "comment updated_at"),
        sender_alias: row.sender_handle.clone(),
        posted_time: relative_time(created_at, now),
    }
}

pub fn task_response(row: &TaskRow) -> TaskResponse {
    TaskResponse {
        id: parse_id(&row.id, "task id"),
        name: row.name.clone(),
        created_at: parse_time(&row.created_at, "task created_at"),
    }
}

pub fn hit_response(row: &HitRow) -> HitResponse {
    HitResponse {
        id: parse_id(&row.id, "hit id"),
        hit_id: row.hit_id.clone(),
        hit_type_id: row.hit_type_id.clone(),
        task: parse_id(&row.task_id, "hit task_id"),
        status: HitStatus::from_code(row.status).unwrap_or_else(|| {
            warn!("Unknown HIT status code {} on {}", row.status, row.id);
            HitStatus::default()
        }),
        num_assignments: row.num_assignments,
        created_at: parse_time(&row.created_at, "hit created_at"),
        updated_at: parse_time(&row.updated_at, "hit updated_at"),
    }
}
