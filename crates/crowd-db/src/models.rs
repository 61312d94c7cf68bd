/// Database row types. These map directly to SQLite rows and stay
/// independent of the crowd-types API models.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub subject: String,
    pub sender_id: Option<String>,
    pub sender_username: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A conversation membership joined with the member's username.
pub struct MemberRow {
    pub id: String,
    pub conversation_id: String,
    pub recipient_id: String,
    pub username: String,
    pub status: i64,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRecipientRow {
    pub id: String,
    pub message_id: String,
    pub recipient_id: String,
    pub delivered_at: Option<String>,
}

pub struct CommentRow {
    pub id: String,
    pub sender_id: String,
    pub sender_handle: Option<String>,
    pub body: String,
    pub parent_id: Option<String>,
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct TaskRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub struct HitRow {
    pub id: String,
    pub hit_id: String,
    pub hit_type_id: Option<String>,
    pub task_id: String,
    pub status: i64,
    pub num_assignments: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Result of a find-or-create on conversations.
pub struct ConversationOutcome {
    pub conversation_id: String,
    pub created: bool,
    /// Usernames of every member, sender last. Empty when the conversation was reused.
    pub participants: Vec<String>,
}
