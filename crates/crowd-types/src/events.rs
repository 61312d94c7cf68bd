use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, username: String },

    /// A message was posted to a conversation the receiver belongs to
    MessageCreate {
        id: Uuid,
        conversation_id: Uuid,
        sender_id: Uuid,
        sender_username: String,
        body: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A user's first connection opened or last connection closed
    PresenceUpdate {
        user_id: Uuid,
        username: String,
        online: bool,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },
}
