use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated user a response is rendered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: Uuid,
    pub username: String,
}

impl From<&crate::api::Claims> for Viewer {
    fn from(claims: &crate::api::Claims) -> Self {
        Self {
            id: claims.sub,
            username: claims.username.clone(),
        }
    }
}

/// Per-member state of a conversation window. Stored as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    #[default]
    Open,
    Minimized,
    Closed,
    Muted,
}

impl RecipientStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Open => 1,
            Self::Minimized => 2,
            Self::Closed => 3,
            Self::Muted => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Open),
            2 => Some(Self::Minimized),
            3 => Some(Self::Closed),
            4 => Some(Self::Muted),
            _ => None,
        }
    }
}

/// Lifecycle of an MTurk HIT attached to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitStatus {
    #[default]
    InProgress,
    Completed,
    Expired,
}

impl HitStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Expired => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::InProgress),
            2 => Some(Self::Completed),
            3 => Some(Self::Expired),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_status_codes() {
        for status in [
            RecipientStatus::Open,
            RecipientStatus::Minimized,
            RecipientStatus::Closed,
            RecipientStatus::Muted,
        ] {
            assert_eq!(RecipientStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(RecipientStatus::from_code(0), None);
        assert_eq!(RecipientStatus::default(), RecipientStatus::Open);
    }

    #[test]
    fn test_hit_status_codes() {
        assert_eq!(HitStatus::InProgress.code(), 1);
        assert_eq!(HitStatus::Completed.code(), 2);
        assert_eq!(HitStatus::Expired.code(), 3);
        assert_eq!(HitStatus::from_code(4), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&HitStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let status: RecipientStatus = serde_json::from_str("\"muted\"").unwrap();
        assert_eq!(status, RecipientStatus::Muted);
    }
}
