use std::sync::Arc;

use uuid::Uuid;

use crowd_db::Database;
use crowd_gateway::dispatcher::Dispatcher;
use crowd_presence::MemoryPresence;
use crowd_types::models::Viewer;

use crate::state::{AppState, AppStateInner};

pub(crate) fn state() -> AppState {
    Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        dispatcher: Dispatcher::new(Arc::new(MemoryPresence::new())),
        jwt_secret: "test-secret".into(),
    })
}

pub(crate) fn add_user(state: &AppState, username: &str) -> Viewer {
    let id = Uuid::new_v4();
    assert!(
        state
            .db
            .create_user(&id.to_string(), username, "hash", username)
            .unwrap()
    );
    Viewer {
        id,
        username: username.into(),
    }
}
