mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crowd_api::state::{AppState, AppStateInner};
use crowd_api::{auth, comments, conversations, messages, mturk, recipients};
use crowd_api::middleware::require_auth;
use crowd_gateway::connection;
use crowd_gateway::dispatcher::Dispatcher;
use crowd_presence::{MemoryPresence, PresenceCache, RedisPresence};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crowd=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_placeholder_secret() {
        warn!("CROWD_JWT_SECRET is unset or a placeholder; do not expose this server");
    }

    let db = crowd_db::Database::open(&config.db_path)?;

    let presence: Arc<dyn PresenceCache> = match &config.redis_url {
        Some(url) => Arc::new(RedisPresence::connect(url).await?),
        None => {
            info!("CROWD_REDIS_URL not set, keeping presence in memory");
            Arc::new(MemoryPresence::new())
        }
    };

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        dispatcher: Dispatcher::new(presence),
        jwt_secret: config.jwt_secret.clone(),
    });

    let app = router(app_state);

    let addr = config.addr()?;
    info!("Crowd server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(app_state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/gateway", get(ws_upgrade))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::create_conversation),
        )
        .route("/conversations/{conversation_id}", get(conversations::get_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/messages/{message_id}/deliveries",
            get(messages::get_deliveries).post(messages::redeliver_message),
        )
        .route(
            "/conversation-recipients/{membership_id}",
            get(recipients::get_recipient).patch(recipients::patch_recipient),
        )
        .route("/comments", post(comments::create_comment))
        .route(
            "/comments/{comment_id}",
            get(comments::get_comment).delete(comments::delete_comment),
        )
        .route("/comments/{comment_id}/replies", get(comments::get_replies))
        .route("/tasks", post(mturk::create_task))
        .route(
            "/tasks/{task_id}/mturk-hit",
            get(mturk::get_hit).post(mturk::create_hit),
        )
        .route("/mturk-hits/{hit_id}", patch(mturk::update_hit))
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let dispatcher = state.dispatcher.clone();
    let jwt_secret = state.jwt_secret.clone();
    ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, jwt_secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(AppStateInner {
            db: crowd_db::Database::open_in_memory().unwrap(),
            dispatcher: Dispatcher::new(Arc::new(MemoryPresence::new())),
            jwt_secret: "router-test-secret".into(),
        });
        router(state)
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn register(app: &Router, username: &str) -> (String, String) {
        let (status, body) = call(
            app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": username, "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        (
            body["user_id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let app = app();
        let (status, body) = call(&app, "GET", "/conversations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = call(&app, "GET", "/conversations", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_conversation_flow() {
        let app = app();
        let (_alice_id, alice) = register(&app, "alice").await;
        let (bob_id, bob) = register(&app, "bob").await;

        let create = json!({ "subject": "hit question", "recipients": [bob_id] });
        let (status, convo) = call(&app, "POST", "/conversations", Some(&alice), Some(create.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(convo["sender"], "alice");
        assert_eq!(convo["recipient_names"], json!(["bob"]));
        assert!(convo["last_message"].is_null());

        let (status, again) = call(&app, "POST", "/conversations", Some(&alice), Some(create)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(again["id"], convo["id"]);

        let uri = format!("/conversations/{}/messages", convo["id"].as_str().unwrap());
        let (status, message) = call(&app, "POST", &uri, Some(&bob), Some(json!({ "body": "on it" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(message["is_self"], true);

        let (status, listed) = call(&app, "GET", &uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed[0]["body"], "on it");
        assert_eq!(listed[0]["is_self"], false);

        let deliveries_uri = format!("/messages/{}/deliveries", message["id"].as_str().unwrap());
        let (status, deliveries) = call(&app, "GET", &deliveries_uri, Some(&alice), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deliveries.as_array().unwrap().len(), 2);

        let (status, mine) = call(&app, "GET", "/conversations", Some(&bob), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine[0]["recipient_names"], json!(["alice"]));
        assert_eq!(mine[0]["last_message"]["body"], "on it");
    }

    #[tokio::test]
    async fn test_message_paging_and_conversation_order() {
        let app = app();
        let (_, alice) = register(&app, "alice").await;
        let (bob_id, bob) = register(&app, "bob").await;
        let (carol_id, _) = register(&app, "carol").await;

        let (_, with_bob) = call(&app, "POST", "/conversations", Some(&alice), Some(json!({ "recipients": [bob_id] }))).await;
        let (_, with_carol) = call(&app, "POST", "/conversations", Some(&alice), Some(json!({ "recipients": [carol_id] }))).await;

        let uri = format!("/conversations/{}/messages", with_bob["id"].as_str().unwrap());
        for body in ["one", "two", "three"] {
            let (status, _) = call(&app, "POST", &uri, Some(&bob), Some(json!({ "body": body }))).await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let mut bodies = Vec::new();
        let mut page_uri = format!("{}?limit=1", uri);
        loop {
            let (status, page) = call(&app, "GET", &page_uri, Some(&alice), None).await;
            assert_eq!(status, StatusCode::OK);
            let Some(message) = page.as_array().unwrap().first() else { break };
            bodies.push(message["body"].as_str().unwrap().to_string());
            page_uri = format!("{}?limit=1&before={}", uri, message["id"].as_str().unwrap());
        }
        bodies.sort();
        assert_eq!(bodies, vec!["one", "three", "two"]);

        let foreign = format!("{}?before={}", uri, with_carol["id"].as_str().unwrap());
        let (status, _) = call(&app, "GET", &foreign, Some(&alice), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // The conversation with new messages moves to the top.
        let (_, listed) = call(&app, "GET", "/conversations", Some(&alice), None).await;
        assert_eq!(listed[0]["id"], with_bob["id"]);
        assert_eq!(listed[1]["id"], with_carol["id"]);
    }

    #[tokio::test]
    async fn test_outsider_cannot_read_conversation() {
        let app = app();
        let (_, alice) = register(&app, "alice").await;
        let (bob_id, _) = register(&app, "bob").await;
        let (_, mallory) = register(&app, "mallory").await;

        let (_, convo) = call(
            &app,
            "POST",
            "/conversations",
            Some(&alice),
            Some(json!({ "recipients": [bob_id] })),
        )
        .await;
        let uri = format!("/conversations/{}", convo["id"].as_str().unwrap());
        let (status, _) = call(&app, "GET", &uri, Some(&mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_login_and_duplicate_register() {
        let app = app();
        register(&app, "alice").await;

        let (status, _) = call(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({ "username": "alice", "password": "another password" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "correct horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _) = call(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({ "username": "alice", "password": "wrong horse" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
