use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{error, info};
use uuid::Uuid;

use crowd_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::state::{AppState, run_db};

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::BadRequest("username must be 3-32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::BadRequest("password must be at least 8 characters".into()));
    }
    let handle = req.handle.unwrap_or_else(|| req.username.clone());
    if handle.trim().is_empty() {
        return Err(ApiError::BadRequest("handle must not be blank".into()));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| {
            error!("password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let user_id = Uuid::new_v4();
    let username = req.username.clone();

    run_db(&state, move |db| {
        if db.get_user_by_username(&username)?.is_some() {
            return Err(ApiError::Conflict("username taken".into()));
        }
        if db.handle_taken(&handle)? {
            return Err(ApiError::Conflict("handle taken".into()));
        }
        // A concurrent registration can still win between the checks and the insert.
        if !db.create_user(&user_id.to_string(), &username, &password_hash, &handle)? {
            return Err(ApiError::Conflict("username or handle taken".into()));
        }
        Ok(())
    })
    .await?;

    info!("Registered {} ({})", req.username, user_id);
    let token = create_token(&state.jwt_secret, user_id, &req.username)?;

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.clone();
    let user = run_db(&state, move |db| Ok(db.get_user_by_username(&username)?))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password).map_err(|e| {
        error!("stored password hash for {} is unreadable: {}", user.id, e);
        ApiError::Internal
    })?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user.id.parse().map_err(|_| ApiError::Internal)?;
    let token = create_token(&state.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::state;
    use crowd_gateway::connection::verify_token;
    use axum::response::Response;

    fn registration(username: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            password: "correct horse".into(),
            handle: None,
        }
    }

    fn status_of(result: Result<impl IntoResponse, ApiError>) -> StatusCode {
        let response: Response = match result {
            Ok(ok) => ok.into_response(),
            Err(err) => err.into_response(),
        };
        response.status()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_registration_conflicts() {
        let state = state();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                status_of(register(State(state), Json(registration("alice"))).await)
            }));
        }

        let mut statuses = Vec::new();
        for handle in handles {
            statuses.push(handle.await.unwrap());
        }
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CREATED).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count(), 3);
    }

    #[test]
    fn test_token_round_trips_through_gateway_verifier() {
        let user_id = Uuid::new_v4();
        let token = create_token("secret", user_id, "alice").unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.username, "alice");
    }
}
