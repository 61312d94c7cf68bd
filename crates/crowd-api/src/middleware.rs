use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crowd_gateway::connection::verify_token;

use crate::error::ApiError;
use crate::state::AppState;

/// Extract and validate JWT from Authorization header. The claims are stored
/// as a request extension for the handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(ApiError::Unauthorized)?;

    let claims = verify_token(token, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
