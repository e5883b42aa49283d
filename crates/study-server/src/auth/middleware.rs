use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::backend::BackendError;
use crate::{error::AppError, routes::AppState};

/// The signed-in caller. `token` is forwarded to the backend so its row
/// policies see the same identity.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub token: String,
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .ok_or(AppError::Unauthorized)?;

    let identity = state.identity.user(token).await.map_err(|e| match e {
        BackendError::Unauthorized => AppError::Unauthorized,
        other => AppError::Backend(other),
    })?;

    let auth_user = AuthUser {
        id: identity.id,
        email: identity.email,
        token: token.to_string(),
    };

    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}
