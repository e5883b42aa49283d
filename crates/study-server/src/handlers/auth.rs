use axum::{extract::State, Extension, Json};
use serde_json::{Map, Value};
use study_shared::api::{AuthResponse, LoginRequest, RefreshRequest, UpdateProfileRequest};
use study_shared::Profile;

use crate::auth::AuthUser;
use crate::backend::{Query, Table};
use crate::error::AppError;
use crate::routes::AppState;

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::Validation("Email and password are required".to_string()));
    }

    let session = state.identity.sign_in(req.email.trim(), &req.password).await?;
    tracing::info!(user_id = %session.user_id, "User signed in");

    Ok(Json(session))
}

/// POST /api/v1/auth/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    if req.refresh_token.is_empty() {
        return Err(AppError::Unauthorized);
    }

    let session = state.identity.refresh(&req.refresh_token).await?;
    Ok(Json(session))
}

async fn load_profile(state: &AppState, user: &AuthUser) -> Result<Profile, AppError> {
    state
        .db(user)
        .fetch_one(Query::table(Table::Profiles).eq("id", user.id.as_str()))
        .await?
        .ok_or(AppError::NotFound)
}

/// GET /api/v1/auth/me
pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(load_profile(&state, &user).await?))
}

/// PATCH /api/v1/auth/me
pub async fn update_me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<Profile>, AppError> {
    let mut patch = Map::new();

    if let Some(username) = req.username {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("Username cannot be empty".to_string()));
        }
        patch.insert("username".to_string(), Value::String(username.to_string()));
    }
    if let Some(avatar_url) = req.avatar_url {
        let avatar_url = avatar_url.trim();
        let value = if avatar_url.is_empty() {
            Value::Null
        } else {
            Value::String(avatar_url.to_string())
        };
        patch.insert("avatar_url".to_string(), value);
    }

    if patch.is_empty() {
        return Ok(Json(load_profile(&state, &user).await?));
    }

    let updated: Vec<Profile> = state
        .db(&user)
        .update(
            &Query::table(Table::Profiles).eq("id", user.id.as_str()),
            Value::Object(patch),
        )
        .await?;

    updated.into_iter().next().map(Json).ok_or(AppError::NotFound)
}
