use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, MessageResponse, ProfileResponse, PublicUser, RegisterRequest,
            TokenResponse, UpdateProfileRequest,
        },
        extractors::{Authenticated, NoBody},
        jwt::JwtKeys,
        policy::DEFAULT_POLICY,
        repo_types::{NewUser, ProfileChanges},
        services::{authenticate, hash_password, is_valid_email},
    },
    db::StoreError,
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

pub fn profile_routes() -> Router<AppState> {
    Router::new().route("/profile", get(get_profile).post(update_profile))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    let Json(payload) = payload?;

    if payload.username.is_empty() || payload.email.is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("Username, email and password are required"));
    }
    if !is_valid_email(&payload.email) {
        warn!(email = %payload.email, "invalid email");
        return Err(AppError::validation("Invalid email"));
    }
    if let Err(violation) = DEFAULT_POLICY.check(&payload.password) {
        warn!(unmet = violation.unmet.len(), "weak password");
        return Err(violation.into());
    }

    let password_hash = hash_password(payload.password).await?;

    let user = state
        .users
        .create(NewUser {
            username: payload.username,
            name: payload.name,
            email: payload.email,
            password_hash,
        })
        .await
        .map_err(|e| {
            match e {
                StoreError::DuplicateEmail => warn!("email already registered"),
                StoreError::DuplicateUsername => warn!("username already taken"),
                _ => {}
            }
            AppError::from(e)
        })?;

    info!(user_id = user.id, username = %user.username, "user registered");
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, AppError> {
    let Json(payload) = payload?;

    if payload.email.is_empty() || payload.password.is_empty() {
        return Err(AppError::validation("Email and password are required"));
    }

    let identity = authenticate(state.users.as_ref(), &payload.email, &payload.password).await?;
    let token = JwtKeys::from_ref(&state).issue(&identity)?;

    info!(user_id = identity.id, "user logged in");
    Ok(Json(TokenResponse { token }))
}

#[instrument(skip_all)]
pub async fn get_profile(
    Authenticated(user, _): Authenticated<NoBody>,
) -> Json<ProfileResponse> {
    Json(user.into())
}

#[instrument(skip_all)]
pub async fn update_profile(
    State(state): State<AppState>,
    Authenticated(user, payload): Authenticated<UpdateProfileRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    if payload.new_username.as_deref() == Some("") {
        return Err(AppError::validation("Username must not be empty"));
    }
    if let Some(email) = &payload.new_email {
        if !is_valid_email(email) {
            return Err(AppError::validation("Invalid email"));
        }
    }

    let renamed_to = payload
        .new_username
        .clone()
        .filter(|u| *u != user.username);
    let changes = ProfileChanges {
        name: payload.new_name,
        username: payload.new_username,
        email: payload.new_email,
    };
    state
        .users
        .update_profile(user.id, changes)
        .await
        .map_err(|e| match e {
            StoreError::NotFound => AppError::NotFound("User not found".into()),
            other => other.into(),
        })?;

    if let Some(username) = &renamed_to {
        info!(user_id = user.id, from = %user.username, to = %username, "username changed");
    }
    info!(user_id = user.id, "profile updated");
    Ok(Json(MessageResponse::new("Profile updated successfully")))
}
