// src/handlers/auth.rs

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    config::Config,
    error::{AppError, is_unique_violation},
    models::user::{LoginRequest, RegisterRequest, SessionUser, USER_COLUMNS, User},
    utils::{
        hash::{hash_password, verify_password},
        jwt::{Claims, sign_jwt},
    },
};

/// Registers a new user.
///
/// Hashes the password using Argon2 before storing it.
/// Returns 201 Created with the session payload, token included.
pub async fn register(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let email = payload.email.trim().to_lowercase();
    let hashed_password = hash_password(&payload.password)?;

    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (email, username, password) VALUES ($1, $2, $3) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&email)
    .bind(&payload.username)
    .bind(&hashed_password)
    .fetch_one(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email or username already in use".to_string())
        } else {
            tracing::error!("Failed to register user: {:?}", e);
            AppError::from(e)
        }
    })?;

    tracing::info!("Registered user {} ({})", user.id, user.username);

    let token = sign_jwt(user.id, &user.role, &config.jwt_secret, config.jwt_expiration)?;
    Ok((StatusCode::CREATED, Json(SessionUser::new(user, Some(token)))))
}

/// Authenticates a user by email and password and returns a JWT token.
pub async fn login(
    State(pool): State<PgPool>,
    State(config): State<Config>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE email = $1",
        USER_COLUMNS
    ))
    .bind(payload.email.trim().to_lowercase())
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::AuthError("Invalid email or password".to_string()))?;

    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::AuthError("Invalid email or password".to_string()));
    }

    let token = sign_jwt(user.id, &user.role, &config.jwt_secret, config.jwt_expiration)?;
    Ok(Json(SessionUser::new(user, Some(token))))
}

/// Returns the current user's session fields without issuing a new token.
pub async fn check_auth(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_COLUMNS
    ))
    .bind(claims.user_id()?)
    .fetch_optional(&pool)
    .await?
    .ok_or_else(|| AppError::AuthError("User not found".to_string()))?;

    Ok(Json(SessionUser::new(user, None)))
}
