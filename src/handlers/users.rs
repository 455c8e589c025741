use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::{AppError, is_unique_violation},
    extractors::MaybeClaims,
    models::{
        feed::{FeedParams, FeedQuery},
        user::{
            PublicUser, SessionUser, USER_COLUMNS, UpdatePasswordRequest, UpdateUsernameRequest,
            User,
        },
    },
    services::feed,
    utils::{
        form::FormData,
        hash::{hash_password, verify_password},
        jwt::Claims,
        upload::{MAX_PROFILE_PICTURE_BYTES, PictureKind, UploadStore, accept_picture},
    },
};

async fn find_user(pool: &PgPool, id: i64) -> Result<User, AppError> {
    sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))
}

/// Public profile by numeric id, or by username otherwise.
pub async fn get_user(
    State(pool): State<PgPool>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let user = match key.parse::<i64>() {
        Ok(id) => find_user(&pool, id).await?,
        Err(_) => sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE username = $1",
            USER_COLUMNS
        ))
        .bind(&key)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?,
    };

    Ok(Json(PublicUser::from(user)))
}

/// The feed restricted to one author. Accepts the same parameters as `GET /posts`.
pub async fn user_posts(
    State(pool): State<PgPool>,
    caller: MaybeClaims,
    Path(user_id): Path<i64>,
    Query(params): Query<FeedParams>,
) -> Result<impl IntoResponse, AppError> {
    let mut query = FeedQuery::try_from(params)?;
    query.filter.author_id = Some(user_id);

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    let page = feed::build_feed(&pool, &query, caller.user_id()).await?;
    Ok(Json(page))
}

pub async fn update_username(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateUsernameRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET username = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(claims.user_id()?)
    .bind(&payload.username)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Username '{}' already in use", payload.username))
        } else {
            AppError::from(e)
        }
    })?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    Ok(Json(SessionUser::new(user, None)))
}

pub async fn update_password(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let user = find_user(&pool, claims.user_id()?).await?;
    if !verify_password(&payload.password, &user.password)? {
        return Err(AppError::AuthError(
            "Current password is incorrect".to_string(),
        ));
    }

    let hashed_password = hash_password(&payload.new_password)?;
    sqlx::query("UPDATE users SET password = $2, updated_at = NOW() WHERE id = $1")
        .bind(user.id)
        .bind(&hashed_password)
        .execute(&pool)
        .await?;

    tracing::info!("User {} changed their password", user.id);
    Ok(Json(json!({ "message": "Password updated" })))
}

/// Replaces the caller's profile picture (`profile_picture` form field).
pub async fn update_picture(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut form = FormData::from_multipart(multipart).await?;

    let file = form
        .take_files("profile_picture")
        .into_iter()
        .next()
        .ok_or_else(|| AppError::BadRequest("profile_picture is required".to_string()))?;
    let image_type = accept_picture(&file, MAX_PROFILE_PICTURE_BYTES).ok_or_else(|| {
        AppError::BadRequest(
            "Profile picture must be a JPEG, PNG or WebP image of at most 2 MB".to_string(),
        )
    })?;

    let previous = find_user(&pool, user_id).await?.profile_picture_url;

    let url = uploads
        .save(
            PictureKind::Profile,
            &format!("user_{}", user_id),
            image_type,
            &file,
        )
        .await
        .map_err(|e| AppError::InternalServerError(format!("Failed to save picture: {}", e)))?;

    let updated = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET profile_picture_url = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(user_id)
    .bind(&url)
    .fetch_one(&pool)
    .await;

    let user = match updated {
        Ok(user) => user,
        Err(e) => {
            uploads.remove(&url).await;
            return Err(e.into());
        }
    };

    if let Some(previous) = previous {
        uploads.remove(&previous).await;
    }

    Ok(Json(SessionUser::new(user, None)))
}
