// src/handlers/admin.rs

use axum::{
    Extension, Json,
    extract::State,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::user::{PublicUser, USER_COLUMNS, UpdateRoleRequest, User},
    services::counters,
    utils::jwt::Claims,
};

/// Changes a user's role.
/// Admin only.
pub async fn update_role(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UpdateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "UPDATE users SET role = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
        USER_COLUMNS
    ))
    .bind(payload.user_id)
    .bind(payload.role.as_str())
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to update role: {:?}", e);
        AppError::from(e)
    })?
    .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    tracing::info!(
        "Admin {} set role of user {} to {}",
        claims.sub,
        user.id,
        user.role
    );

    Ok(Json(PublicUser::from(user)))
}

/// Rebuilds stored counters from base rows.
/// Admin only.
pub async fn reconcile_counters(
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    let users_updated = counters::reconcile(&pool).await?;
    Ok(Json(json!({ "users_updated": users_updated })))
}
