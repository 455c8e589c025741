use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;

use crate::{error::AppError, utils::jwt::Claims};

/// Toggle Me-too on a post.
pub async fn toggle_metoo(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    ensure_post_exists(&mut tx, post_id).await?;

    let removed = sqlx::query("DELETE FROM me_toos WHERE user_id = $1 AND post_id = $2")
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let is_metoo = removed == 0;
    if is_metoo {
        sqlx::query(
            "INSERT INTO me_toos (user_id, post_id) VALUES ($1, $2) ON CONFLICT (user_id, post_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    }

    let metoo_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM me_toos WHERE post_id = $1")
        .bind(post_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(Json(json!({
        "id": post_id,
        "is_metoo": is_metoo,
        "metoo_count": metoo_count,
    })))
}

/// Toggle a post on the caller's watchlist.
pub async fn toggle_watchlist(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    ensure_post_exists(&mut tx, post_id).await?;

    let removed = sqlx::query("DELETE FROM user_watchlist WHERE user_id = $1 AND post_id = $2")
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let is_watchlisted = removed == 0;
    if is_watchlisted {
        sqlx::query(
            "INSERT INTO user_watchlist (user_id, post_id) VALUES ($1, $2) ON CONFLICT (user_id, post_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(post_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(Json(json!({
        "id": post_id,
        "is_watchlisted": is_watchlisted,
    })))
}

/// Takes a share lock so the post cannot be deleted under the toggle.
async fn ensure_post_exists(conn: &mut sqlx::PgConnection, post_id: i64) -> Result<(), AppError> {
    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM posts WHERE id = $1 FOR SHARE")
        .bind(post_id)
        .fetch_optional(conn)
        .await?;

    exists
        .map(|_| ())
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}
