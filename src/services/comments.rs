use std::collections::HashMap;

use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        comment::{COMMENT_COLUMNS, CommentRow, CommentView},
        reaction::ReactionKind,
        user::AuthorView,
    },
    services::{
        access::{caller_role, ensure_can_manage},
        counters::{self, UserDelta},
    },
    utils::upload::UploadStore,
};

pub async fn fetch_comment_row(pool: &PgPool, comment_id: i64) -> Result<CommentRow, AppError> {
    sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {} FROM comments c WHERE c.id = $1",
        COMMENT_COLUMNS
    ))
    .bind(comment_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))
}

/// All comments of a post, newest first.
pub async fn comments_for_post(
    pool: &PgPool,
    post_id: i64,
    caller: Option<i64>,
) -> Result<Vec<CommentView>, AppError> {
    let rows = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {} FROM comments c WHERE c.post_id = $1 ORDER BY c.created_at DESC, c.id DESC",
        COMMENT_COLUMNS
    ))
    .bind(post_id)
    .fetch_all(pool)
    .await?;

    views(pool, rows, caller).await
}

pub async fn comment_view(
    pool: &PgPool,
    row: CommentRow,
    caller: Option<i64>,
) -> Result<CommentView, AppError> {
    let comment_id = row.id;
    views(pool, vec![row], caller).await?.pop().ok_or_else(|| {
        AppError::InternalServerError(format!("Author of comment {} not found", comment_id))
    })
}

/// Attaches authors and the caller's reactions, two queries for any number of rows.
async fn views(
    pool: &PgPool,
    rows: Vec<CommentRow>,
    caller: Option<i64>,
) -> Result<Vec<CommentView>, AppError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let comment_ids: Vec<i64> = rows.iter().map(|c| c.id).collect();
    let mut user_ids: Vec<i64> = rows.iter().map(|c| c.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();

    let authors: HashMap<i64, AuthorView> = sqlx::query_as::<_, AuthorView>(
        "SELECT id, username, profile_picture_url FROM users WHERE id = ANY($1)",
    )
    .bind(&user_ids)
    .fetch_all(pool)
    .await?
    .into_iter()
    .map(|a| (a.id, a))
    .collect();

    let reactions: HashMap<i64, ReactionKind> = match caller {
        Some(user_id) => sqlx::query_as::<_, (i64, String)>(
            "SELECT comment_id, type FROM reactions WHERE user_id = $1 AND comment_id = ANY($2)",
        )
        .bind(user_id)
        .bind(&comment_ids)
        .fetch_all(pool)
        .await?
        .into_iter()
        .filter_map(|(id, kind)| ReactionKind::parse(&kind).map(|k| (id, k)))
        .collect(),
        None => HashMap::new(),
    };

    let mut views = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(author) = authors.get(&row.user_id).cloned() else {
            tracing::warn!("User {} not found for comment {}, skipping", row.user_id, row.id);
            continue;
        };
        let reaction = reactions.get(&row.id).copied();
        views.push(CommentView::new(row, author, reaction));
    }
    Ok(views)
}

/// Counter changes caused by removing a comment: the reactions it received
/// and, when accepted, its solution credit.
pub fn removal_delta(row: &CommentRow) -> UserDelta {
    let delta = UserDelta::new(row.user_id).reputation(-(row.likes - row.dislikes));
    if row.is_solution {
        delta.solutions(-1)
    } else {
        delta
    }
}

/// Deletes a comment with its reactions, then its picture files.
pub async fn delete_comment(
    pool: &PgPool,
    uploads: &UploadStore,
    comment_id: i64,
    caller_id: i64,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {} FROM comments c WHERE c.id = $1 FOR UPDATE",
        COMMENT_COLUMNS
    ))
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    let role = caller_role(&mut tx, caller_id).await?;
    ensure_can_manage(caller_id, role, row.user_id, "comment")?;

    sqlx::query("DELETE FROM reactions WHERE comment_id = $1")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(&mut *tx)
        .await?;

    counters::apply(&mut tx, &[removal_delta(&row)]).await?;

    tx.commit().await?;

    tracing::info!("Comment {} deleted by user {}", comment_id, caller_id);

    uploads.remove_all(&row.pictures).await;
    Ok(())
}
