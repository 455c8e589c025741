//! Accepting, swapping and withdrawing the solution of a post.
//!
//! The transition runs in one transaction that locks the post row first, so
//! two concurrent requests for the same post are serialized. The partial
//! unique index on `comments(post_id) WHERE is_solution` backs this up.

use serde::Serialize;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::comment::{SolutionRow, SolutionView},
    services::{
        access::{caller_role, ensure_can_manage},
        counters::{self, UserDelta},
    },
};

/// A comment and its author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct CommentRef {
    pub id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolutionTransition {
    Mark { target: CommentRef },
    Unmark { target: CommentRef },
    Swap { previous: CommentRef, target: CommentRef },
}

impl SolutionTransition {
    /// Decides the transition for `target` given the post's current solution.
    pub fn plan(target: CommentRef, current: Option<CommentRef>) -> Self {
        match current {
            Some(current) if current.id == target.id => SolutionTransition::Unmark { target },
            Some(previous) => SolutionTransition::Swap { previous, target },
            None => SolutionTransition::Mark { target },
        }
    }

    /// Whether the target ends up accepted.
    pub fn target_accepted(&self) -> bool {
        !matches!(self, SolutionTransition::Unmark { .. })
    }

    pub fn deltas(&self) -> Vec<UserDelta> {
        match *self {
            SolutionTransition::Mark { target } => {
                counters::merge([UserDelta::new(target.user_id).solutions(1)])
            }
            SolutionTransition::Unmark { target } => {
                counters::merge([UserDelta::new(target.user_id).solutions(-1)])
            }
            SolutionTransition::Swap { previous, target } => counters::merge([
                UserDelta::new(previous.user_id).solutions(-1),
                UserDelta::new(target.user_id).solutions(1),
            ]),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SolutionResponse {
    pub id: i64,
    pub is_solution: bool,
    pub solution: Option<SolutionView>,
}

/// Toggles comment `comment_id` as the solution of its post on behalf of `caller_id`.
pub async fn toggle_solution(
    pool: &PgPool,
    comment_id: i64,
    caller_id: i64,
) -> Result<SolutionResponse, AppError> {
    let mut tx = pool.begin().await?;

    let post_id: i64 = sqlx::query_scalar("SELECT post_id FROM comments WHERE id = $1")
        .bind(comment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(comment_not_found)?;

    let post_owner: i64 = sqlx::query_scalar("SELECT user_id FROM posts WHERE id = $1 FOR UPDATE")
        .bind(post_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    // The comment may have been deleted while we waited for the post lock.
    let target = sqlx::query_as::<_, CommentRef>(
        "SELECT id, user_id FROM comments WHERE id = $1 AND post_id = $2 FOR UPDATE",
    )
    .bind(comment_id)
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(comment_not_found)?;

    let role = caller_role(&mut tx, caller_id).await?;
    ensure_can_manage(caller_id, role, post_owner, "post")?;

    let current = sqlx::query_as::<_, CommentRef>(
        "SELECT id, user_id FROM comments WHERE post_id = $1 AND is_solution FOR UPDATE",
    )
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?;

    let transition = SolutionTransition::plan(target, current);

    // Unmark before mark so the one-solution index is never violated mid-transaction.
    match transition {
        SolutionTransition::Unmark { target } => set_solution(&mut tx, target.id, false).await?,
        SolutionTransition::Swap { previous, target } => {
            set_solution(&mut tx, previous.id, false).await?;
            set_solution(&mut tx, target.id, true).await?;
        }
        SolutionTransition::Mark { target } => set_solution(&mut tx, target.id, true).await?,
    }

    counters::apply(&mut tx, &transition.deltas()).await?;

    tx.commit().await?;

    tracing::info!(
        "Solution of post {} changed by user {}: {:?}",
        post_id,
        caller_id,
        transition
    );

    let is_solution = transition.target_accepted();
    let solution = if is_solution {
        load_solution(pool, comment_id).await?
    } else {
        None
    };

    Ok(SolutionResponse {
        id: comment_id,
        is_solution,
        solution,
    })
}

fn comment_not_found() -> AppError {
    AppError::NotFound("Comment not found".to_string())
}

async fn set_solution(
    conn: &mut sqlx::PgConnection,
    comment_id: i64,
    accepted: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE comments SET is_solution = $2 WHERE id = $1")
        .bind(comment_id)
        .bind(accepted)
        .execute(conn)
        .await?;
    Ok(())
}

async fn load_solution(pool: &PgPool, comment_id: i64) -> Result<Option<SolutionView>, AppError> {
    let row = sqlx::query_as::<_, SolutionRow>(
        r#"
        SELECT c.post_id, c.id, c.content, c.pictures, c.created_at,
               u.id AS user_id, u.username, u.profile_picture_url
        FROM comments c
        JOIN users u ON u.id = c.user_id
        WHERE c.id = $1 AND c.is_solution
        "#,
    )
    .bind(comment_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(SolutionView::from))
}
