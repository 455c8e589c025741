//! Deleting a post together with everything that hangs off it.
//!
//! Rows go in one transaction, children before parents. Picture files and the
//! user counters are handled after commit; neither can undo the deletion.

use sqlx::PgPool;

use crate::{
    error::AppError,
    services::{
        access::{caller_role, ensure_can_manage},
        counters::{self, UserDelta},
    },
    utils::upload::UploadStore,
};

/// What a removed comment contributes to cleanup.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RemovedComment {
    pub id: i64,
    pub user_id: i64,
    pub pictures: Vec<String>,
    pub is_solution: bool,
    pub likes: i32,
    pub dislikes: i32,
}

/// Everything left to do once the rows are gone.
#[derive(Debug, Default)]
pub struct Cleanup {
    pub pictures: Vec<String>,
    pub deltas: Vec<UserDelta>,
}

impl Cleanup {
    pub fn plan(owner_id: i64, post_pictures: Vec<String>, comments: Vec<RemovedComment>) -> Self {
        let mut pictures = post_pictures;
        let mut deltas = vec![UserDelta::new(owner_id).posts(-1)];

        for comment in comments {
            let mut delta =
                UserDelta::new(comment.user_id).reputation(-(comment.likes - comment.dislikes));
            if comment.is_solution {
                delta = delta.solutions(-1);
            }
            deltas.push(delta);
            pictures.extend(comment.pictures);
        }

        Self {
            pictures,
            deltas: counters::merge(deltas),
        }
    }
}

pub async fn delete_post(
    pool: &PgPool,
    uploads: &UploadStore,
    post_id: i64,
    caller_id: i64,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let (owner_id, post_pictures): (i64, Vec<String>) =
        sqlx::query_as("SELECT user_id, pictures FROM posts WHERE id = $1 FOR UPDATE")
            .bind(post_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let role = caller_role(&mut tx, caller_id).await?;
    ensure_can_manage(caller_id, role, owner_id, "post")?;

    sqlx::query("DELETE FROM me_toos WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM user_watchlist WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

    let comments = sqlx::query_as::<_, RemovedComment>(
        r#"
        SELECT id, user_id, pictures, is_solution, likes, dislikes
        FROM comments
        WHERE post_id = $1
        FOR UPDATE
        "#,
    )
    .bind(post_id)
    .fetch_all(&mut *tx)
    .await?;

    let comment_ids: Vec<i64> = comments.iter().map(|c| c.id).collect();
    if !comment_ids.is_empty() {
        sqlx::query("DELETE FROM reactions WHERE comment_id = ANY($1)")
            .bind(&comment_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM comments WHERE post_id = $1")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM posts WHERE id = $1")
        .bind(post_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        "Post {} deleted by user {} ({} comments)",
        post_id,
        caller_id,
        comment_ids.len()
    );

    let cleanup = Cleanup::plan(owner_id, post_pictures, comments);
    uploads.remove_all(&cleanup.pictures).await;
    counters::apply_detached(pool, &cleanup.deltas).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comment(id: i64, user_id: i64, is_solution: bool, likes: i32) -> RemovedComment {
        RemovedComment {
            id,
            user_id,
            pictures: vec![format!("/static/uploads/attached_pictures/c{}.png", id)],
            is_solution,
            likes,
            dislikes: 0,
        }
    }

    #[test]
    fn post_without_comments_only_drops_owner_post_count() {
        let cleanup = Cleanup::plan(1, vec!["/static/a.png".to_string()], vec![]);
        assert_eq!(cleanup.pictures, vec!["/static/a.png"]);
        assert_eq!(cleanup.deltas, vec![UserDelta::new(1).posts(-1)]);
    }

    #[test]
    fn comment_pictures_and_solution_author_are_included() {
        let cleanup = Cleanup::plan(
            1,
            vec![],
            vec![comment(10, 2, true, 3), comment(11, 3, false, 0)],
        );
        assert_eq!(cleanup.pictures.len(), 2);
        assert_eq!(
            cleanup.deltas,
            vec![
                UserDelta::new(1).posts(-1),
                UserDelta::new(2).reputation(-3).solutions(-1),
            ]
        );
    }

    #[test]
    fn owner_commenting_on_own_post_gets_one_merged_delta() {
        let cleanup = Cleanup::plan(1, vec![], vec![comment(10, 1, false, 2)]);
        assert_eq!(cleanup.deltas, vec![UserDelta::new(1).posts(-1).reputation(-2)]);
    }
}
