//! Like/dislike toggling on comments.

use sqlx::PgPool;

use crate::{
    error::AppError,
    models::reaction::{ReactionKind, ReactionResponse},
    services::counters::{self, UserDelta},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionChange {
    Add(ReactionKind),
    Remove(ReactionKind),
    Switch { from: ReactionKind, to: ReactionKind },
}

impl ReactionChange {
    /// Same kind again toggles off, the other kind switches, none creates.
    pub fn plan(existing: Option<ReactionKind>, requested: ReactionKind) -> Self {
        match existing {
            Some(kind) if kind == requested => ReactionChange::Remove(kind),
            Some(from) => ReactionChange::Switch {
                from,
                to: requested,
            },
            None => ReactionChange::Add(requested),
        }
    }

    /// Caller's reaction after the change.
    pub fn resulting(&self) -> Option<ReactionKind> {
        match *self {
            ReactionChange::Add(kind) => Some(kind),
            ReactionChange::Remove(_) => None,
            ReactionChange::Switch { to, .. } => Some(to),
        }
    }

    /// Change to the comment's (likes, dislikes) counters.
    pub fn counter_deltas(&self) -> (i32, i32) {
        fn unit(kind: ReactionKind) -> (i32, i32) {
            match kind {
                ReactionKind::Like => (1, 0),
                ReactionKind::Dislike => (0, 1),
            }
        }
        match *self {
            ReactionChange::Add(kind) => unit(kind),
            ReactionChange::Remove(kind) => {
                let (l, d) = unit(kind);
                (-l, -d)
            }
            ReactionChange::Switch { from, to } => {
                let (fl, fd) = unit(from);
                let (tl, td) = unit(to);
                (tl - fl, td - fd)
            }
        }
    }

    /// Change to the comment author's reputation.
    pub fn reputation_delta(&self) -> i32 {
        let (likes, dislikes) = self.counter_deltas();
        likes - dislikes
    }
}

/// Applies `requested` from `user_id` on comment `comment_id`.
pub async fn react(
    pool: &PgPool,
    comment_id: i64,
    user_id: i64,
    requested: ReactionKind,
) -> Result<ReactionResponse, AppError> {
    let mut tx = pool.begin().await?;

    // Row lock serializes reactions on the same comment.
    let author_id: i64 = sqlx::query_scalar("SELECT user_id FROM comments WHERE id = $1 FOR UPDATE")
        .bind(comment_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    let existing: Option<String> =
        sqlx::query_scalar("SELECT type FROM reactions WHERE user_id = $1 AND comment_id = $2")
            .bind(user_id)
            .bind(comment_id)
            .fetch_optional(&mut *tx)
            .await?;
    let existing = existing.as_deref().and_then(ReactionKind::parse);

    let change = ReactionChange::plan(existing, requested);

    match change {
        ReactionChange::Add(kind) => {
            sqlx::query("INSERT INTO reactions (user_id, comment_id, type) VALUES ($1, $2, $3)")
                .bind(user_id)
                .bind(comment_id)
                .bind(kind.as_str())
                .execute(&mut *tx)
                .await?;
        }
        ReactionChange::Remove(_) => {
            sqlx::query("DELETE FROM reactions WHERE user_id = $1 AND comment_id = $2")
                .bind(user_id)
                .bind(comment_id)
                .execute(&mut *tx)
                .await?;
        }
        ReactionChange::Switch { to, .. } => {
            sqlx::query("UPDATE reactions SET type = $3 WHERE user_id = $1 AND comment_id = $2")
                .bind(user_id)
                .bind(comment_id)
                .bind(to.as_str())
                .execute(&mut *tx)
                .await?;
        }
    }

    let (like_delta, dislike_delta) = change.counter_deltas();
    let (like_count, dislike_count): (i32, i32) = sqlx::query_as(
        r#"
        UPDATE comments
        SET likes = GREATEST(0, likes + $2),
            dislikes = GREATEST(0, dislikes + $3)
        WHERE id = $1
        RETURNING likes, dislikes
        "#,
    )
    .bind(comment_id)
    .bind(like_delta)
    .bind(dislike_delta)
    .fetch_one(&mut *tx)
    .await?;

    counters::apply(
        &mut tx,
        &[UserDelta::new(author_id).reputation(change.reputation_delta())],
    )
    .await?;

    tx.commit().await?;

    let resulting = change.resulting();
    Ok(ReactionResponse {
        id: comment_id,
        like_count,
        dislike_count,
        is_liked: resulting == Some(ReactionKind::Like),
        is_disliked: resulting == Some(ReactionKind::Dislike),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReactionKind::{Dislike, Like};

    #[test]
    fn first_reaction_is_added() {
        let change = ReactionChange::plan(None, Like);
        assert_eq!(change, ReactionChange::Add(Like));
        assert_eq!(change.counter_deltas(), (1, 0));
        assert_eq!(change.reputation_delta(), 1);
        assert_eq!(change.resulting(), Some(Like));
    }

    #[test]
    fn same_reaction_toggles_off() {
        let change = ReactionChange::plan(Some(Dislike), Dislike);
        assert_eq!(change, ReactionChange::Remove(Dislike));
        assert_eq!(change.counter_deltas(), (0, -1));
        assert_eq!(change.reputation_delta(), 1);
        assert_eq!(change.resulting(), None);
    }

    #[test]
    fn other_reaction_switches() {
        let change = ReactionChange::plan(Some(Like), Dislike);
        assert_eq!(change.counter_deltas(), (-1, 1));
        assert_eq!(change.reputation_delta(), -2);
        assert_eq!(change.resulting(), Some(Dislike));
    }
}
