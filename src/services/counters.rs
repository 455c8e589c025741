//! Stored per-user counters: post count, solution count and reputation.
//!
//! Every change goes through [`apply`] as a relative `UPDATE`, so concurrent
//! writers never overwrite each other. [`reconcile`] rebuilds everything from
//! base rows.

use std::collections::BTreeMap;

use sqlx::{PgConnection, PgPool};

/// Reputation granted for each accepted solution.
pub const SOLUTION_REPUTATION: i32 = 10;

/// Relative change to one user's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserDelta {
    pub user_id: i64,
    pub posts: i32,
    pub solutions: i32,
    pub reputation: i32,
}

impl UserDelta {
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }

    pub fn posts(mut self, n: i32) -> Self {
        self.posts += n;
        self
    }

    /// Solution count change, with the matching reputation change.
    pub fn solutions(mut self, n: i32) -> Self {
        self.solutions += n;
        self.reputation += n * SOLUTION_REPUTATION;
        self
    }

    pub fn reputation(mut self, n: i32) -> Self {
        self.reputation += n;
        self
    }

    /// Reputation change not tied to the solution count.
    pub fn base_reputation(&self) -> i32 {
        self.reputation - self.solutions * SOLUTION_REPUTATION
    }

    pub fn is_zero(&self) -> bool {
        self.posts == 0 && self.solutions == 0 && self.reputation == 0
    }
}

/// Folds deltas per user, drops no-ops and orders by user id so concurrent
/// transactions lock user rows in the same order.
pub fn merge(deltas: impl IntoIterator<Item = UserDelta>) -> Vec<UserDelta> {
    let mut by_user: BTreeMap<i64, UserDelta> = BTreeMap::new();
    for delta in deltas {
        let entry = by_user
            .entry(delta.user_id)
            .or_insert_with(|| UserDelta::new(delta.user_id));
        entry.posts += delta.posts;
        entry.solutions += delta.solutions;
        entry.reputation += delta.reputation;
    }
    by_user.into_values().filter(|d| !d.is_zero()).collect()
}

/// Applies deltas on `conn`; post and solution counts never drop below zero.
/// Solution reputation follows the solution count actually stored, so a
/// clamped decrement takes no reputation away.
pub async fn apply(conn: &mut PgConnection, deltas: &[UserDelta]) -> Result<(), sqlx::Error> {
    for delta in merge(deltas.iter().copied()) {
        sqlx::query(
            r#"
            UPDATE users
            SET number_of_posts = GREATEST(0, number_of_posts + $2),
                number_of_solutions = GREATEST(0, number_of_solutions + $3),
                reputation = reputation + $4
                    + $5 * (GREATEST(0, number_of_solutions + $3) - number_of_solutions)
            WHERE id = $1
            "#,
        )
        .bind(delta.user_id)
        .bind(delta.posts)
        .bind(delta.solutions)
        .bind(delta.base_reputation())
        .bind(SOLUTION_REPUTATION)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Applies deltas outside any transaction, logging instead of failing.
/// Used after a commit, when the primary change has already happened.
pub async fn apply_detached(pool: &PgPool, deltas: &[UserDelta]) {
    let result = match pool.acquire().await {
        Ok(mut conn) => apply(&mut conn, deltas).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!("Failed to update user counters {:?}: {}", deltas, e);
    }
}

/// Recomputes comment reaction counts and all user counters from base rows.
/// Returns the number of users updated.
pub async fn reconcile(pool: &PgPool) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE comments c
        SET likes = COALESCE(r.likes, 0),
            dislikes = COALESCE(r.dislikes, 0)
        FROM comments base
        LEFT JOIN (
            SELECT comment_id,
                   COUNT(*) FILTER (WHERE type = 'like')::INT AS likes,
                   COUNT(*) FILTER (WHERE type = 'dislike')::INT AS dislikes
            FROM reactions
            GROUP BY comment_id
        ) r ON r.comment_id = base.id
        WHERE c.id = base.id
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let updated = sqlx::query(
        r#"
        UPDATE users u
        SET number_of_posts = COALESCE(p.total, 0),
            number_of_solutions = COALESCE(s.total, 0),
            reputation = COALESCE(r.score, 0) + $1 * COALESCE(s.total, 0),
            updated_at = NOW()
        FROM users base
        LEFT JOIN (
            SELECT user_id, COUNT(*)::INT AS total FROM posts GROUP BY user_id
        ) p ON p.user_id = base.id
        LEFT JOIN (
            SELECT user_id, COUNT(*)::INT AS total FROM comments WHERE is_solution GROUP BY user_id
        ) s ON s.user_id = base.id
        LEFT JOIN (
            SELECT user_id, SUM(likes - dislikes)::INT AS score FROM comments GROUP BY user_id
        ) r ON r.user_id = base.id
        WHERE u.id = base.id
        "#,
    )
    .bind(SOLUTION_REPUTATION)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;

    tracing::info!("Reconciled counters for {} users", updated);
    Ok(updated)
}
