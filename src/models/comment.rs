use serde::Serialize;
use sqlx::FromRow;
use validator::Validate;

use super::{reaction::ReactionKind, user::AuthorView};

/// Upper bound on pictures attached to one comment.
pub const MAX_COMMENT_PICTURES: usize = 3;

/// Represents the 'comments' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub pictures: Vec<String>,
    pub is_solution: bool,
    pub likes: i32,
    pub dislikes: i32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const COMMENT_COLUMNS: &str = "c.id, c.post_id, c.user_id, c.content, c.pictures, \
     c.is_solution, c.likes, c.dislikes, c.created_at, c.updated_at";

/// A comment with its author and the caller's reaction state.
#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i64,
    pub post_id: i64,
    pub content: String,
    pub pictures: Vec<String>,
    pub is_solution: bool,
    pub like_count: i32,
    pub dislike_count: i32,
    pub is_liked: bool,
    pub is_disliked: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub user: AuthorView,
}

impl CommentView {
    pub fn new(row: CommentRow, user: AuthorView, reaction: Option<ReactionKind>) -> Self {
        Self {
            id: row.id,
            post_id: row.post_id,
            content: row.content,
            pictures: row.pictures,
            is_solution: row.is_solution,
            like_count: row.likes,
            dislike_count: row.dislikes,
            is_liked: reaction == Some(ReactionKind::Like),
            is_disliked: reaction == Some(ReactionKind::Dislike),
            created_at: row.created_at,
            updated_at: row.updated_at,
            user,
        }
    }
}

/// The accepted solution of a post, with its author.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SolutionView {
    pub id: i64,
    pub content: String,
    pub pictures: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub user: AuthorView,
}

/// Flat row for solution lookups joined with the author.
#[derive(Debug, FromRow)]
pub struct SolutionRow {
    pub post_id: i64,
    pub id: i64,
    pub content: String,
    pub pictures: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub user_id: i64,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

impl From<SolutionRow> for SolutionView {
    fn from(row: SolutionRow) -> Self {
        Self {
            id: row.id,
            content: row.content,
            pictures: row.pictures,
            created_at: row.created_at,
            user: AuthorView {
                id: row.user_id,
                username: row.username,
                profile_picture_url: row.profile_picture_url,
            },
        }
    }
}

/// Validated text of a comment form.
#[derive(Debug, Validate)]
pub struct CommentFields {
    #[validate(length(
        min = 1,
        max = 10000,
        message = "Comment must be between 1 and 10000 characters"
    ))]
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaction_state_maps_to_flags() {
        let row = CommentRow {
            id: 1,
            post_id: 2,
            user_id: 3,
            content: "try cargo clean".to_string(),
            pictures: vec![],
            is_solution: false,
            likes: 4,
            dislikes: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        let author = AuthorView {
            id: 3,
            username: "bob".to_string(),
            profile_picture_url: None,
        };

        let view = CommentView::new(row.clone(), author.clone(), Some(ReactionKind::Dislike));
        assert!(!view.is_liked);
        assert!(view.is_disliked);
        assert_eq!(view.like_count, 4);

        let view = CommentView::new(row, author, None);
        assert!(!view.is_liked && !view.is_disliked);
    }
}
