use serde::Serialize;
use sqlx::FromRow;
use validator::Validate;

use super::{
    comment::{CommentView, SolutionView},
    user::AuthorView,
};

/// Upper bound on pictures attached to one post.
pub const MAX_POST_PICTURES: usize = 5;

/// Represents the 'posts' table in the database.
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub pictures: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

pub const POST_COLUMNS: &str =
    "p.id, p.user_id, p.title, p.content, p.tags, p.pictures, p.created_at, p.updated_at";

/// A post as returned by the feed and single-post endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PostSummary {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub pictures: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub comment_count: i64,
    pub is_metoo: bool,
    pub metoo_count: i64,
    pub is_watchlisted: bool,
    pub solution: Option<SolutionView>,
    pub user: AuthorView,
}

/// Single-post view: the summary plus its comments, newest first.
#[derive(Debug, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: PostSummary,
    pub comments: Vec<CommentView>,
}

/// Validated text fields of a post form.
#[derive(Debug, Validate)]
pub struct PostFields {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title length must be between 1 and 200 chars"
    ))]
    pub title: String,

    #[validate(length(
        min = 1,
        max = 20000,
        message = "Content length must be between 1 and 20000 chars"
    ))]
    pub content: String,

    #[validate(length(max = 10, message = "At most 10 tags are allowed"))]
    pub tags: Vec<String>,
}

/// Trims each tag, splits comma-joined values, drops empties and duplicates
/// while keeping first-seen order.
pub fn normalize_tags<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for value in raw {
        for tag in value.as_ref().split(',') {
            let tag = tag.trim();
            if !tag.is_empty() && !tags.iter().any(|t| t == tag) {
                tags.push(tag.to_string());
            }
        }
    }
    tags
}

/// Removes the picture whose basename is `filename`. Returns the removed URL.
pub fn remove_picture(pictures: &mut Vec<String>, filename: &str) -> Option<String> {
    let index = pictures.iter().position(|url| {
        std::path::Path::new(url)
            .file_name()
            .is_some_and(|name| name == filename)
    })?;
    Some(pictures.remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_split_and_deduplicated() {
        let tags = normalize_tags(&["rust, go", " ", "rust", "mongo,,"]);
        assert_eq!(tags, vec!["rust", "go", "mongo"]);
    }

    #[test]
    fn picture_removal_matches_basename() {
        let mut pictures = vec![
            "/static/uploads/attached_pictures/1_a.png".to_string(),
            "/static/uploads/attached_pictures/1_b.png".to_string(),
        ];
        assert_eq!(
            remove_picture(&mut pictures, "1_b.png").as_deref(),
            Some("/static/uploads/attached_pictures/1_b.png")
        );
        assert_eq!(pictures.len(), 1);
        assert!(remove_picture(&mut pictures, "missing.png").is_none());
    }

    #[test]
    fn empty_title_is_rejected() {
        let fields = PostFields {
            title: String::new(),
            content: "body".to_string(),
            tags: vec![],
        };
        assert!(fields.validate().is_err());
    }
}
