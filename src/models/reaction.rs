use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Like,
    Dislike,
}

impl ReactionKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "like" => Some(ReactionKind::Like),
            "dislike" => Some(ReactionKind::Dislike),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReactionKind::Like => "like",
            ReactionKind::Dislike => "dislike",
        }
    }
}

/// Body of `POST /posts/comment/{id}/react`.
#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub reaction: String,
}

#[derive(Debug, Serialize)]
pub struct ReactionResponse {
    pub id: i64,
    pub like_count: i32,
    pub dislike_count: i32,
    pub is_liked: bool,
    pub is_disliked: bool,
}
