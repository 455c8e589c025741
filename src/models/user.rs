// src/models/user.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'users' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,

    pub email: String,

    /// Unique username.
    pub username: String,

    /// Argon2 password hash.
    /// Skipped during serialization to prevent leaking sensitive data.
    #[serde(skip)]
    pub password: String,

    /// 'user', 'moderator' or 'admin'.
    pub role: String,

    pub profile_picture_url: Option<String>,

    // Derived counters, recomputable from base rows.
    pub reputation: i32,
    pub number_of_posts: i32,
    pub number_of_solutions: i32,

    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// Column list matching `User`, for `query_as` calls.
pub const USER_COLUMNS: &str = "id, email, username, password, role, profile_picture_url, \
     reputation, number_of_posts, number_of_solutions, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "moderator" => Some(Role::Moderator),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn can_moderate(self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }
}

/// Public profile, as shown on `/users/{id|username}`.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub username: String,
    pub role: String,
    pub profile_picture_url: Option<String>,
    pub reputation: i32,
    pub number_of_posts: i32,
    pub number_of_solutions: i32,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            role: user.role,
            profile_picture_url: user.profile_picture_url,
            reputation: user.reputation,
            number_of_posts: user.number_of_posts,
            number_of_solutions: user.number_of_solutions,
        }
    }
}

/// Author block embedded in posts, comments and solutions.
#[derive(Debug, Clone, Serialize, FromRow, PartialEq)]
pub struct AuthorView {
    pub id: i64,
    pub username: String,
    pub profile_picture_url: Option<String>,
}

/// Session payload returned by login, registration and `/check-auth`.
#[derive(Debug, Serialize)]
pub struct SessionUser {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub profile_picture_url: Option<String>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionUser {
    pub fn new(user: User, token: Option<String>) -> Self {
        Self {
            id: user.id,
            email: user.email,
            username: user.username,
            profile_picture_url: user.profile_picture_url,
            role: user.role,
            token,
        }
    }
}

static USERNAME_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.-]+$").expect("username pattern is valid")
});

fn validate_username_chars(username: &str) -> Result<(), validator::ValidationError> {
    if !USERNAME_CHARS.is_match(username) {
        return Err(validator::ValidationError::new("invalid_username_chars"));
    }
    Ok(())
}

/// DTO for creating a new user (Registration).
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email is required."))]
    pub email: String,
    #[validate(
        length(
            min = 3,
            max = 24,
            message = "Username must be between 3 and 24 characters."
        ),
        custom(function = validate_username_chars)
    )]
    pub username: String,
    #[validate(length(
        min = 6,
        max = 24,
        message = "Password must be between 6 and 24 characters."
    ))]
    pub password: String,
}

/// DTO for user login.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 254))]
    pub email: String,
    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUsernameRequest {
    #[validate(
        length(
            min = 3,
            max = 24,
            message = "Username must be between 3 and 24 characters."
        ),
        custom(function = validate_username_chars)
    )]
    pub username: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePasswordRequest {
    /// Current password.
    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
    #[validate(length(
        min = 6,
        max = 24,
        message = "Password must be between 6 and 24 characters"
    ))]
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub user_id: i64,
    pub role: Role,
}
