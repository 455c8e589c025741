use sqlx::PgConnection;

use crate::{error::AppError, models::user::Role};

/// Current role of the caller, read from the store rather than the token.
pub async fn caller_role(conn: &mut PgConnection, user_id: i64) -> Result<Role, AppError> {
    let role: Option<String> = sqlx::query_scalar("SELECT role FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    role.map(|r| Role::parse(&r).unwrap_or(Role::User))
        .ok_or_else(|| AppError::AuthError("User not found".to_string()))
}

/// Owner of the resource, or a moderator/admin.
pub fn ensure_can_manage(
    caller_id: i64,
    role: Role,
    owner_id: i64,
    what: &str,
) -> Result<(), AppError> {
    if caller_id == owner_id || role.can_moderate() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "You are not allowed to modify this {}",
            what
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_or_moderator_only() {
        assert!(ensure_can_manage(1, Role::User, 1, "post").is_ok());
        assert!(ensure_can_manage(1, Role::Moderator, 2, "post").is_ok());
        assert!(ensure_can_manage(1, Role::Admin, 2, "comment").is_ok());
        assert!(matches!(
            ensure_can_manage(1, Role::User, 2, "post"),
            Err(AppError::Forbidden(_))
        ));
    }
}
