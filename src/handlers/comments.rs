use axum::{
    Extension, Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        comment::{COMMENT_COLUMNS, CommentFields, CommentRow, MAX_COMMENT_PICTURES},
        post::remove_picture,
        reaction::{ReactRequest, ReactionKind},
    },
    services::{
        access::{caller_role, ensure_can_manage},
        comments, reactions, solution,
    },
    utils::{form::FormData, jwt::Claims, upload::UploadStore},
};

fn too_many_pictures() -> AppError {
    AppError::BadRequest(format!(
        "A comment can have at most {} pictures",
        MAX_COMMENT_PICTURES
    ))
}

/// Adds a comment (`content`, up to three `pictures`) to a post.
pub async fn create_comment(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut form = FormData::from_multipart(multipart).await?;

    let fields = CommentFields {
        content: form.text("content").unwrap_or_default().to_string(),
    };
    fields.validate()?;

    if form.file_count("pictures") > MAX_COMMENT_PICTURES {
        return Err(too_many_pictures());
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM posts WHERE id = $1")
        .bind(post_id)
        .fetch_optional(&pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::NotFound("Post not found".to_string()));
    }

    let files = form.take_files("pictures");
    let pictures = uploads
        .save_attachments(&format!("comment_{}", user_id), &files)
        .await;

    let inserted = sqlx::query_as::<_, CommentRow>(&format!(
        r#"
        INSERT INTO comments AS c (post_id, user_id, content, pictures)
        VALUES ($1, $2, $3, $4)
        RETURNING {}
        "#,
        COMMENT_COLUMNS
    ))
    .bind(post_id)
    .bind(user_id)
    .bind(&fields.content)
    .bind(&pictures)
    .fetch_one(&pool)
    .await;

    let row = match inserted {
        Ok(row) => row,
        Err(e) => {
            uploads.remove_all(&pictures).await;
            return Err(e.into());
        }
    };

    tracing::info!("User {} commented on post {}", user_id, post_id);

    let comment = comments::comment_view(&pool, row, Some(user_id)).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn lock_comment_for_edit(
    tx: &mut sqlx::PgConnection,
    comment_id: i64,
    caller_id: i64,
) -> Result<CommentRow, AppError> {
    let row = sqlx::query_as::<_, CommentRow>(&format!(
        "SELECT {} FROM comments c WHERE c.id = $1 FOR UPDATE",
        COMMENT_COLUMNS
    ))
    .bind(comment_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Comment not found".to_string()))?;

    let role = caller_role(tx, caller_id).await?;
    ensure_can_manage(caller_id, role, row.user_id, "comment")?;
    Ok(row)
}

/// Edits a comment's `content` and appends `new_pictures`.
pub async fn update_comment(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut form = FormData::from_multipart(multipart).await?;

    let current = comments::fetch_comment_row(&pool, comment_id).await?;
    {
        let mut conn = pool.acquire().await?;
        let role = caller_role(&mut conn, user_id).await?;
        ensure_can_manage(user_id, role, current.user_id, "comment")?;
    }
    if current.pictures.len() + form.file_count("new_pictures") > MAX_COMMENT_PICTURES {
        return Err(too_many_pictures());
    }

    let content = form.text("content").map(str::to_string);
    let files = form.take_files("new_pictures");
    let added = uploads
        .save_attachments(&format!("comment_{}", user_id), &files)
        .await;

    let result = async {
        let mut tx = pool.begin().await?;
        let row = lock_comment_for_edit(&mut tx, comment_id, user_id).await?;

        let mut pictures = row.pictures;
        if pictures.len() + added.len() > MAX_COMMENT_PICTURES {
            return Err(too_many_pictures());
        }
        pictures.extend(added.iter().cloned());

        let fields = CommentFields {
            content: content.unwrap_or(row.content),
        };
        fields.validate()?;

        let updated = sqlx::query_as::<_, CommentRow>(&format!(
            r#"
            UPDATE comments AS c
            SET content = $2, pictures = $3, updated_at = NOW()
            WHERE c.id = $1
            RETURNING {}
            "#,
            COMMENT_COLUMNS
        ))
        .bind(comment_id)
        .bind(&fields.content)
        .bind(&pictures)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok::<_, AppError>(updated)
    }
    .await;

    let row = match result {
        Ok(row) => row,
        Err(e) => {
            uploads.remove_all(&added).await;
            return Err(e);
        }
    };

    let comment = comments::comment_view(&pool, row, Some(user_id)).await?;
    Ok(Json(comment))
}

pub async fn delete_comment(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    comments::delete_comment(&pool, &uploads, comment_id, claims.user_id()?).await?;
    Ok(Json(json!({ "message": "Comment deleted" })))
}

pub async fn delete_comment_picture(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path((comment_id, filename)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    let row = lock_comment_for_edit(&mut tx, comment_id, user_id).await?;
    let mut pictures = row.pictures.clone();
    let removed = remove_picture(&mut pictures, &filename)
        .ok_or_else(|| AppError::NotFound("Picture not found".to_string()))?;

    let updated = sqlx::query_as::<_, CommentRow>(&format!(
        "UPDATE comments AS c SET pictures = $2, updated_at = NOW() WHERE c.id = $1 RETURNING {}",
        COMMENT_COLUMNS
    ))
    .bind(comment_id)
    .bind(&pictures)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    uploads.remove(&removed).await;

    let comment = comments::comment_view(&pool, updated, Some(user_id)).await?;
    Ok(Json(comment))
}

/// Accepts, swaps or withdraws the comment as its post's solution.
pub async fn toggle_solution(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let response = solution::toggle_solution(&pool, comment_id, claims.user_id()?).await?;
    Ok(Json(response))
}

pub async fn react(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(comment_id): Path<i64>,
    Json(payload): Json<ReactRequest>,
) -> Result<impl IntoResponse, AppError> {
    let kind = ReactionKind::parse(payload.reaction.trim()).ok_or_else(|| {
        AppError::BadRequest("Reaction must be 'like' or 'dislike'".to_string())
    })?;

    let response = reactions::react(&pool, comment_id, claims.user_id()?, kind).await?;
    Ok(Json(response))
}
