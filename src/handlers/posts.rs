use axum::{
    Extension, Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    extractors::MaybeClaims,
    models::{
        feed::{FeedParams, FeedQuery},
        post::{MAX_POST_PICTURES, POST_COLUMNS, PostFields, PostRow, normalize_tags, remove_picture},
    },
    services::{
        access::{caller_role, ensure_can_manage},
        counters::{self, UserDelta},
        feed, post_deletion,
    },
    utils::{form::FormData, jwt::Claims, upload::UploadStore},
};

/// Paginated, filtered feed. Works for anonymous callers.
pub async fn list_posts(
    State(pool): State<PgPool>,
    caller: MaybeClaims,
    Query(params): Query<FeedParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = FeedQuery::try_from(params)?;
    let page = feed::build_feed(&pool, &query, caller.user_id()).await?;
    Ok(Json(page))
}

pub async fn get_post(
    State(pool): State<PgPool>,
    caller: MaybeClaims,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let detail = feed::post_detail(&pool, post_id, caller.user_id()).await?;
    Ok(Json(detail))
}

/// Creates a post from a multipart form.
///
/// Fields: `title`, `content`, repeated `tags` and up to five `pictures`.
/// Pictures of the wrong type or size are skipped; too many is a 400.
pub async fn create_post(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut form = FormData::from_multipart(multipart).await?;

    let fields = PostFields {
        title: form.text("title").unwrap_or_default().to_string(),
        content: form.text("content").unwrap_or_default().to_string(),
        tags: normalize_tags(form.texts("tags").unwrap_or_default()),
    };
    fields.validate()?;

    if form.file_count("pictures") > MAX_POST_PICTURES {
        return Err(AppError::BadRequest(format!(
            "A post can have at most {} pictures",
            MAX_POST_PICTURES
        )));
    }

    let files = form.take_files("pictures");
    let pictures = uploads
        .save_attachments(&format!("post_{}", user_id), &files)
        .await;

    let row = match insert_post(&pool, user_id, &fields, &pictures).await {
        Ok(row) => row,
        Err(e) => {
            uploads.remove_all(&pictures).await;
            return Err(e);
        }
    };

    tracing::info!("User {} created post {}", user_id, row.id);

    let post = feed::post_summary(&pool, row, Some(user_id)).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

/// Inserts the post and bumps the owner's post counter in one transaction.
async fn insert_post(
    pool: &PgPool,
    user_id: i64,
    fields: &PostFields,
    pictures: &[String],
) -> Result<PostRow, AppError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, PostRow>(&format!(
        r#"
        INSERT INTO posts AS p (user_id, title, content, tags, pictures)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {}
        "#,
        POST_COLUMNS
    ))
    .bind(user_id)
    .bind(&fields.title)
    .bind(&fields.content)
    .bind(&fields.tags)
    .bind(pictures)
    .fetch_one(&mut *tx)
    .await?;

    counters::apply(&mut tx, &[UserDelta::new(user_id).posts(1)]).await?;

    tx.commit().await?;
    Ok(row)
}

/// Locks the post row and checks the caller may modify it.
async fn lock_post_for_edit(
    tx: &mut sqlx::PgConnection,
    post_id: i64,
    caller_id: i64,
) -> Result<PostRow, AppError> {
    let row = sqlx::query_as::<_, PostRow>(&format!(
        "SELECT {} FROM posts p WHERE p.id = $1 FOR UPDATE",
        POST_COLUMNS
    ))
    .bind(post_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Post not found".to_string()))?;

    let role = caller_role(tx, caller_id).await?;
    ensure_can_manage(caller_id, role, row.user_id, "post")?;
    Ok(row)
}

/// Edits a post. Absent fields keep their value; `new_pictures` are appended.
pub async fn update_post(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut form = FormData::from_multipart(multipart).await?;

    // Checked up front so nothing is written for a request that cannot succeed.
    let current = feed::fetch_post_row(&pool, post_id).await?;
    {
        let mut conn = pool.acquire().await?;
        let role = caller_role(&mut conn, user_id).await?;
        ensure_can_manage(user_id, role, current.user_id, "post")?;
    }
    let incoming = form.file_count("new_pictures");
    if current.pictures.len() + incoming > MAX_POST_PICTURES {
        return Err(AppError::BadRequest(format!(
            "A post can have at most {} pictures",
            MAX_POST_PICTURES
        )));
    }

    let title = form.text("title").map(str::to_string);
    let content = form.text("content").map(str::to_string);
    let tags = form.texts("tags").map(normalize_tags);

    let files = form.take_files("new_pictures");
    let added = uploads
        .save_attachments(&format!("post_{}", user_id), &files)
        .await;

    let result = async {
        let mut tx = pool.begin().await?;
        let row = lock_post_for_edit(&mut tx, post_id, user_id).await?;

        let mut pictures = row.pictures;
        if pictures.len() + added.len() > MAX_POST_PICTURES {
            return Err(AppError::BadRequest(format!(
                "A post can have at most {} pictures",
                MAX_POST_PICTURES
            )));
        }
        pictures.extend(added.iter().cloned());

        let fields = PostFields {
            title: title.unwrap_or(row.title),
            content: content.unwrap_or(row.content),
            tags: tags.unwrap_or(row.tags),
        };
        fields.validate()?;

        let updated = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            UPDATE posts AS p
            SET title = $2, content = $3, tags = $4, pictures = $5, updated_at = NOW()
            WHERE p.id = $1
            RETURNING {}
            "#,
            POST_COLUMNS
        ))
        .bind(post_id)
        .bind(&fields.title)
        .bind(&fields.content)
        .bind(&fields.tags)
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

    let post = feed::post_summary(&pool, row, Some(user_id)).await?;
    Ok(Json(post))
}

pub async fn delete_post(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path(post_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    post_deletion::delete_post(&pool, &uploads, post_id, claims.user_id()?).await?;
    Ok(Json(json!({ "message": "Post deleted" })))
}

/// Removes one picture, addressed by file name, from a post.
pub async fn delete_post_picture(
    State(pool): State<PgPool>,
    State(uploads): State<UploadStore>,
    Extension(claims): Extension<Claims>,
    Path((post_id, filename)): Path<(i64, String)>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;
    let mut tx = pool.begin().await?;

    let row = lock_post_for_edit(&mut tx, post_id, user_id).await?;
    let mut pictures = row.pictures.clone();
    let removed = remove_picture(&mut pictures, &filename)
        .ok_or_else(|| AppError::NotFound("Picture not found".to_string()))?;

    let updated = sqlx::query_as::<_, PostRow>(&format!(
        "UPDATE posts AS p SET pictures = $2, updated_at = NOW() WHERE p.id = $1 RETURNING {}",
        POST_COLUMNS
    ))
    .bind(post_id)
    .bind(&pictures)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    uploads.remove(&removed).await;

    let post = feed::post_summary(&pool, updated, Some(user_id)).await?;
    Ok(Json(post))
}
