//! Post feed and single-post views.
//!
//! The feed is built in three steps: one filtered count, one page of post
//! rows, then a fixed number of bulk lookups keyed by the page's post ids.
//! Count and page queries get their WHERE clause from the same
//! [`push_filters`] call so the two can never disagree.

use std::collections::{HashMap, HashSet};

use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::{
    error::AppError,
    models::{
        comment::{SolutionRow, SolutionView},
        feed::{FeedFilter, FeedPage, FeedQuery, Pagination, SortBy},
        post::{POST_COLUMNS, PostDetail, PostRow, PostSummary},
        user::AuthorView,
    },
    services::comments,
};

/// Related data for a set of posts, resolved in bulk.
#[derive(Debug, Default)]
pub struct FeedRelations {
    pub authors: HashMap<i64, AuthorView>,
    pub comment_counts: HashMap<i64, i64>,
    pub metoo_counts: HashMap<i64, i64>,
    pub caller_metoos: HashSet<i64>,
    pub caller_watchlist: HashSet<i64>,
    pub solutions: HashMap<i64, SolutionView>,
}

/// Builds one page of the feed for `caller` (or an anonymous caller).
pub async fn build_feed(
    pool: &PgPool,
    query: &FeedQuery,
    caller: Option<i64>,
) -> Result<FeedPage, AppError> {
    if caller.is_none() && query.filter.requires_identity() {
        return Ok(FeedPage::empty(query));
    }

    let mut count = count_query(&query.filter, caller);
    let total_posts = count.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut page = page_query(query, caller);
    let rows = page.build_query_as::<PostRow>().fetch_all(pool).await?;

    let relations = load_relations(pool, &rows, caller).await?;
    let posts = assemble(rows, relations);

    Ok(FeedPage {
        posts,
        pagination: Pagination::new(query.page, query.limit, total_posts),
    })
}

/// Escapes LIKE wildcards so user input only matches literally.
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Appends ` AND ...` clauses for every active filter. Expects the builder
/// to already end in a WHERE clause over `posts p`.
pub(crate) fn push_filters(
    builder: &mut QueryBuilder<'static, Postgres>,
    filter: &FeedFilter,
    caller: Option<i64>,
) {
    if let Some(author_id) = filter.author_id {
        builder.push(" AND p.user_id = ").push_bind(author_id);
    }

    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        builder
            .push(" AND (p.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR p.content ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    for tag in &filter.tags {
        builder.push(" AND ").push_bind(tag.clone()).push(" = ANY(p.tags)");
    }

    match (filter.only_metoo, caller) {
        (false, _) => {}
        (true, Some(user_id)) => {
            builder
                .push(" AND EXISTS (SELECT 1 FROM me_toos m WHERE m.post_id = p.id AND m.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
        (true, None) => {
            builder.push(" AND FALSE");
        }
    }

    match (filter.only_watchlisted, caller) {
        (false, _) => {}
        (true, Some(user_id)) => {
            builder
                .push(" AND EXISTS (SELECT 1 FROM user_watchlist w WHERE w.post_id = p.id AND w.user_id = ")
                .push_bind(user_id)
                .push(")");
        }
        (true, None) => {
            builder.push(" AND FALSE");
        }
    }

    match filter.has_solution {
        Some(true) => {
            builder.push(
                " AND EXISTS (SELECT 1 FROM comments s WHERE s.post_id = p.id AND s.is_solution)",
            );
        }
        Some(false) => {
            builder.push(
                " AND NOT EXISTS (SELECT 1 FROM comments s WHERE s.post_id = p.id AND s.is_solution)",
            );
        }
        None => {}
    }
}

pub(crate) fn count_query(
    filter: &FeedFilter,
    caller: Option<i64>,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM posts p WHERE TRUE");
    push_filters(&mut builder, filter, caller);
    builder
}

pub(crate) fn page_query(query: &FeedQuery, caller: Option<i64>) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {} FROM posts p WHERE TRUE", POST_COLUMNS));
    push_filters(&mut builder, &query.filter, caller);

    let primary = match query.sort_by {
        SortBy::CreatedAt => "p.created_at",
        SortBy::MetooCount => "(SELECT COUNT(*) FROM me_toos mc WHERE mc.post_id = p.id)",
    };
    // Post id breaks ties so page boundaries are stable.
    builder.push(format!(
        " ORDER BY {} {}, p.id DESC",
        primary,
        query.sort_dir.as_sql()
    ));
    builder
        .push(" LIMIT ")
        .push_bind(query.limit)
        .push(" OFFSET ")
        .push_bind(query.offset());
    builder
}

/// Resolves authors, counts, caller flags and solutions for `rows`,
/// one query per kind of data regardless of page size.
pub async fn load_relations(
    pool: &PgPool,
    rows: &[PostRow],
    caller: Option<i64>,
) -> Result<FeedRelations, AppError> {
    if rows.is_empty() {
        return Ok(FeedRelations::default());
    }

    let post_ids: Vec<i64> = rows.iter().map(|p| p.id).collect();
    let mut user_ids: Vec<i64> = rows.iter().map(|p| p.user_id).collect();
    user_ids.sort_unstable();
    user_ids.dedup();

    let authors = sqlx::query_as::<_, AuthorView>(
        "SELECT id, username, profile_picture_url FROM users WHERE id = ANY($1)",
    )
    .bind(&user_ids)
    .fetch_all(pool);

    let comment_counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT post_id, COUNT(*) FROM comments WHERE post_id = ANY($1) GROUP BY post_id",
    )
    .bind(&post_ids)
    .fetch_all(pool);

    let metoo_counts = sqlx::query_as::<_, (i64, i64)>(
        "SELECT post_id, COUNT(*) FROM me_toos WHERE post_id = ANY($1) GROUP BY post_id",
    )
    .bind(&post_ids)
    .fetch_all(pool);

    let solutions = sqlx::query_as::<_, SolutionRow>(
        r#"
        SELECT c.post_id, c.id, c.content, c.pictures, c.created_at,
               u.id AS user_id, u.username, u.profile_picture_url
        FROM comments c
        JOIN users u ON u.id = c.user_id
        WHERE c.post_id = ANY($1) AND c.is_solution
        "#,
    )
    .bind(&post_ids)
    .fetch_all(pool);

    let (authors, comment_counts, metoo_counts, solutions) =
        tokio::try_join!(authors, comment_counts, metoo_counts, solutions)?;

    let (caller_metoos, caller_watchlist) = match caller {
        Some(user_id) => {
            let metoos = sqlx::query_scalar::<_, i64>(
                "SELECT post_id FROM me_toos WHERE user_id = $1 AND post_id = ANY($2)",
            )
            .bind(user_id)
            .bind(&post_ids)
            .fetch_all(pool);
            let watchlist = sqlx::query_scalar::<_, i64>(
                "SELECT post_id FROM user_watchlist WHERE user_id = $1 AND post_id = ANY($2)",
            )
            .bind(user_id)
            .bind(&post_ids)
            .fetch_all(pool);
            let (metoos, watchlist) = tokio::try_join!(metoos, watchlist)?;
            (
                metoos.into_iter().collect(),
                watchlist.into_iter().collect(),
            )
        }
        None => (HashSet::new(), HashSet::new()),
    };

    Ok(FeedRelations {
        authors: authors.into_iter().map(|a| (a.id, a)).collect(),
        comment_counts: comment_counts.into_iter().collect(),
        metoo_counts: metoo_counts.into_iter().collect(),
        caller_metoos,
        caller_watchlist,
        solutions: solutions
            .into_iter()
            .map(|s| (s.post_id, SolutionView::from(s)))
            .collect(),
    })
}

/// Stitches rows and their relations into response records, keeping row
/// order. Posts whose author is missing are skipped.
pub fn assemble(rows: Vec<PostRow>, mut relations: FeedRelations) -> Vec<PostSummary> {
    let mut posts = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(user) = relations.authors.get(&row.user_id).cloned() else {
            tracing::warn!("User {} not found for post {}, skipping", row.user_id, row.id);
            continue;
        };

        posts.push(PostSummary {
            id: row.id,
            comment_count: relations.comment_counts.get(&row.id).copied().unwrap_or(0),
            is_metoo: relations.caller_metoos.contains(&row.id),
            metoo_count: relations.metoo_counts.get(&row.id).copied().unwrap_or(0),
            is_watchlisted: relations.caller_watchlist.contains(&row.id),
            solution: relations.solutions.remove(&row.id),
            title: row.title,
            content: row.content,
            pictures: row.pictures,
            tags: row.tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
            user,
        });
    }

    posts
}

pub async fn fetch_post_row(pool: &PgPool, post_id: i64) -> Result<PostRow, AppError> {
    sqlx::query_as::<_, PostRow>(&format!("SELECT {} FROM posts p WHERE p.id = $1", POST_COLUMNS))
        .bind(post_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Post not found".to_string()))
}

/// One post in feed shape, relative to `caller`.
pub async fn post_summary(
    pool: &PgPool,
    row: PostRow,
    caller: Option<i64>,
) -> Result<PostSummary, AppError> {
    let post_id = row.id;
    let rows = vec![row];
    let relations = load_relations(pool, &rows, caller).await?;
    assemble(rows, relations).pop().ok_or_else(|| {
        AppError::InternalServerError(format!("Author of post {} not found", post_id))
    })
}

/// One post with all its comments.
pub async fn post_detail(
    pool: &PgPool,
    post_id: i64,
    caller: Option<i64>,
) -> Result<PostDetail, AppError> {
    let row = fetch_post_row(pool, post_id).await?;
    let post = post_summary(pool, row, caller).await?;
    let comments = comments::comments_for_post(pool, post_id, caller).await?;
    Ok(PostDetail { post, comments })
}
