use serde::{Deserialize, Serialize};

use super::post::{PostSummary, normalize_tags};
use crate::error::AppError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 50;

/// Raw query parameters of `GET /posts`, kept as strings so malformed
/// values produce our own 400 body instead of the extractor's plain-text one.
#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
    pub search: Option<String>,
    pub tags: Option<String>,
    pub is_metoo: Option<String>,
    pub is_watchlisted: Option<String>,
    pub has_solution: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    CreatedAt,
    MetooCount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortDir::Asc => "ASC",
            SortDir::Desc => "DESC",
        }
    }
}

/// Row filters shared by the count query and the page query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedFilter {
    pub search: Option<String>,
    /// Every tag must be a member of the post's tag list.
    pub tags: Vec<String>,
    pub only_metoo: bool,
    pub only_watchlisted: bool,
    pub has_solution: Option<bool>,
    pub author_id: Option<i64>,
}

impl FeedFilter {
    /// Filters that only make sense for an identified caller.
    pub fn requires_identity(&self) -> bool {
        self.only_metoo || self.only_watchlisted
    }
}

/// A normalized, validated feed request.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedQuery {
    pub page: i64,
    pub limit: i64,
    pub sort_by: SortBy,
    pub sort_dir: SortDir,
    pub filter: FeedFilter,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            sort_by: SortBy::CreatedAt,
            sort_dir: SortDir::Desc,
            filter: FeedFilter::default(),
        }
    }
}

impl FeedQuery {
    /// Rows to skip. Saturates for absurd page numbers, which then read past the end.
    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_int(name: &str, value: &Option<String>) -> Result<Option<i64>, AppError> {
    non_blank(value)
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| AppError::BadRequest(format!("Invalid '{}': expected an integer", name)))
        })
        .transpose()
}

fn parse_flag(name: &str, value: &Option<String>) -> Result<Option<bool>, AppError> {
    match non_blank(value) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(_) => Err(AppError::BadRequest(format!(
            "Invalid '{}': expected true or false",
            name
        ))),
    }
}

impl TryFrom<FeedParams> for FeedQuery {
    type Error = AppError;

    fn try_from(params: FeedParams) -> Result<Self, Self::Error> {
        let page = parse_int("page", &params.page)?.unwrap_or(1).max(1);
        let limit = parse_int("limit", &params.limit)?
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let sort_by = match non_blank(&params.sort_by) {
            None | Some("created_at") => SortBy::CreatedAt,
            Some("metoo_count") => SortBy::MetooCount,
            Some(other) => {
                return Err(AppError::BadRequest(format!("Unsupported sort_by '{}'", other)));
            }
        };
        let sort_dir = match non_blank(&params.sort_dir).map(str::to_ascii_lowercase).as_deref() {
            None | Some("desc") => SortDir::Desc,
            Some("asc") => SortDir::Asc,
            Some(other) => {
                return Err(AppError::BadRequest(format!("Unsupported sort_dir '{}'", other)));
            }
        };

        let filter = FeedFilter {
            search: non_blank(&params.search).map(str::to_string),
            tags: params
                .tags
                .as_deref()
                .map(|t| normalize_tags(&[t]))
                .unwrap_or_default(),
            only_metoo: parse_flag("is_metoo", &params.is_metoo)?.unwrap_or(false),
            only_watchlisted: parse_flag("is_watchlisted", &params.is_watchlisted)?
                .unwrap_or(false),
            has_solution: parse_flag("has_solution", &params.has_solution)?,
            author_id: parse_int("user_id", &params.user_id)?,
        };

        Ok(Self {
            page,
            limit,
            sort_by,
            sort_dir,
            filter,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total_posts: i64,
    pub total_pages: i64,
    pub has_more: bool,
}

impl Pagination {
    pub fn new(page: i64, limit: i64, total_posts: i64) -> Self {
        let total_pages = (total_posts + limit - 1) / limit;
        Self {
            page,
            limit,
            total_posts,
            total_pages,
            has_more: page < total_pages,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FeedPage {
    pub posts: Vec<PostSummary>,
    pub pagination: Pagination,
}

impl FeedPage {
    pub fn empty(query: &FeedQuery) -> Self {
        Self {
            posts: Vec::new(),
            pagination: Pagination::new(query.page, query.limit, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> FeedParams {
        let mut p = FeedParams::default();
        for (k, v) in pairs {
            let v = Some(v.to_string());
            match *k {
                "page" => p.page = v,
                "limit" => p.limit = v,
                "sort_by" => p.sort_by = v,
                "sort_dir" => p.sort_dir = v,
                "search" => p.search = v,
                "tags" => p.tags = v,
                "is_metoo" => p.is_metoo = v,
                "is_watchlisted" => p.is_watchlisted = v,
                "has_solution" => p.has_solution = v,
                "user_id" => p.user_id = v,
                _ => panic!("unknown param {}", k),
            }
        }
        p
    }

    #[test]
    fn defaults() {
        let q = FeedQuery::try_from(FeedParams::default()).unwrap();
        assert_eq!(q, FeedQuery::default());
        assert_eq!(q.offset(), 0);
    }

    #[test]
    fn page_and_limit_are_clamped() {
        let q = FeedQuery::try_from(params(&[("page", "0"), ("limit", "500")])).unwrap();
        assert_eq!((q.page, q.limit), (1, MAX_PAGE_SIZE));

        let q = FeedQuery::try_from(params(&[("page", "-3"), ("limit", "0")])).unwrap();
        assert_eq!((q.page, q.limit), (1, 1));

        let q = FeedQuery::try_from(params(&[("page", "3"), ("limit", "10")])).unwrap();
        assert_eq!(q.offset(), 20);
    }

    #[test]
    fn huge_page_saturates_the_offset() {
        let q = FeedQuery::try_from(params(&[("page", "9223372036854775807"), ("limit", "10")]))
            .unwrap();
        assert_eq!(q.page, i64::MAX);
        assert_eq!(q.offset(), i64::MAX);

        let pagination = Pagination::new(q.page, q.limit, 25);
        assert_eq!(pagination.total_pages, 3);
        assert!(!pagination.has_more);
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let err = FeedQuery::try_from(params(&[("limit", "ten")])).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn tag_segments_are_trimmed_and_blank_ones_ignored() {
        let q = FeedQuery::try_from(params(&[("tags", " rust, ,go ,")])).unwrap();
        assert_eq!(q.filter.tags, vec!["rust", "go"]);
    }

    #[test]
    fn sort_options() {
        let q = FeedQuery::try_from(params(&[("sort_by", "metoo_count"), ("sort_dir", "ASC")]))
            .unwrap();
        assert_eq!(q.sort_by, SortBy::MetooCount);
        assert_eq!(q.sort_dir, SortDir::Asc);

        assert!(FeedQuery::try_from(params(&[("sort_by", "title; DROP TABLE posts")])).is_err());
        assert!(FeedQuery::try_from(params(&[("sort_dir", "sideways")])).is_err());
    }

    #[test]
    fn flags() {
        let q = FeedQuery::try_from(params(&[
            ("is_watchlisted", "true"),
            ("has_solution", "false"),
            ("user_id", "9"),
        ]))
        .unwrap();
        assert!(q.filter.only_watchlisted);
        assert!(!q.filter.only_metoo);
        assert_eq!(q.filter.has_solution, Some(false));
        assert_eq!(q.filter.author_id, Some(9));
        assert!(q.filter.requires_identity());

        assert!(FeedQuery::try_from(params(&[("has_solution", "maybe")])).is_err());
    }

    #[test]
    fn pagination_math() {
        assert_eq!(
            Pagination::new(1, 10, 25),
            Pagination {
                page: 1,
                limit: 10,
                total_posts: 25,
                total_pages: 3,
                has_more: true,
            }
        );
        assert!(!Pagination::new(3, 10, 25).has_more);
        let empty = Pagination::new(1, 10, 0);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_more);
    }
}
