// src/routes.rs

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, post, put},
};
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::{
    config::Config,
    handlers::{admin, auth, comments, engagement, posts, users},
    state::AppState,
    utils::{
        jwt::{admin_middleware, auth_middleware},
        upload::PUBLIC_PREFIX,
    },
};

/// Multipart bodies carry up to five 5 MB pictures plus text.
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

fn cors_layer(config: &Config) -> CorsLayer {
    let origin = if config.cors_origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Assembles the main application router.
///
/// * Public routes accept an optional bearer token.
/// * Write routes sit behind `auth_middleware`; admin routes additionally
///   behind `admin_middleware`.
/// * Uploaded pictures are served from the upload root under `/static`.
pub fn create_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/auth", post(auth::login))
        .route("/users/{id}", get(users::get_user))
        .route("/users/{id}/posts", get(users::user_posts))
        .route("/posts", get(posts::list_posts))
        .route("/posts/{id}", get(posts::get_post));

    let protected_routes = Router::new()
        .route("/check-auth", post(auth::check_auth))
        .route("/users/me/username", put(users::update_username))
        .route("/users/me/password", put(users::update_password))
        .route("/users/me/picture", put(users::update_picture))
        .route("/posts", post(posts::create_post))
        .route(
            "/posts/{id}",
            put(posts::update_post).delete(posts::delete_post),
        )
        .route(
            "/posts/{id}/pictures/{filename}",
            delete(posts::delete_post_picture),
        )
        .route("/posts/{id}/metoo", post(engagement::toggle_metoo))
        .route("/posts/{id}/watchlist", post(engagement::toggle_watchlist))
        .route("/posts/{id}/comment", post(comments::create_comment))
        .route(
            "/posts/comment/{id}",
            put(comments::update_comment).delete(comments::delete_comment),
        )
        .route(
            "/posts/comment/{id}/pictures/{filename}",
            delete(comments::delete_comment_picture),
        )
        .route(
            "/posts/comment/{id}/solution",
            put(comments::toggle_solution),
        )
        .route("/posts/comment/{id}/react", post(comments::react))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    let admin_routes = Router::new()
        .route("/users/role", put(admin::update_role))
        .route(
            "/admin/reconcile-counters",
            post(admin::reconcile_counters),
        )
        // Layers run outside in: auth first, then the admin check.
        .route_layer(middleware::from_fn_with_state(
            state.pool.clone(),
            admin_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            state.config.clone(),
            auth_middleware,
        ));

    let static_files = ServeDir::new(state.uploads.root());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(admin_routes)
        .nest_service(PUBLIC_PREFIX, static_files)
        // Global Middleware (applied from outside in)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config))
        .with_state(state)
}
