use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::auth::{auth_middleware, AuthUser};
use crate::backend::{Backend, DataStore, Db, IdentityProvider, ObjectStore};
use crate::handlers::{
    attachments as attachment_handlers, auth as auth_handlers, calendar as calendar_handlers,
    changes as change_handlers, comments as comment_handlers, health,
    topics as topic_handlers,
};
use crate::notify::ChangeFeed;
use crate::Config;

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub changes: ChangeFeed,
    pub config: Config,
}

impl AppState {
    pub fn new(backend: Backend, config: Config) -> Self {
        Self {
            store: backend.store,
            objects: backend.objects,
            identity: backend.identity,
            changes: ChangeFeed::default(),
            config,
        }
    }

    /// Row store acting as `user`.
    pub fn db<'a>(&'a self, user: &'a AuthUser) -> Db<'a> {
        Db::new(self.store.as_ref(), &user.token)
    }
}

pub fn create_router(state: AppState) -> Router {
    let upload_limit = state.config.max_upload_bytes + MULTIPART_OVERHEAD;

    // Public auth routes (no middleware)
    let public_auth_routes = Router::new()
        .route("/login", post(auth_handlers::login))
        .route("/refresh", post(auth_handlers::refresh));

    let protected_auth_routes = Router::new()
        .route("/me", get(auth_handlers::me).patch(auth_handlers::update_me))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let auth_routes = Router::new()
        .merge(public_auth_routes)
        .merge(protected_auth_routes);

    let topic_routes = Router::new()
        .route("/", get(topic_handlers::list_topics))
        .route("/", post(topic_handlers::create_topic))
        .route("/:id", get(topic_handlers::get_topic))
        .route("/:id", patch(topic_handlers::update_topic))
        .route("/:id", delete(topic_handlers::delete_topic))
        .route("/:id/status", patch(topic_handlers::update_status))
        .route("/:id/comments", get(comment_handlers::list_comments))
        .route("/:id/comments", post(comment_handlers::create_comment))
        .route(
            "/:id/attachments",
            get(attachment_handlers::list_topic_attachments),
        )
        .route(
            "/:id/attachments",
            post(attachment_handlers::upload_attachment)
                .layer(DefaultBodyLimit::max(upload_limit)),
        );

    let comment_routes = Router::new()
        .route("/:id", patch(comment_handlers::update_comment))
        .route("/:id", delete(comment_handlers::delete_comment))
        .route(
            "/:id/attachments",
            get(attachment_handlers::list_comment_attachments),
        );

    // Protected routes with auth middleware
    let protected_routes = Router::new()
        .nest("/topics", topic_routes)
        .nest("/comments", comment_routes)
        .route("/attachments/:id", delete(attachment_handlers::delete_attachment))
        .route("/calendar", get(calendar_handlers::month_view))
        .route("/changes", get(change_handlers::stream_changes))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/keep-alive", get(health::keep_alive))
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
