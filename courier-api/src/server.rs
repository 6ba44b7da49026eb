use anyhow::Result;
use axum::{
    extract::Extension,
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing;

use courier_core::CourierContext;
use courier_notify::NotificationService;

use crate::auth;
use crate::handlers;
use crate::session;

/// Shared API state: the pipeline context plus the notification service the
/// handlers and sessions go through.
#[derive(Clone)]
pub struct ApiState {
    pub ctx: CourierContext,
    pub notify: Arc<NotificationService>,
}

pub async fn run(ctx: CourierContext) -> Result<()> {
    let api_port = ctx.config.server.api_port;
    let state = ApiState {
        notify: Arc::new(NotificationService::new(ctx.clone())),
        ctx,
    };

    // Allow specific origins when CORS_ORIGINS is set, permissive otherwise.
    let cors_layer = if let Ok(origins) = env::var("CORS_ORIGINS") {
        let origin_list: Vec<&str> = origins.split(',').map(|s| s.trim()).collect();
        let mut cors = CorsLayer::new();
        for origin in origin_list {
            if let Ok(parsed) = origin.parse::<axum::http::HeaderValue>() {
                cors = cors.allow_origin(parsed);
            }
        }
        cors.allow_methods(Any).allow_headers(Any)
    } else {
        tracing::warn!("CORS_ORIGINS not set, using permissive CORS. Set CORS_ORIGINS for production!");
        CorsLayer::permissive()
    };

    let app = router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], api_port));
    tracing::info!("starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(session::websocket_handler))
        .route(
            "/api/v1/notifications",
            get(handlers::list_notifications)
                .post(handlers::send_notification)
                .delete(handlers::clear_all_notifications),
        )
        .route(
            "/api/v1/notifications/counts",
            get(handlers::get_notification_counts),
        )
        .route(
            "/api/v1/notifications/read-all",
            post(handlers::mark_all_read),
        )
        .route(
            "/api/v1/notifications/:id/read",
            post(handlers::mark_notification_read),
        )
        .route(
            "/api/v1/notifications/:id",
            delete(handlers::delete_notification),
        )
        .route(
            "/api/v1/preferences",
            get(handlers::get_preferences).put(handlers::update_preferences),
        )
        .layer(
            ServiceBuilder::new()
                .layer(Extension(state))
                .layer(middleware::from_fn(auth::auth_middleware)),
        )
}
