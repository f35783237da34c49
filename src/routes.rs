use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::messages;
use crate::listings;
use crate::notify;
use crate::promo;
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Inject the JWT secret into request extensions so the Claims extractor can find it.
async fn inject_jwt_secret(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: middleware::Next,
) -> axum::response::Response {
    req.extensions_mut()
        .insert(JwtSecret(state.jwt_secret.clone()));
    next.run(req).await
}

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting on the paid promotion endpoint: 10 requests per minute
    // per IP. Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let promote_governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6)
            .burst_size(10)
            .finish()
            .expect("Failed to build governor config"),
    );
    let promote_limiter = promote_governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            promote_limiter.retain_recent();
        }
    });

    // Directory registration (public; issues the bearer token)
    let public_routes = Router::new()
        .route("/api/users", axum::routing::post(users::create_user));

    // Messaging (JWT required — Claims extractor validates token)
    let message_routes = Router::new()
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/{other_user_id}",
            axum::routing::get(messages::get_history),
        )
        .route(
            "/api/messages/{other_user_id}/read",
            axum::routing::post(messages::mark_read),
        );

    // Notification inbox (JWT required)
    let notification_routes = Router::new()
        .route("/api/notifications", axum::routing::get(notify::list))
        .route(
            "/api/notifications/{id}/read",
            axum::routing::post(notify::mark_read),
        );

    // Listings and promotion. The ranked list is public; everything that
    // writes requires a JWT. Promote is additionally rate limited.
    let offer_routes = Router::new()
        .route("/api/offers", axum::routing::get(promo::list_offers))
        .route("/api/offers", axum::routing::post(listings::create_offer))
        .route(
            "/api/offers/{id}/promotion",
            axum::routing::get(promo::promotion_status),
        )
        .route("/api/requests", axum::routing::post(listings::create_request));
    let promote_routes = Router::new()
        .route(
            "/api/offers/{id}/promote",
            axum::routing::post(promo::promote),
        )
        .layer(GovernorLayer::new(promote_governor_config));

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(public_routes)
        .merge(message_routes)
        .merge(notification_routes)
        .merge(offer_routes)
        .merge(promote_routes)
        .merge(ws_routes)
        .merge(health)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            inject_jwt_secret,
        ))
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
