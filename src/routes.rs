use axum::{middleware, Router};
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::middleware::JwtSecret;
use crate::chat::{conversations, groups, messages};
use crate::notify::{admin as admin_notify, social as social_notify};
use crate::presence;
use crate::state::AppState;
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
    // Rate limiting on the WS handshake: 10 connection attempts per minute
    // per IP. Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(6) // 1 token every 6 seconds = 10 per minute
            .burst_size(10)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Spawn background task to clean up rate limiter state
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // WebSocket endpoint (auth via query params, not JWT header)
    let ws_routes = Router::new()
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .layer(GovernorLayer {
            config: governor_config,
        });

    let chat_routes = Router::new()
        .route(
            "/api/conversations",
            axum::routing::get(conversations::list_conversations),
        )
        .route(
            "/api/conversations/groups",
            axum::routing::post(groups::create_group),
        )
        .route(
            "/api/conversations/groups/{id}",
            axum::routing::put(groups::update_group),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::get(messages::list_messages),
        )
        .route(
            "/api/conversations/{id}/messages",
            axum::routing::delete(messages::clear_conversation),
        )
        .route(
            "/api/conversations/{id}/read",
            axum::routing::post(messages::mark_conversation_read),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::put(messages::edit_message),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::delete(messages::delete_message),
        );

    let notification_routes = Router::new()
        .route(
            "/api/notifications",
            axum::routing::get(social_notify::list_notifications),
        )
        .route(
            "/api/notifications/unread-count",
            axum::routing::get(social_notify::unread_count),
        )
        .route(
            "/api/notifications/read-all",
            axum::routing::put(social_notify::read_all),
        )
        .route(
            "/api/notifications/{id}/read",
            axum::routing::put(social_notify::read_one),
        )
        .route(
            "/api/notifications/{id}",
            axum::routing::delete(social_notify::delete_one),
        );

    // Admin notification surface. Note: /read and /read-all MUST come
    // before /{id} variants to avoid path param conflicts.
    let admin_notification_routes = Router::new()
        .route(
            "/api/admin/notifications",
            axum::routing::get(admin_notify::list_notifications),
        )
        .route(
            "/api/admin/notifications/unread-count",
            axum::routing::get(admin_notify::unread_count),
        )
        .route(
            "/api/admin/notifications/read-all",
            axum::routing::put(admin_notify::read_all),
        )
        .route(
            "/api/admin/notifications/read",
            axum::routing::delete(admin_notify::purge_read),
        )
        .route(
            "/api/admin/notifications/{id}/read",
            axum::routing::put(admin_notify::read_one),
        )
        .route(
            "/api/admin/notifications/{id}",
            axum::routing::delete(admin_notify::delete_one),
        );

    let presence_routes = Router::new().route(
        "/api/users/online",
        axum::routing::get(presence::online_users),
    );

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(ws_routes)
        .merge(chat_routes)
        .merge(notification_routes)
        .merge(admin_notification_routes)
        .merge(presence_routes)
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
