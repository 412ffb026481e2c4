use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use alumnet_api::ApiState;
use alumnet_db::Database;
use alumnet_gateway::auth::{Authenticator, JwtAuthenticator};
use alumnet_gateway::blobs::DbBlobStore;
use alumnet_gateway::cache::Caches;
use alumnet_gateway::connection;
use alumnet_gateway::notify::{BadgeService, GatewayBadges, WebhookBadges};
use alumnet_gateway::{ChatService, Dispatcher};

use crate::config::ServerConfig;

#[derive(Clone)]
struct GatewayState {
    chat: ChatService,
    auth: Arc<dyn Authenticator>,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

/// Wire the chat core to its collaborators as configured.
pub fn build_service(config: &ServerConfig, db: Arc<Database>) -> Result<ChatService> {
    let dispatcher = Dispatcher::new();
    let badges: Arc<dyn BadgeService> = match &config.badge_webhook_url {
        Some(url) => {
            info!("Badge updates go to {}", url);
            Arc::new(WebhookBadges::new(url.as_str())?)
        }
        None => Arc::new(GatewayBadges::new(dispatcher.clone())),
    };
    let blobs = Arc::new(DbBlobStore::new(db.clone()));

    Ok(ChatService::new(
        db,
        dispatcher,
        Caches::new(config.cache),
        badges,
        blobs,
    ))
}

pub fn build_app(chat: ChatService, jwt_secret: &str) -> Router {
    let auth: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(jwt_secret));

    let api_routes = alumnet_api::router(ApiState {
        chat: chat.clone(),
        auth: auth.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(GatewayState { chat, auth });

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// The upgrade is always accepted; a bad token is answered with a close
/// frame so the client can tell auth failures from network errors.
async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let verified = state
        .auth
        .authenticate(query.token.as_deref().unwrap_or_default());

    match verified {
        Ok(identity) => {
            ws.on_upgrade(move |socket| connection::handle_connection(socket, state.chat, identity))
        }
        Err(e) => {
            debug!("Gateway auth failed: {}", e);
            let reason = e.to_string();
            ws.on_upgrade(move |socket| async move {
                connection::reject_connection(socket, &reason).await
            })
        }
    }
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "online_users": state.chat.dispatcher().online_users().len(),
    }))
}
