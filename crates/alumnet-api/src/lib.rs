pub mod conversations;
pub mod error;
pub mod groups;
pub mod middleware;
pub mod reactions;
pub mod requests;

use std::sync::Arc;

use axum::{
    Router, middleware as layer,
    routing::{get, post, put},
};

use alumnet_gateway::ChatService;
use alumnet_gateway::auth::Authenticator;

/// Shared by every handler. The HTTP surface goes through the same
/// `ChatService` as the socket gateway, so caches and fan-out behave the same
/// whichever side a write comes from.
#[derive(Clone)]
pub struct ApiState {
    pub chat: ChatService,
    pub auth: Arc<dyn Authenticator>,
}

/// Every route requires a bearer token.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/{key}/messages", get(conversations::get_messages))
        .route("/conversations/{key}/pinned", get(conversations::get_pinned))
        .route("/conversations/{key}/read", post(conversations::mark_read))
        .route("/unread", get(conversations::unread_counts))
        .route("/users/{user_id}/gate", get(requests::gate_state))
        .route("/requests", get(requests::list_requests))
        .route("/requests/{request_id}/accept", post(requests::accept_request))
        .route("/requests/{request_id}/decline", post(requests::decline_request))
        .route("/blocks", get(requests::list_blocks))
        .route(
            "/blocks/{user_id}",
            put(requests::block_user).delete(requests::unblock_user),
        )
        .route("/groups", post(groups::create_group))
        .route("/groups/{group_id}", get(groups::get_group))
        .route("/groups/{group_id}/members", post(groups::add_member))
        .route(
            "/groups/{group_id}/members/{user_id}",
            axum::routing::delete(groups::remove_member),
        )
        .route("/groups/{group_id}/leave", post(groups::leave_group))
        .route(
            "/groups/{group_id}/admins/{user_id}",
            put(groups::promote).delete(groups::demote),
        )
        .route("/messages/{message_id}/reactions", get(reactions::reaction_stats))
        .layer(layer::from_fn_with_state(state.clone(), middleware::require_auth))
        .with_state(state)
}

/// Run a store-backed chat call off the async workers.
pub(crate) async fn blocking<T, F>(state: &ApiState, f: F) -> Result<T, error::ApiError>
where
    F: FnOnce(&ChatService) -> alumnet_gateway::ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let chat = state.chat.clone();
    tokio::task::spawn_blocking(move || f(&chat))
        .await
        .map_err(|e| alumnet_gateway::ChatError::Store(anyhow::anyhow!("blocking task failed: {}", e)))?
        .map_err(error::ApiError::from)
}
