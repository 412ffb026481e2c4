//! Message requests and blocks: the state behind the conversation gate.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use alumnet_types::api::Identity;

use crate::error::ApiError;
use crate::{ApiState, blocking};

/// Gate state between the caller and another user.
pub async fn gate_state(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let me = identity.user_id;
    let gate = blocking(&state, move |chat| chat.conversation_state(me, user_id)).await?;
    Ok(Json(json!({ "user_id": user_id, "state": gate })))
}

pub async fn list_requests(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let pending = blocking(&state, move |chat| chat.pending_requests(&identity)).await?;
    Ok(Json(pending))
}

/// Returns the materialized first message.
pub async fn accept_request(
    State(state): State<ApiState>,
    Path(request_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let message = blocking(&state, move |chat| chat.accept_request(&identity, request_id)).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn decline_request(
    State(state): State<ApiState>,
    Path(request_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let request = blocking(&state, move |chat| chat.decline_request(&identity, request_id)).await?;
    Ok(Json(request))
}

pub async fn list_blocks(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let blocked = blocking(&state, move |chat| chat.blocked_users(&identity)).await?;
    Ok(Json(blocked))
}

pub async fn block_user(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let created = blocking(&state, move |chat| chat.block_user(&identity, user_id)).await?;
    Ok(Json(json!({ "blocked": true, "changed": created })))
}

pub async fn unblock_user(
    State(state): State<ApiState>,
    Path(user_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = blocking(&state, move |chat| chat.unblock_user(&identity, user_id)).await?;
    Ok(Json(json!({ "blocked": false, "changed": removed })))
}
