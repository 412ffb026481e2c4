use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use uuid::Uuid;

use alumnet_types::api::{AddMemberRequest, CreateGroupRequest, Identity};

use crate::error::ApiError;
use crate::{ApiState, blocking};

pub async fn create_group(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = blocking(&state, move |chat| {
        chat.create_group(&identity, &req.name, req.picture.as_deref(), &req.member_ids)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn get_group(
    State(state): State<ApiState>,
    Path(group_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let group = blocking(&state, move |chat| chat.group_snapshot(&identity, group_id)).await?;
    Ok(Json(group))
}

pub async fn add_member(
    State(state): State<ApiState>,
    Path(group_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let group = blocking(&state, move |chat| {
        chat.add_member(&identity, group_id, req.user_id)
    })
    .await?;
    Ok(Json(group))
}

pub async fn remove_member(
    State(state): State<ApiState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |chat| chat.remove_member(&identity, group_id, user_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn leave_group(
    State(state): State<ApiState>,
    Path(group_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = blocking(&state, move |chat| chat.leave_group(&identity, group_id)).await?;
    Ok(Json(outcome))
}

pub async fn promote(
    State(state): State<ApiState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    set_admin(state, identity, group_id, user_id, true).await
}

pub async fn demote(
    State(state): State<ApiState>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    set_admin(state, identity, group_id, user_id, false).await
}

async fn set_admin(
    state: ApiState,
    identity: Identity,
    group_id: Uuid,
    user_id: Uuid,
    is_admin: bool,
) -> Result<Json<serde_json::Value>, ApiError> {
    let changed = blocking(&state, move |chat| {
        chat.set_admin(&identity, group_id, user_id, is_admin)
    })
    .await?;
    Ok(Json(json!({ "user_id": user_id, "is_admin": is_admin, "changed": changed })))
}
