use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};

use alumnet_gateway::ChatError;
use alumnet_types::api::{Identity, MessageQuery, ReadResponse};
use alumnet_types::ids::{ConversationKey, Target};

use crate::error::ApiError;
use crate::{ApiState, blocking};

fn parse_key(raw: &str) -> Result<ConversationKey, ApiError> {
    raw.parse::<ConversationKey>()
        .map_err(|e| ChatError::validation(e.to_string()).into())
}

pub async fn list_conversations(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let conversations = blocking(&state, move |chat| chat.list_conversations(&identity)).await?;
    Ok(Json(conversations))
}

/// Latest page when no cursor is given; `before` walks back through older
/// history.
pub async fn get_messages(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Query(query): Query<MessageQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let messages = blocking(&state, move |chat| {
        chat.list_messages(&identity, key, query.before, query.limit)
    })
    .await?;
    Ok(Json(messages))
}

pub async fn get_pinned(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let key = parse_key(&key)?;
    let pinned = blocking(&state, move |chat| chat.pinned_messages(&identity, key)).await?;
    Ok(Json(pinned))
}

pub async fn mark_read(
    State(state): State<ApiState>,
    Path(key): Path<String>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let target = match parse_key(&key)? {
        ConversationKey::Group(group_id) => Target::Group(group_id),
        direct => direct
            .partner_of(identity.user_id)
            .map(Target::Direct)
            .ok_or_else(|| ChatError::permission("not a participant of this conversation"))?,
    };
    let marked = blocking(&state, move |chat| chat.mark_conversation_read(&identity, target)).await?;
    Ok(Json(ReadResponse { marked }))
}

pub async fn unread_counts(
    State(state): State<ApiState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let counts = blocking(&state, move |chat| chat.unread_counts(&identity)).await?;
    Ok(Json(counts))
}
