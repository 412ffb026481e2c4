use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use uuid::Uuid;

use alumnet_types::api::Identity;

use crate::error::ApiError;
use crate::{ApiState, blocking};

/// Per-type counts and reacting users for one message.
pub async fn reaction_stats(
    State(state): State<ApiState>,
    Path(message_id): Path<Uuid>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = blocking(&state, move |chat| chat.reaction_stats(&identity, message_id)).await?;
    Ok(Json(stats))
}
