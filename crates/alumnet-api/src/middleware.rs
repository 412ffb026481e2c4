use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use tracing::debug;

use crate::error::ApiError;
use crate::{ApiState, blocking};

/// Verify the bearer token, mirror the identity locally and hand it to the
/// handler as an `Identity` extension.
pub async fn require_auth(
    State(state): State<ApiState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) =
        bearer.map_err(|_| ApiError::Unauthorized("missing bearer token".into()))?;

    let identity = state.auth.authenticate(bearer.token()).map_err(|e| {
        debug!("Rejected {} {}: {}", req.method(), req.uri().path(), e);
        ApiError::Unauthorized(e.to_string())
    })?;

    let mirrored = identity.clone();
    blocking(&state, move |chat| chat.register_identity(&mirrored)).await?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
