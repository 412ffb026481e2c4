use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use alumnet_gateway::ChatError;

/// Error half of every handler. Chat errors keep their machine code; the
/// store's internals are logged and never leave the process.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    Chat(ChatError),
}

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self::Chat(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Chat(e) => match e {
                ChatError::Validation(_) => StatusCode::BAD_REQUEST,
                ChatError::NotFound(_) => StatusCode::NOT_FOUND,
                ChatError::Permission(_) | ChatError::Blocked(_) => StatusCode::FORBIDDEN,
                ChatError::Conflict(_) => StatusCode::CONFLICT,
                ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Unauthorized(msg) => json!({
                "error": { "code": "unauthorized", "message": msg }
            }),
            Self::Chat(e) => {
                if let ChatError::Store(inner) = e {
                    error!("Request failed: {:#}", inner);
                }
                let mut err = json!({ "code": e.code(), "message": e.to_string() });
                if let Some(reason) = e.reason() {
                    err["reason"] = json!(reason);
                }
                json!({ "error": err })
            }
        };
        (status, Json(body)).into_response()
    }
}
