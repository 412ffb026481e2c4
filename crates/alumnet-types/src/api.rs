use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// Claims of the bearer token issued by the external auth service. Shared by
/// the REST middleware and the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    pub exp: usize,
}

/// A verified user identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: Uuid, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            user_id,
            display_name: username.clone(),
            username,
        }
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self {
        let display_name = claims.name.unwrap_or_else(|| claims.username.clone());
        Self {
            user_id: claims.sub,
            username: claims.username,
            display_name,
        }
    }
}

// -- Messages --

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: id of the oldest message of the previous page.
    pub before: Option<Uuid>,
}

fn default_limit() -> u32 {
    50
}

// -- Groups --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
}

// -- Responses --

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadResponse {
    pub marked: u64,
}
