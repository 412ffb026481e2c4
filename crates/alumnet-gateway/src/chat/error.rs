use alumnet_types::events::{BlockReason, ServerEvent};

/// Everything a chat operation can refuse with. None of these are ever
/// broadcast: they go back to the initiating caller only.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Permission(String),

    #[error("{}", blocked_message(.0))]
    Blocked(BlockReason),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error")]
    Store(#[from] anyhow::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;

fn blocked_message(reason: &BlockReason) -> &'static str {
    match reason {
        BlockReason::YouBlocked => "you have blocked this user",
        BlockReason::BlockedByThem => "this user has blocked you",
    }
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn permission(msg: impl Into<String>) -> Self {
        Self::Permission(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::Permission(_) => "permission_denied",
            Self::Blocked(_) => "blocked",
            Self::Conflict(_) => "conflict",
            Self::Store(_) => "internal_error",
        }
    }

    pub fn reason(&self) -> Option<BlockReason> {
        match self {
            Self::Blocked(reason) => Some(*reason),
            _ => None,
        }
    }

    /// The reply frame for the connection that issued the failing action.
    pub fn to_event(&self, request_id: Option<String>, action: Option<&str>) -> ServerEvent {
        ServerEvent::Error {
            request_id,
            action: action.map(str::to_string),
            code: self.code().to_string(),
            message: self.to_string(),
            reason: self.reason(),
        }
    }
}
