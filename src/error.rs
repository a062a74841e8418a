use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Error taxonomy for the messaging engine and notification stores.
///
/// Delivery problems are deliberately not represented here: a failed or
/// skipped live push after a committed write is logged and swallowed, never
/// surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The actor is not the message sender / not a conversation participant.
    #[error("not authorized")]
    Unauthorized,

    #[error("invalid request: {0}")]
    Invalid(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("database lock poisoned")]
    Lock,

    /// The spawn_blocking task running the store operation panicked.
    #[error("blocking task failed")]
    Join,
}

impl GatewayError {
    /// REST mapping; socket handlers surface the Display form as an
    /// `error` event instead.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::FORBIDDEN,
            GatewayError::Invalid(_) => StatusCode::BAD_REQUEST,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Store(_)
            | GatewayError::Encode(_)
            | GatewayError::Lock
            | GatewayError::Join => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
