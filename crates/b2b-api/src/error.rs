use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{error, warn};

use b2b_types::api::ErrorBody;

/// Failures of a messaging operation, scoped to the single request that
/// triggered them. Retrying is up to the caller.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Conflict(String),

    /// An attachment could not be stored; no message was written.
    #[error("attachment upload failed: {0}")]
    Upload(anyhow::Error),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl MessagingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upload(_) => StatusCode::BAD_GATEWAY,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for MessagingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Storage(e) => {
                error!("Storage error: {:#}", e);
                "internal server error".to_string()
            }
            Self::Upload(e) => {
                warn!("Attachment upload failed: {:#}", e);
                "attachment upload failed".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(MessagingError::NotFound("conversation").status(), StatusCode::NOT_FOUND);
        assert_eq!(MessagingError::validation("empty").status(), StatusCode::BAD_REQUEST);
        assert_eq!(MessagingError::Forbidden("not yours").status(), StatusCode::FORBIDDEN);
        assert_eq!(MessagingError::Conflict("taken".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            MessagingError::Upload(anyhow::anyhow!("disk full")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            MessagingError::from(anyhow::anyhow!("db gone")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(MessagingError::NotFound("conversation").to_string(), "conversation not found");
    }
}
