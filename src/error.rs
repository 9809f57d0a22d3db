use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::{packager::PackagingError, zoo::ZooError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("model catalog error: {0}")]
    Catalog(#[from] ZooError),
    #[error("packaging failed: {0}")]
    Packaging(#[from] PackagingError),
    #[error("generation task failed: {0}")]
    Task(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::UnknownModel(_) | ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Catalog(_)
            | ServiceError::Packaging(_)
            | ServiceError::Task(_)
            | ServiceError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            ServiceError::UnknownModel("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::from(ZooError::Backend("down".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
