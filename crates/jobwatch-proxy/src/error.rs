//! Errors surfaced by the image proxy as HTTP status plus `{ "error": ... }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jobwatch_orchestrator::ErrorResponse;

/// Errors that end a proxy request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// The `url` query parameter is absent or empty.
    #[error("Missing or invalid URL parameter")]
    MissingUrl,

    /// The `url` parameter is not a fetchable absolute URL.
    #[error("Invalid URL format provided.")]
    InvalidUrl,

    /// The URL's host is not allow-listed.
    #[error("Proxying from this domain is not allowed.")]
    DomainNotAllowed {
        /// The rejected host, for logs.
        host: String,
    },

    /// The upstream answered with a non-success status.
    #[error("Failed to fetch image: Status {status}")]
    UpstreamStatus {
        /// Upstream status code, mirrored to the client.
        status: u16,
    },

    /// Anything else, including transport failures.
    #[error("Internal Server Error proxying image")]
    Internal {
        /// Underlying cause, for logs only.
        cause: String,
    },
}

impl ProxyError {
    /// Creates an `Internal` error from any displayable cause.
    #[must_use]
    pub fn internal(cause: impl std::fmt::Display) -> Self {
        Self::Internal {
            cause: cause.to_string(),
        }
    }

    /// The HTTP status this error is reported with.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl | Self::InvalidUrl => StatusCode::BAD_REQUEST,
            Self::DomainNotAllowed { .. } => StatusCode::FORBIDDEN,
            Self::UpstreamStatus { status } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status_code(), body).into_response()
    }
}
