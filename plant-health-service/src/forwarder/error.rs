use axum::http::StatusCode;
use std::time::Duration;
use thiserror::Error;

use crate::services::{UpstreamError, UpstreamReply};

/// Everything that can end a forward invocation early.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("No image data provided")]
    MissingImages,

    #[error("Missing required field(s): {}", .0.join(", "))]
    MissingCoordinates(Vec<&'static str>),

    #[error("API key not configured")]
    MissingApiKey,

    #[error("Error from Plant.id API")]
    Upstream(UpstreamReply),

    #[error("Plant.id request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Error processing request: {0}")]
    Unexpected(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::MissingImages | ForwardError::MissingCoordinates(_) => {
                StatusCode::BAD_REQUEST
            }
            ForwardError::MissingApiKey | ForwardError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ForwardError::Upstream(reply) => {
                StatusCode::from_u16(reply.status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Metric label for the outcome.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::MissingImages | ForwardError::MissingCoordinates(_) => "validation",
            ForwardError::MissingApiKey => "configuration",
            ForwardError::Upstream(_) => "upstream",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<serde_json::Error> for ForwardError {
    fn from(err: serde_json::Error) -> Self {
        ForwardError::Unexpected(err.to_string())
    }
}

impl From<UpstreamError> for ForwardError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Timeout(after) => ForwardError::Timeout(after),
            UpstreamError::Transport(msg) => ForwardError::Unexpected(msg),
        }
    }
}
