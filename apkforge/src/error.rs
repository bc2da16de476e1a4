//! Request failures and their HTTP mapping

use crate::runner::RunError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("upload exceeds the limit of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("bundletool error: {0}")]
    Command(#[from] RunError),

    #[error("bundletool reported success but did not produce {}", .path.display())]
    ToolOutputMissing { path: PathBuf },

    #[error("generated .apks archive is unreadable: {0}")]
    CorruptArchive(#[from] zip::result::ZipError),

    #[error("no APK found inside the generated .apks archive")]
    ArtifactNotFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConvertError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ConvertError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ConvertError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ConvertError::Command(RunError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ConvertError::Command(_)
            | ConvertError::ToolOutputMissing { .. }
            | ConvertError::CorruptArchive(_)
            | ConvertError::ArtifactNotFound
            | ConvertError::Io(_)
            | ConvertError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name used in error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvertError::InvalidInput(_) => "invalid_input",
            ConvertError::PayloadTooLarge { .. } => "payload_too_large",
            ConvertError::Command(RunError::Timeout { .. }) => "tool_timeout",
            ConvertError::Command(_) => "tool_failed",
            ConvertError::ToolOutputMissing { .. } => "tool_output_missing",
            ConvertError::CorruptArchive(_) => "corrupt_archive",
            ConvertError::ArtifactNotFound => "artifact_not_found",
            ConvertError::Io(_) => "io_error",
            ConvertError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl IntoResponse for ConvertError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: self.kind(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
