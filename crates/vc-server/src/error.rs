//! Error-to-HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so handlers can return `Result<T, AppError>` and have
/// [`vc_core::Error`] rendered as a JSON body with the mapped status.
#[derive(Debug)]
pub struct AppError(pub vc_core::Error);

impl From<vc_core::Error> for AppError {
    fn from(e: vc_core::Error) -> Self {
        Self(e)
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "server error while serving asset");
        } else {
            tracing::debug!(status = %status, error = %self.0, "request rejected");
        }

        let body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });

        (status, axum::Json(body)).into_response()
    }
}
