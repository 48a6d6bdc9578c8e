//! HTTP error responses.
//!
//! Every failure leaves the API as `{ "code": "...", "message": "..." }`.
//! Admission rule violations keep their message; store failures are reported
//! opaquely and their cause is only logged.

use admission_core::AdmissionError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;

const OPAQUE_MESSAGE: &str = "An internal error occurred";

/// An error on its way to becoming an HTTP response.
///
/// ```
/// use admission_core::AdmissionError;
/// use admission_web::AppError;
/// use axum::http::StatusCode;
///
/// let err = AppError::from(AdmissionError::SpotExpired);
/// assert_eq!(err.status(), StatusCode::BAD_REQUEST);
/// assert_eq!(err.code(), "SPOT_EXPIRED");
/// ```
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Logged for 5xx responses, never sent.
    cause: Option<anyhow::Error>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: &'a str,
}

impl AppError {
    /// Error with an explicit status, code and client-facing message.
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach the underlying cause for logging.
    #[must_use]
    pub fn caused_by(mut self, cause: anyhow::Error) -> Self {
        self.cause = Some(cause);
        self
    }

    /// 404 with code `NOT_FOUND`.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// HTTP status of the response.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status.as_u16(), self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                code = self.code,
                cause = ?self.cause,
                "Request failed"
            );
        }

        let body = ErrorBody {
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<AdmissionError> for AppError {
    fn from(err: AdmissionError) -> Self {
        let status = StatusCode::from_u16(err.http_status_hint())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = err.code();

        if status.is_server_error() {
            Self::new(status, code, OPAQUE_MESSAGE).caused_by(err.into())
        } else {
            Self::new(status, code, err.to_string())
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR", OPAQUE_MESSAGE)
            .caused_by(err)
    }
}
