//! Correlation ID middleware.
//!
//! 1. Read `X-Correlation-ID` from the request, or generate a UUID v4
//! 2. Store it in request extensions for the `CorrelationId` extractor
//! 3. Run the request inside an `http_request` span carrying the ID
//! 4. Echo the ID in the response `X-Correlation-ID` header
//!
//! ```ignore
//! use admission_web::middleware::correlate;
//!
//! let app = Router::new()
//!     .route("/api/rsvp/status", get(rsvp::status))
//!     .layer(axum::middleware::from_fn(correlate));
//! ```

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

/// Request and response header carrying the correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID carried by `headers`, or a fresh one.
#[must_use]
pub fn correlation_id_from(headers: &HeaderMap) -> Uuid {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Tag the request and its response with a correlation ID.
///
/// The request runs inside an `http_request` span. Its `user_id` field starts
/// empty and is filled in once the `Caller` extractor authenticates.
///
/// Install with `axum::middleware::from_fn(correlate)`.
pub async fn correlate(mut req: Request, next: Next) -> Response {
    let correlation_id = correlation_id_from(req.headers());
    req.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
        user_id = tracing::field::Empty,
    );

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}
