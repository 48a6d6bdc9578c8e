//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request's correlation ID
//! - `Caller`: the authenticated caller, resolved from a bearer token
//!
//! # Examples
//!
//! ```ignore
//! use admission_web::extractors::{Caller, CorrelationId};
//!
//! async fn handler(
//!     correlation_id: CorrelationId,
//!     Caller(caller): Caller,
//! ) -> String {
//!     format!("{} via {}", caller.user_id(), correlation_id.0)
//! }
//! ```

use crate::error::AppError;
use crate::middleware::correlation_id_from;
use crate::state::AppState;
use admission_core::AdmissionError;
use admission_core::claims::CallerIdentity;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
};
use uuid::Uuid;

/// Correlation ID for request tracing.
///
/// Prefers the ID stored by the correlation middleware, then the
/// `X-Correlation-ID` header, and otherwise generates a new UUID v4.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        Ok(Self(correlation_id_from(&parts.headers)))
    }
}

/// The authenticated caller.
///
/// Reads `Authorization: Bearer <token>` and resolves it through the
/// state's [`IdentityProvider`](admission_core::claims::IdentityProvider).
/// Missing, unknown, and revoked tokens are rejected with `401` before the
/// handler runs.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerIdentity);

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token =
            bearer_token(&parts.headers).ok_or(AppError::from(AdmissionError::Unauthenticated))?;

        let state = AppState::from_ref(state);
        match state.identity.authenticate(token).await {
            Ok(Some(caller)) => {
                tracing::Span::current().record("user_id", caller.user_id().as_str());
                Ok(Self(caller))
            },
            Ok(None) => {
                tracing::debug!("Rejected unknown or revoked bearer token");
                Err(AdmissionError::Unauthenticated.into())
            },
            Err(e) => Err(AdmissionError::from(e).into()),
        }
    }
}

/// Token from an `Authorization: Bearer` header, if well-formed.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
