//! Axum HTTP surface for RSVP admission control.
//!
//! The handlers are a thin imperative shell: they resolve the caller from a
//! bearer token, call [`AdmissionService`](admission_runtime::AdmissionService),
//! and map the result or [`AdmissionError`](admission_core::AdmissionError)
//! onto JSON and a status code.
//!
//! # Request Flow
//!
//! 1. `correlate` middleware assigns the correlation ID and request span
//! 2. [`Caller`] resolves `Authorization: Bearer` or rejects with `401`
//! 3. The handler calls the service
//! 4. Results become `200` JSON; errors become `{ code, message }` with
//!    `400`, `401`, or `500`
//!
//! # Example
//!
//! ```no_run
//! use admission_runtime::{AdmissionEnvironment, AdmissionService, ConsoleNotificationDispatcher};
//! use admission_runtime::{InMemoryClaimsStore, InMemoryLedger};
//! use admission_web::{AppState, router};
//! use std::sync::Arc;
//!
//! # async fn example() -> std::io::Result<()> {
//! let claims = InMemoryClaimsStore::new();
//! let service = AdmissionService::new(AdmissionEnvironment::new(
//!     Arc::new(InMemoryLedger::new()),
//!     Arc::new(claims.clone()),
//!     Arc::new(ConsoleNotificationDispatcher),
//! ));
//!
//! let app = router(AppState::new(service, Arc::new(claims)));
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, app).await
//! # }
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{Caller, CorrelationId};
pub use middleware::{CORRELATION_ID_HEADER, correlate};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
