//! # Admission Runtime
//!
//! The imperative shell for RSVP waitlist admission control.
//!
//! This crate provides:
//! - [`AdmissionService`]: runs the admission reducer inside optimistic
//!   ledger transactions and executes the resulting effects
//! - [`ReclaimSweeper`]: periodic reclaim of expired reservations
//! - In-memory ledger and claims store for development and tests
//! - A console notification dispatcher
//! - Retry with exponential backoff and Prometheus metrics
//!
//! ## Example
//!
//! ```
//! use admission_core::claims::{CallerIdentity, UserProfile};
//! use admission_core::types::UserId;
//! use admission_runtime::{
//!     AdmissionEnvironment, AdmissionService, ConsoleNotificationDispatcher, InMemoryClaimsStore,
//!     InMemoryLedger, JoinOutcome,
//! };
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let claims = InMemoryClaimsStore::new();
//! let profile = UserProfile {
//!     user_id: UserId::new("ada"),
//!     name: "Ada".to_string(),
//!     email: "ada@example.com".to_string(),
//! };
//! claims.register(profile.clone())?;
//!
//! let service = AdmissionService::new(AdmissionEnvironment::new(
//!     Arc::new(InMemoryLedger::new()),
//!     Arc::new(claims),
//!     Arc::new(ConsoleNotificationDispatcher::new()),
//! ));
//! service.seed_capacity(1).await?;
//!
//! let outcome = service.join_waitlist(&CallerIdentity::new(profile)).await?;
//! assert!(matches!(outcome, JoinOutcome::Reserved { .. }));
//! # Ok(())
//! # }
//! ```

pub mod console;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod sweeper;

pub use console::ConsoleNotificationDispatcher;
pub use memory::{IdentitySeed, InMemoryClaimsStore, InMemoryLedger};
pub use retry::RetryPolicy;
pub use service::{
    AdmissionEnvironment, AdmissionService, JoinOutcome, ReclaimReport, ReleaseReport,
    VerifyOutcome, WithdrawOutcome,
};
pub use sweeper::{ReclaimSweeper, SweepConfig};
