//! HTTP request handlers.

pub mod health;
pub mod rsvp;

pub use health::health_check;
