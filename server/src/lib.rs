//! RSVP admission HTTP server.
//!
//! Reads its [`Config`](config::Config) from the environment and wires the
//! admission service, the selected ledger and the HTTP router together.

pub mod app;
pub mod config;
