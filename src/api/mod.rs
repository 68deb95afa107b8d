//! calcframe API server module
//!
//! Provides an HTTP REST API over the formula engine.
//! Run with `calcframe-server`.

pub mod handlers;
pub mod server;

pub use server::{router, run_api_server, ApiConfig, AppState};
