//! destination-server: travel destination lookup service
//!
//! Serves destination data from Postgres through the traced query executor
//! in `destination-db`, with routes declared as a path tree by [`router`].

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod models;
pub mod queries;
pub mod router;
pub mod server;
pub mod state;
pub mod tracing_setup;

pub use error::ApiError;
pub use server::{build_app, run_server, ServerConfig, ServerError};
pub use state::AppState;
