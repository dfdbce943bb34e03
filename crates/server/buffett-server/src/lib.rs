//! Buffett analyzer HTTP server: Google sign-in and the subscription paywall.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use routes::{SESSION_COOKIE, app};
pub use state::AppState;
