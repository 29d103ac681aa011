//! Rollcall Server - Axum-based HTTP API
//!
//! Serves kiosks (state polling and QR rendering), admins (pairing),
//! teachers (sessions and attendee lists) and students (check-in).

pub mod error;
pub mod http;
pub mod rate_limit;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use http::create_router;
pub use state::AppState;
