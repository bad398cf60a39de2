//! HTTP surface for the mnemograph memory engine
//!
//! A thin axum layer over `mnemograph-core`: routing, user-id
//! extraction, error-to-status mapping, and boot. No engine logic lives
//! here.

pub mod error;
pub mod extract;
pub mod handlers;
pub mod routes;
pub mod state;

pub use routes::router;
pub use state::AppState;
