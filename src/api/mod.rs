//! REST API server for the LED wall
//!
//! Provides HTTP endpoints and a WebSocket for monitoring and remote control.
//! Handlers only read pipeline snapshots and queue commands; they never touch
//! the pipeline directly.

pub mod routes;
pub mod server;
pub mod shared;
pub mod types;
pub mod websocket;

pub use routes::create_router;
pub use server::{create_shared_state, run_server};
pub use shared::{CommandError, SharedState, SharedStateHandle};
pub use types::*;
