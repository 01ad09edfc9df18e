//! Messages and their handlers.
pub mod types;
pub use types::*;

pub mod handlers;
pub use handlers::HandleRpc;
