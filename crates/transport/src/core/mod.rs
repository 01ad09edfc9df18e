//! The main concepts of this mod are:
//!
//! The [TransportInterface](transport::TransportInterface) trait sends a request body to
//! a remote address and resolves with the reply body. See the [transport] module.
//!
//! The [TransportCallback](callback::TransportCallback) trait is used to let user serve
//! the requests coming from remote endpoints. See the [callback] module.

pub mod callback;
pub mod transport;
