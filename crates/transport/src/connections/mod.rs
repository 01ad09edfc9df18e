//! Default using `TcpTransport` for native environment.
//! Also provide a `DummyTransport` for testing.

#[cfg(feature = "dummy")]
mod dummy;
#[cfg(feature = "native")]
mod tcp;

#[cfg(feature = "dummy")]
pub use crate::connections::dummy::DummyEndpoint;
#[cfg(feature = "dummy")]
pub use crate::connections::dummy::DummyTransport;
#[cfg(feature = "native")]
pub use crate::connections::tcp::TcpTransport;
