//! The [TransportCallback] trait serves incoming requests.

use async_trait::async_trait;
use bytes::Bytes;

/// Any error returned by a callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed [TransportCallback] installed on a transport.
pub type BoxedTransportCallback = Box<dyn TransportCallback + Send + Sync>;

/// Serve requests sent by remote endpoints.
#[async_trait]
pub trait TransportCallback {
    /// Handle the request `body` coming from `from`. The returned bytes are sent back
    /// as the reply. An error is reported to the requester as a remote failure.
    async fn on_request(&self, from: &str, body: Bytes) -> Result<Bytes, CallbackError>;
}
