//! This module defines the [TransportInterface] and the frames it carries.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;

use crate::core::callback::BoxedTransportCallback;
use crate::error::Result;

/// Frames exchanged between two endpoints.
/// A response carries the sequence number of its request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportMessage {
    /// A request with its body.
    Request {
        /// Sequence number, unique per requesting endpoint.
        seq: u64,
        /// Address of the requester.
        from: String,
        /// Opaque request body.
        body: Bytes,
    },
    /// A successful reply.
    Response {
        /// Sequence number of the request.
        seq: u64,
        /// Opaque reply body.
        body: Bytes,
    },
    /// The remote callback failed.
    Failure {
        /// Sequence number of the request.
        seq: u64,
        /// Error reported by the remote.
        reason: String,
    },
}

impl TransportMessage {
    /// Sequence number of the frame.
    pub fn seq(&self) -> u64 {
        match self {
            Self::Request { seq, .. } => *seq,
            Self::Response { seq, .. } => *seq,
            Self::Failure { seq, .. } => *seq,
        }
    }
}

/// Request/response transport between ring members.
/// Delivery is not guaranteed. A request either resolves with the reply body or fails,
/// and never takes longer than its timeout.
#[async_trait]
pub trait TransportInterface: Send + Sync {
    /// Address remote endpoints reach this transport at.
    fn local_addr(&self) -> &str;

    /// Install the handler of incoming requests, replacing the previous one.
    fn set_callback(&self, callback: BoxedTransportCallback) -> Result<()>;

    /// Send `body` to `addr` and wait for the reply.
    async fn request(&self, addr: &str, body: Bytes, timeout: Duration) -> Result<Bytes>;
}
