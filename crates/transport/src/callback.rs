//! This module contains the [InnerTransportCallback] struct.

use bytes::Bytes;

use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;

/// [InnerTransportCallback] wraps the [BoxedTransportCallback] with the framing shared by
/// every transport implementation.
pub struct InnerTransportCallback {
    /// Address of the endpoint the callback is installed on.
    pub addr: String,
    callback: BoxedTransportCallback,
}

impl InnerTransportCallback {
    /// Create a new [InnerTransportCallback].
    pub fn new(addr: &str, callback: BoxedTransportCallback) -> Self {
        Self {
            addr: addr.to_string(),
            callback,
        }
    }

    /// This method is invoked on a binary frame arrival.
    /// Returns the frame to send back, if any.
    pub async fn on_message(&self, msg: &Bytes) -> Option<TransportMessage> {
        match bincode::deserialize(msg) {
            Ok(m) => self.handle_message(m).await,
            Err(e) => {
                tracing::error!("Deserialize TransportMessage failed: {e:?}");
                None
            }
        }
    }

    /// Serve a decoded frame. Only requests produce a reply.
    pub async fn handle_message(&self, msg: TransportMessage) -> Option<TransportMessage> {
        match msg {
            TransportMessage::Request { seq, from, body } => {
                match self.callback.on_request(&from, body).await {
                    Ok(body) => Some(TransportMessage::Response { seq, body }),
                    Err(e) => {
                        tracing::error!("Callback on_request failed: {e:?}");
                        Some(TransportMessage::Failure {
                            seq,
                            reason: e.to_string(),
                        })
                    }
                }
            }
            m => {
                tracing::warn!("[{}] drop unsolicited frame {}", self.addr, m.seq());
                None
            }
        }
    }
}

/// Turn a reply frame into the result of a request.
pub fn reply_to_result(addr: &str, msg: TransportMessage) -> Result<Bytes> {
    match msg {
        TransportMessage::Response { body, .. } => Ok(body),
        TransportMessage::Failure { reason, .. } => Err(Error::RemoteError(reason)),
        TransportMessage::Request { .. } => Err(Error::UnexpectedMessage(addr.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::core::callback::CallbackError;
    use crate::core::callback::TransportCallback;

    struct Echo;

    #[async_trait]
    impl TransportCallback for Echo {
        async fn on_request(&self, from: &str, body: Bytes) -> std::result::Result<Bytes, CallbackError> {
            if body.is_empty() {
                return Err(format!("empty request from {from}").into());
            }
            Ok(body)
        }
    }

    #[tokio::test]
    async fn test_request_frames_are_served() {
        let cb = InnerTransportCallback::new("a:1", Box::new(Echo));
        let req = TransportMessage::Request {
            seq: 7,
            from: "b:2".to_string(),
            body: Bytes::from_static(b"ping"),
        };
        let data = Bytes::from(bincode::serialize(&req).unwrap());
        let resp = cb.on_message(&data).await.unwrap();
        assert_eq!(resp.seq(), 7);
        assert_eq!(reply_to_result("a:1", resp).unwrap(), Bytes::from_static(b"ping"));

        let req = TransportMessage::Request {
            seq: 8,
            from: "b:2".to_string(),
            body: Bytes::new(),
        };
        let resp = cb.handle_message(req).await.unwrap();
        assert!(matches!(
            reply_to_result("a:1", resp),
            Err(Error::RemoteError(r)) if r.contains("b:2")
        ));
    }

    #[tokio::test]
    async fn test_garbage_and_replies_are_dropped() {
        let cb = InnerTransportCallback::new("a:1", Box::new(Echo));
        assert!(cb.on_message(&Bytes::from_static(&[0xff; 3])).await.is_none());
        let resp = TransportMessage::Response {
            seq: 1,
            body: Bytes::new(),
        };
        assert!(cb.handle_message(resp).await.is_none());
    }
}
