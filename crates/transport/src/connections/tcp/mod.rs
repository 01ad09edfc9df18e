use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tokio_util::sync::CancellationToken;

use crate::callback::reply_to_result;
use crate::callback::InnerTransportCallback;
use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;

type SharedCallback = Arc<RwLock<Option<Arc<InnerTransportCallback>>>>;
type Pending = Arc<DashMap<u64, oneshot::Sender<TransportMessage>>>;

/// One framed stream. Requests are multiplexed on it by sequence number.
struct TcpConnection {
    tx: mpsc::UnboundedSender<TransportMessage>,
    pending: Pending,
    closed: Arc<AtomicBool>,
}

impl TcpConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Spawn the reader and writer of `stream`.
    /// Requests read from the stream are served by `callback`, replies wake `pending`.
    fn spawn(
        stream: TcpStream,
        peer: String,
        callback: SharedCallback,
        shutdown: CancellationToken,
    ) -> Self {
        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (mut sink, mut frames) = framed.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<TransportMessage>();
        let pending: Pending = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));

        let w_closed = closed.clone();
        let w_shutdown = shutdown.clone();
        let w_peer = peer.clone();
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = w_shutdown.cancelled() => break,
                    m = rx.recv() => match m {
                        Some(m) => m,
                        None => break,
                    },
                };
                let data = match bincode::serialize(&msg) {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::error!("[tcp] failed to encode frame for {}: {:?}", w_peer, e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Bytes::from(data)).await {
                    tracing::debug!("[tcp] write to {} failed: {:?}", w_peer, e);
                    break;
                }
            }
            w_closed.store(true, Ordering::SeqCst);
        });

        let r_pending = pending.clone();
        let r_closed = closed.clone();
        let r_tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    f = frames.next() => f,
                };
                let frame = match frame {
                    Some(Ok(f)) => f.freeze(),
                    Some(Err(e)) => {
                        tracing::debug!("[tcp] read from {} failed: {:?}", peer, e);
                        break;
                    }
                    None => break,
                };
                let msg: TransportMessage = match bincode::deserialize(&frame) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::error!("[tcp] bad frame from {}: {:?}", peer, e);
                        continue;
                    }
                };
                match msg {
                    TransportMessage::Request { seq, .. } => {
                        let cb = callback.read().ok().and_then(|c| c.clone());
                        let tx = r_tx.clone();
                        tokio::spawn(async move {
                            let reply = match cb {
                                Some(cb) => cb.handle_message(msg).await,
                                None => Some(TransportMessage::Failure {
                                    seq,
                                    reason: "no callback installed".to_string(),
                                }),
                            };
                            if let Some(reply) = reply {
                                let _ = tx.send(reply);
                            }
                        });
                    }
                    reply => {
                        if let Some((_, waiter)) = r_pending.remove(&reply.seq()) {
                            let _ = waiter.send(reply);
                        }
                    }
                }
            }
            r_closed.store(true, Ordering::SeqCst);
            // wakes every waiter with a closed channel
            r_pending.clear();
        });

        Self {
            tx,
            pending,
            closed,
        }
    }
}

/// A tokio TCP transport. Frames are length delimited and bincode encoded.
pub struct TcpTransport {
    addr: String,
    callback: SharedCallback,
    conns: DashMap<String, Arc<TcpConnection>>,
    seq: AtomicU64,
    shutdown: CancellationToken,
}

impl TcpTransport {
    /// Listen on `bind_addr`. Remote endpoints reach us at `external_addr`, or at the
    /// bound address when none is given.
    pub async fn bind(bind_addr: &str, external_addr: Option<String>) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(bind_addr).await?;
        let addr = match external_addr {
            Some(a) => a,
            None => listener.local_addr()?.to_string(),
        };
        let this = Arc::new(Self {
            addr,
            callback: Arc::new(RwLock::new(None)),
            conns: DashMap::new(),
            seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        });

        let callback = this.callback.clone();
        let shutdown = this.shutdown.clone();
        tracing::info!("[tcp] listening on {}", bind_addr);
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    a = listener.accept() => a,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!("[tcp] inbound connection from {}", peer);
                        // the inbound side only serves requests, nothing is pooled
                        TcpConnection::spawn(
                            stream,
                            peer.to_string(),
                            callback.clone(),
                            shutdown.clone(),
                        );
                    }
                    Err(e) => {
                        tracing::warn!("[tcp] accept failed: {:?}", e);
                    }
                }
            }
            tracing::debug!("[tcp] listener exits");
        });
        Ok(this)
    }

    /// Stop listening and close every stream.
    pub fn close(&self) {
        self.shutdown.cancel();
        self.conns.clear();
    }

    async fn connection(&self, addr: &str) -> Result<Arc<TcpConnection>> {
        if let Some(c) = self.conns.get(addr) {
            if !c.is_closed() {
                return Ok(c.clone());
            }
        }
        let stream = TcpStream::connect(addr).await?;
        let conn = Arc::new(TcpConnection::spawn(
            stream,
            addr.to_string(),
            self.callback.clone(),
            self.shutdown.clone(),
        ));
        self.conns.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl TransportInterface for TcpTransport {
    fn local_addr(&self) -> &str {
        &self.addr
    }

    fn set_callback(&self, callback: BoxedTransportCallback) -> Result<()> {
        let mut cb = self
            .callback
            .write()
            .map_err(|_| Error::CallbackMissing(self.addr.clone()))?;
        *cb = Some(Arc::new(InnerTransportCallback::new(&self.addr, callback)));
        Ok(())
    }

    async fn request(&self, addr: &str, body: Bytes, timeout: Duration) -> Result<Bytes> {
        let deadline = tokio::time::Instant::now() + timeout;
        let conn = tokio::time::timeout_at(deadline, self.connection(addr))
            .await
            .map_err(|_| Error::Timeout(addr.to_string()))??;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        conn.pending.insert(seq, tx);
        let req = TransportMessage::Request {
            seq,
            from: self.addr.clone(),
            body,
        };
        if conn.tx.send(req).is_err() {
            conn.pending.remove(&seq);
            self.conns.remove(addr);
            return Err(Error::ConnectionClosed(addr.to_string()));
        }

        let reply = tokio::time::timeout_at(deadline, rx).await;
        conn.pending.remove(&seq);
        match reply {
            Err(_) => Err(Error::Timeout(addr.to_string())),
            Ok(Err(_)) => {
                self.conns.remove(addr);
                Err(Error::ConnectionClosed(addr.to_string()))
            }
            Ok(Ok(msg)) => reply_to_result(addr, msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callback::CallbackError;
    use crate::core::callback::TransportCallback;

    struct Upper;

    #[async_trait]
    impl TransportCallback for Upper {
        async fn on_request(&self, _from: &str, body: Bytes) -> std::result::Result<Bytes, CallbackError> {
            if body.as_ref() == b"slow" {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(Bytes::from(String::from_utf8_lossy(&body).to_uppercase()))
        }
    }

    #[tokio::test]
    async fn test_tcp_request_reply() -> Result<()> {
        let a = TcpTransport::bind("127.0.0.1:0", None).await?;
        let b = TcpTransport::bind("127.0.0.1:0", None).await?;
        b.set_callback(Box::new(Upper))?;

        let t = Duration::from_secs(2);
        let (r1, r2) = futures::join!(
            a.request(b.local_addr(), Bytes::from_static(b"ping"), t),
            a.request(b.local_addr(), Bytes::from_static(b"pong"), t),
        );
        assert_eq!(r1?, Bytes::from_static(b"PING"));
        assert_eq!(r2?, Bytes::from_static(b"PONG"));
        Ok(())
    }

    #[tokio::test]
    async fn test_tcp_timeout() -> Result<()> {
        let a = TcpTransport::bind("127.0.0.1:0", None).await?;
        let b = TcpTransport::bind("127.0.0.1:0", None).await?;
        b.set_callback(Box::new(Upper))?;
        let r = a
            .request(b.local_addr(), Bytes::from_static(b"slow"), Duration::from_millis(50))
            .await;
        assert!(matches!(r, Err(Error::Timeout(_))));
        // the stream is still usable
        let r = a
            .request(b.local_addr(), Bytes::from_static(b"ok"), Duration::from_secs(2))
            .await?;
        assert_eq!(r, Bytes::from_static(b"OK"));
        Ok(())
    }

    #[tokio::test]
    async fn test_tcp_no_callback() -> Result<()> {
        let a = TcpTransport::bind("127.0.0.1:0", None).await?;
        let b = TcpTransport::bind("127.0.0.1:0", None).await?;
        let r = a
            .request(b.local_addr(), Bytes::from_static(b"x"), Duration::from_secs(2))
            .await;
        assert!(matches!(r, Err(Error::RemoteError(_))));
        Ok(())
    }
}
