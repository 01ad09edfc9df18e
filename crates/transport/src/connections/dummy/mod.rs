use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use lazy_static::lazy_static;
use rand::distributions::Distribution;

use crate::callback::reply_to_result;
use crate::callback::InnerTransportCallback;
use crate::core::callback::BoxedTransportCallback;
use crate::core::transport::TransportInterface;
use crate::core::transport::TransportMessage;
use crate::error::Error;
use crate::error::Result;

/// Max delay in ms on sending message
const DUMMY_DELAY_MAX: u64 = 10;
/// Min delay in ms on sending message
const DUMMY_DELAY_MIN: u64 = 0;
/// Config random delay when send message
const SEND_MESSAGE_DELAY: bool = true;

lazy_static! {
    static ref ENDPOINTS: DashMap<String, Arc<DummyEndpoint>> = DashMap::new();
}

/// The receiving side of a [DummyTransport], registered process-wide by address.
pub struct DummyEndpoint {
    callback: RwLock<Option<Arc<InnerTransportCallback>>>,
    online: AtomicBool,
}

impl DummyEndpoint {
    fn new() -> Self {
        Self {
            callback: RwLock::new(None),
            online: AtomicBool::new(true),
        }
    }

    fn callback(&self, addr: &str) -> Result<Arc<InnerTransportCallback>> {
        self.callback
            .read()
            .ok()
            .and_then(|cb| cb.clone())
            .ok_or_else(|| Error::CallbackMissing(addr.to_string()))
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

/// An in-process transport for local testing, with no real network.
/// Every call is delayed randomly. An endpoint set offline neither sends nor serves.
pub struct DummyTransport {
    addr: String,
    endpoint: Arc<DummyEndpoint>,
    seq: AtomicU64,
}

impl DummyTransport {
    /// Register a new endpoint at `addr`.
    pub fn new(addr: &str) -> Result<Self> {
        let endpoint = Arc::new(DummyEndpoint::new());
        match ENDPOINTS.entry(addr.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(Error::EndpointAlreadyExists(addr.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(endpoint.clone());
            }
        }
        Ok(Self {
            addr: addr.to_string(),
            endpoint,
            seq: AtomicU64::new(0),
        })
    }

    /// Take the endpoint offline, or bring it back.
    pub fn set_online(&self, online: bool) {
        self.endpoint.online.store(online, Ordering::SeqCst);
    }

    /// Same as [DummyTransport::set_online], by address.
    pub fn set_online_by_addr(addr: &str, online: bool) -> Result<()> {
        let ep = ENDPOINTS
            .get(addr)
            .ok_or_else(|| Error::EndpointNotFound(addr.to_string()))?;
        ep.online.store(online, Ordering::SeqCst);
        Ok(())
    }

    async fn deliver(&self, addr: &str, body: Bytes) -> Result<Bytes> {
        if SEND_MESSAGE_DELAY {
            random_delay().await;
        }
        let remote = ENDPOINTS
            .get(addr)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::EndpointNotFound(addr.to_string()))?;
        if !remote.is_online() {
            return Err(Error::EndpointOffline(addr.to_string()));
        }
        let req = TransportMessage::Request {
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            from: self.addr.clone(),
            body,
        };
        let data = bincode::serialize(&req).map(Bytes::from)?;
        let resp = remote
            .callback(addr)?
            .on_message(&data)
            .await
            .ok_or_else(|| Error::ConnectionClosed(addr.to_string()))?;
        if SEND_MESSAGE_DELAY {
            random_delay().await;
        }
        // the remote may go offline while serving
        if !remote.is_online() || !self.endpoint.is_online() {
            return Err(Error::EndpointOffline(addr.to_string()));
        }
        reply_to_result(addr, resp)
    }
}

impl Drop for DummyTransport {
    fn drop(&mut self) {
        ENDPOINTS.remove_if(&self.addr, |_, ep| Arc::ptr_eq(ep, &self.endpoint));
    }
}

#[async_trait]
impl TransportInterface for DummyTransport {
    fn local_addr(&self) -> &str {
        &self.addr
    }

    fn set_callback(&self, callback: BoxedTransportCallback) -> Result<()> {
        let mut cb = self
            .endpoint
            .callback
            .write()
            .map_err(|_| Error::CallbackMissing(self.addr.clone()))?;
        *cb = Some(Arc::new(InnerTransportCallback::new(&self.addr, callback)));
        Ok(())
    }

    async fn request(&self, addr: &str, body: Bytes, timeout: Duration) -> Result<Bytes> {
        if !self.endpoint.is_online() {
            return Err(Error::EndpointOffline(self.addr.clone()));
        }
        tokio::time::timeout(timeout, self.deliver(addr, body))
            .await
            .map_err(|_| Error::Timeout(addr.to_string()))?
    }
}

async fn random_delay() {
    tokio::time::sleep(Duration::from_millis(random(
        DUMMY_DELAY_MIN,
        DUMMY_DELAY_MAX,
    )))
    .await;
}

fn random(low: u64, high: u64) -> u64 {
    let range = rand::distributions::Uniform::new(low, high);
    let mut rng = rand::thread_rng();
    range.sample(&mut rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callback::CallbackError;
    use crate::core::callback::TransportCallback;

    struct Greeter(String);

    #[async_trait]
    impl TransportCallback for Greeter {
        async fn on_request(&self, from: &str, body: Bytes) -> std::result::Result<Bytes, CallbackError> {
            let s = format!("{} -> {}: {}", from, self.0, String::from_utf8_lossy(&body));
            Ok(Bytes::from(s))
        }
    }

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_request_and_reply() -> Result<()> {
        let a = DummyTransport::new("dummy-test-a:1")?;
        let b = DummyTransport::new("dummy-test-b:1")?;
        b.set_callback(Box::new(Greeter("b".to_string())))?;
        let resp = a.request(b.local_addr(), Bytes::from_static(b"hi"), T).await?;
        assert_eq!(resp, Bytes::from("dummy-test-a:1 -> b: hi"));
        Ok(())
    }

    #[tokio::test]
    async fn test_duplicated_address() -> Result<()> {
        let _a = DummyTransport::new("dummy-test-dup:1")?;
        assert!(matches!(
            DummyTransport::new("dummy-test-dup:1"),
            Err(Error::EndpointAlreadyExists(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_offline_and_dropped_endpoints() -> Result<()> {
        let a = DummyTransport::new("dummy-test-c:1")?;
        let b = DummyTransport::new("dummy-test-d:1")?;
        b.set_callback(Box::new(Greeter("d".to_string())))?;

        b.set_online(false);
        assert!(matches!(
            a.request("dummy-test-d:1", Bytes::new(), T).await,
            Err(Error::EndpointOffline(_))
        ));
        DummyTransport::set_online_by_addr("dummy-test-d:1", true)?;
        assert!(a.request("dummy-test-d:1", Bytes::new(), T).await.is_ok());

        drop(b);
        assert!(matches!(
            a.request("dummy-test-d:1", Bytes::new(), T).await,
            Err(Error::EndpointNotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_callback() -> Result<()> {
        let a = DummyTransport::new("dummy-test-e:1")?;
        let _b = DummyTransport::new("dummy-test-f:1")?;
        assert!(matches!(
            a.request("dummy-test-f:1", Bytes::new(), T).await,
            Err(Error::CallbackMissing(_))
        ));
        Ok(())
    }
}
