#![warn(missing_docs)]
//! Lookup protocols.
//!
//! A [RouteIterator] walks the ring toward a key and resolves with a [RouteResult].
//! Three are provided:
//! - [IterativeRoute]: the origin contacts every hop itself;
//! - [RecursiveRoute]: every hop forwards the query, the last one answers the origin;
//! - [AccordionRoute]: recursive, but a hop may forward to several next hops in
//!   parallel within a bandwidth budget.
//!
//! Lookups resolve with a [RouteStatus] rather than an error once the routing layer
//! exhausted its own retries. Dropping a lookup future cancels it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::RouteCompleteSend;

pub mod accordion;
pub mod chord;
pub mod recursive;

pub use accordion::AccordionRoute;
pub use accordion::AccordionState;
pub use chord::IterativeRoute;
pub use recursive::RecursiveRoute;

/// Outcome of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    /// The successors of the key were found.
    Ok,
    /// Hops kept failing until the retry budget ran out.
    RpcFailure,
    /// The ring had no node to ask.
    NoSuchEntry,
}

/// Result of a lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResult {
    /// The key.
    pub key: Did,
    /// Successors of the key, the owner first. Empty unless the status is `Ok`.
    pub successors: Vec<NodeInfo>,
    /// Nodes visited.
    pub path: Vec<NodeInfo>,
    /// Outcome.
    pub status: RouteStatus,
    /// Hops retried.
    pub retries: u32,
}

impl RouteResult {
    /// A finished lookup.
    pub fn ok(key: Did, successors: Vec<NodeInfo>, path: Vec<NodeInfo>, retries: u32) -> Self {
        Self {
            key,
            successors,
            path,
            status: RouteStatus::Ok,
            retries,
        }
    }

    /// A failed lookup.
    pub fn failed(key: Did, status: RouteStatus, path: Vec<NodeInfo>, retries: u32) -> Self {
        Self {
            key,
            successors: vec![],
            path,
            status,
            retries,
        }
    }

    /// The owner of the key.
    pub fn successor(&self) -> Option<&NodeInfo> {
        self.successors.first()
    }

    /// Whether the lookup succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == RouteStatus::Ok
    }

    /// Number of hops.
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// One lookup protocol.
#[async_trait]
pub trait RouteIterator: Send + Sync {
    /// Find the successors of `x`, starting at `guess` when given.
    async fn route(&self, x: Did, guess: Option<NodeInfo>) -> Result<RouteResult>;
}

struct PendingRoute {
    key: Did,
    started: Instant,
    tx: oneshot::Sender<RouteCompleteSend>,
}

/// Lookups started here and answered by a remote hop, keyed by route id.
#[derive(Default)]
pub struct PendingRoutes {
    inner: Mutex<HashMap<u64, PendingRoute>>,
}

impl PendingRoutes {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<HashMap<u64, PendingRoute>>> {
        self.inner.lock().map_err(|_| Error::RoutingLockError)
    }

    /// Allocate a route id for a lookup of `key`. The receiver yields the answer.
    pub fn register(&self, key: Did) -> Result<(u64, oneshot::Receiver<RouteCompleteSend>)> {
        let mut inner = self.lock()?;
        let mut route_id: u64 = rand::random();
        while inner.contains_key(&route_id) {
            route_id = rand::random();
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(route_id, PendingRoute {
            key,
            started: Instant::now(),
            tx,
        });
        Ok((route_id, rx))
    }

    /// Deliver an answer. Only the first answer of a route is delivered, later ones
    /// and unknown ids return false.
    pub fn complete(&self, msg: RouteCompleteSend) -> Result<bool> {
        let pending = self.lock()?.remove(&msg.route_id);
        match pending {
            Some(p) => {
                tracing::debug!(
                    "[route] {} for {} answered after {:?}",
                    msg.route_id,
                    p.key,
                    p.started.elapsed()
                );
                Ok(p.tx.send(msg).is_ok())
            }
            None => {
                tracing::debug!("[route] drop answer of unknown route {}", msg.route_id);
                Ok(false)
            }
        }
    }

    /// Forget a route.
    pub fn cancel(&self, route_id: u64) -> Result<bool> {
        Ok(self.lock()?.remove(&route_id).is_some())
    }

    /// Drop routes older than `ttl` or abandoned by their caller. Their callers see
    /// the lookup fail.
    pub fn sweep(&self, ttl: Duration) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.len();
        inner.retain(|id, p| {
            let keep = p.started.elapsed() <= ttl && !p.tx.is_closed();
            if !keep {
                tracing::debug!("[route] sweep stale route {} for {}", id, p.key);
            }
            keep
        });
        Ok(before - inner.len())
    }

    /// Number of outstanding routes.
    pub fn len(&self) -> usize {
        self.lock().map(|i| i.len()).unwrap_or_default()
    }

    /// No outstanding route.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(route_id: u64) -> RouteCompleteSend {
        RouteCompleteSend {
            route_id,
            succs: vec![NodeInfo::new("127.0.0.1:1", 0)],
            path: vec![],
            status: RouteStatus::Ok,
            retries: 0,
        }
    }

    #[tokio::test]
    async fn test_first_answer_wins() -> Result<()> {
        let table = PendingRoutes::new();
        let (id, rx) = table.register(Did::from(1u32))?;
        assert_eq!(table.len(), 1);
        assert!(table.complete(answer(id))?);
        assert!(!table.complete(answer(id))?);
        assert!(!table.complete(answer(id.wrapping_add(1)))?);
        let got = rx.await.unwrap();
        assert_eq!(got.route_id, id);
        assert!(table.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_and_abandoned() -> Result<()> {
        let table = PendingRoutes::new();
        let (_, rx1) = table.register(Did::from(1u32))?;
        let (_, rx2) = table.register(Did::from(2u32))?;
        drop(rx2);
        assert_eq!(table.sweep(Duration::from_secs(60))?, 1);
        assert_eq!(table.len(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(table.sweep(Duration::from_millis(10))?, 1);
        assert!(rx1.await.is_err());
        Ok(())
    }

    #[test]
    fn test_result_helpers() {
        let a = NodeInfo::new("127.0.0.1:1", 0);
        let b = NodeInfo::new("127.0.0.1:2", 0);
        let r = RouteResult::ok(a.id, vec![b.clone()], vec![a.clone(), b.clone()], 0);
        assert!(r.is_ok());
        assert_eq!(r.hops(), 1);
        assert_eq!(r.successor(), Some(&b));
        let r = RouteResult::failed(a.id, RouteStatus::RpcFailure, vec![], 3);
        assert!(!r.is_ok());
        assert_eq!(r.hops(), 0);
        assert!(r.successor().is_none());
    }
}
