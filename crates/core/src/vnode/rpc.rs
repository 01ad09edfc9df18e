//! RPC plumbing of a [Vnode]: issuing calls, serving the transport, and the
//! liveness and identity checks built on top of them.

use std::sync::Weak;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chordring_transport::core::callback::CallbackError;
use chordring_transport::core::callback::TransportCallback;

use super::Vnode;
use crate::dht::ChallengeTicket;
use crate::dht::Did;
use crate::dht::LocationCache;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::decode;
use crate::message::encode;
use crate::message::ChallengeSend;
use crate::message::NullSend;
use crate::message::Rpc;
use crate::message::RpcReply;
use crate::message::RpcRequest;

impl Vnode {
    /// Call `to` with `args`.
    pub async fn call<T: Rpc>(&self, to: &NodeInfo, args: &T) -> Result<T::Reply> {
        self.call_with(&to.addr, Some(to.id), args).await
    }

    /// Call the vnode `to` listening at `addr`. With `to` unset the first vnode at
    /// `addr` serves the call.
    pub async fn call_with<T: Rpc>(&self, addr: &str, to: Option<Did>, args: &T) -> Result<T::Reply> {
        let proc = T::PROCEDURE;
        self.stats_counters().incr_sent(proc);
        let req = RpcRequest {
            procno: proc.into(),
            to,
            from: self.info().clone(),
            args: encode(args)?,
        };

        let reply = if to == Some(self.id()) {
            self.serve_request(req).await
        } else {
            let started = Instant::now();
            let body = encode(&req)?;
            match self
                .transport()
                .request(addr, body, self.config().rpc_timeout())
                .await
            {
                Ok(data) => {
                    let reply: RpcReply = decode(&data)?;
                    if let Some(id) = to {
                        let ok = !matches!(reply, RpcReply::UnknownNode(_));
                        self.locations()
                            .mark_rpc_result(id, ok, Some(started.elapsed()))?;
                    }
                    reply
                }
                Err(e) => {
                    tracing::debug!("[rpc] {:?} to {} failed: {}", proc, addr, e);
                    return match to {
                        Some(id) => {
                            self.locations().mark_rpc_result(id, false, None)?;
                            Err(Error::RpcFailure(id))
                        }
                        None => Err(Error::Transport(e)),
                    };
                }
            }
        };

        match reply {
            RpcReply::Ok(data) => decode(&data),
            RpcReply::Unavailable(n) => Err(Error::Unavailable(n)),
            RpcReply::UnknownNode(id) => Err(Error::UnknownNode(id)),
            RpcReply::Failed(reason) => Err(Error::RemoteError(proc, reason)),
        }
    }

    /// Whether `node` answers a `Null` call. A failure marks it dead.
    pub async fn ping(&self, node: &NodeInfo) -> bool {
        self.call(node, &NullSend).await.is_ok()
    }

    /// Make sure `node` is a good record of the cache. Known good records are
    /// trusted, known dead ones must answer a ping, and anything else is inserted
    /// and challenged. Returns whether the record ends up good.
    pub async fn learn(&self, node: &NodeInfo) -> Result<bool> {
        if node.id == self.id() {
            return Ok(true);
        }
        if let Some(loc) = self.locations().lookup(node.id)? {
            let same_addr = loc.info.addr == node.addr && loc.info.vnode_num == node.vnode_num;
            if same_addr && loc.is_good() {
                return Ok(true);
            }
            if same_addr && loc.authenticated {
                return Ok(self.ping(node).await);
            }
        }
        self.locations().insert(node.clone())?;
        self.challenge(node).await
    }

    /// Challenge the identity of `node`. Concurrent challenges of the same id share
    /// the first one.
    pub async fn challenge(&self, node: &NodeInfo) -> Result<bool> {
        match self.locations().begin_challenge(node.id)? {
            ChallengeTicket::Follower(rx) => Ok(rx.await.unwrap_or(false)),
            ChallengeTicket::Leader => {
                let guard = ChallengeGuard::new(self.locations(), node.id);
                let ok = self.verify(node).await?;
                guard.finish(ok)?;
                if !ok {
                    tracing::warn!("[challenge] {} at {} failed", node.id, node.addr);
                }
                Ok(ok)
            }
        }
    }

    async fn verify(&self, node: &NodeInfo) -> Result<bool> {
        let nonce: u64 = rand::random();
        let report = match self.call(node, &ChallengeSend { nonce }).await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("[challenge] {} did not answer: {}", node.id, e);
                return Ok(false);
            }
        };
        let valid = report.nonce == nonce
            && report.node.id == node.id
            && report.node.vnode_num == node.vnode_num
            && (!self.config().verify_ids || node.id.is_authentic(&node.addr, node.vnode_num));
        if valid && !report.node.coords.is_empty() {
            let mut info = node.clone();
            info.coords = report.node.coords;
            self.locations().insert(info)?;
        }
        Ok(valid)
    }
}

/// Settles a challenge as failed if the leader goes away before it finishes.
struct ChallengeGuard<'a> {
    locations: &'a LocationCache,
    id: Did,
    done: bool,
}

impl<'a> ChallengeGuard<'a> {
    fn new(locations: &'a LocationCache, id: Did) -> Self {
        Self {
            locations,
            id,
            done: false,
        }
    }

    fn finish(mut self, authenticated: bool) -> Result<()> {
        self.done = true;
        self.locations.finish_challenge(self.id, authenticated)
    }
}

impl Drop for ChallengeGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.locations.finish_challenge(self.id, false);
        }
    }
}

/// The [TransportCallback] installed by a vnode on its transport.
/// It holds a weak reference, so the transport never keeps the vnode alive.
pub struct VnodeCallback {
    vnode: Weak<Vnode>,
}

impl VnodeCallback {
    /// Serve requests on behalf of `vnode`.
    pub fn new(vnode: Weak<Vnode>) -> Self {
        Self { vnode }
    }
}

#[async_trait]
impl TransportCallback for VnodeCallback {
    async fn on_request(&self, from: &str, body: Bytes) -> std::result::Result<Bytes, CallbackError> {
        let vnode = self.vnode.upgrade().ok_or(Error::VnodeDropped)?;
        let req: RpcRequest = decode(&body)?;
        tracing::trace!("[rpc] request {} from {}", req.procno, from);
        let reply = vnode.serve_request(req).await;
        Ok(encode(&reply)?)
    }
}
