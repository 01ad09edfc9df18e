//! Recursive lookup.
//!
//! The origin registers the lookup in its [PendingRoutes](super::PendingRoutes) and
//! hands it to itself as a first hop. Every hop appends itself to the path and either
//! answers the origin with `RouteComplete`, or forwards the query to its closest
//! predecessor of the key. A hop retries up to [RECROUTE_MAX_FAILED] alternates
//! before it reports the failure to the origin.
//!
//! With `shave` on, a hop that already knows part of the successors of the key hands
//! the query to the nearest of them (`RoutePenultimate`), which completes the list
//! with its own successors.
use std::sync::Arc;

use async_trait::async_trait;

use super::RouteIterator;
use super::RouteResult;
use super::RouteStatus;
use crate::consts::RECROUTE_MAX_FAILED;
use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::RouteCompleteSend;
use crate::message::RoutePenultimateSend;
use crate::message::RouteSend;
use crate::vnode::Vnode;

/// Lookup delegated to the ring.
pub struct RecursiveRoute<'a> {
    vnode: &'a Vnode,
}

impl<'a> RecursiveRoute<'a> {
    /// Route on behalf of `vnode`.
    pub fn new(vnode: &'a Vnode) -> Self {
        Self { vnode }
    }
}

#[async_trait]
impl RouteIterator for RecursiveRoute<'_> {
    async fn route(&self, x: Did, _guess: Option<NodeInfo>) -> Result<RouteResult> {
        let v = self.vnode;
        let (route_id, rx) = v.pending().register(x)?;
        let msg = RouteSend {
            route_id,
            origin: v.info().clone(),
            x,
            m: v.config().nsucc.max(1),
            path: vec![],
            retries: 0,
        };
        if let Err(e) = v.call(v.info(), &msg).await {
            v.pending().cancel(route_id)?;
            return Err(e);
        }
        await_completion(v, x, route_id, rx).await
    }
}

/// Wait for the answer of `route_id`, at most the lookup timeout.
pub(crate) async fn await_completion(
    v: &Vnode,
    x: Did,
    route_id: u64,
    rx: tokio::sync::oneshot::Receiver<RouteCompleteSend>,
) -> Result<RouteResult> {
    match tokio::time::timeout(v.config().lookup_timeout(), rx).await {
        Ok(Ok(done)) => Ok(RouteResult {
            key: x,
            successors: done.succs,
            path: done.path,
            status: done.status,
            retries: done.retries,
        }),
        Ok(Err(_)) => {
            tracing::debug!("[route] {} for {}", Error::RouteCancelled(route_id), x);
            Ok(RouteResult::failed(x, RouteStatus::RpcFailure, vec![], 0))
        }
        Err(_) => {
            v.pending().cancel(route_id)?;
            tracing::debug!("[route] route {} for {} timed out", route_id, x);
            Ok(RouteResult::failed(x, RouteStatus::RpcFailure, vec![], 0))
        }
    }
}

/// Send the answer of a lookup to its origin.
pub(crate) async fn complete(
    v: &Vnode,
    origin: &NodeInfo,
    route_id: u64,
    succs: Vec<NodeInfo>,
    path: Vec<NodeInfo>,
    status: RouteStatus,
    retries: u32,
) {
    let msg = RouteCompleteSend {
        route_id,
        succs,
        path,
        status,
        retries,
    };
    if let Err(e) = v.call(origin, &msg).await {
        tracing::warn!("[route] failed to answer route {} to {}: {}", route_id, origin.id, e);
    }
}

/// Successors of `x` known to `v`: the window of its successor list starting at the
/// first one at or after `x`. `None` when `x` is beyond the list.
pub(crate) fn successors_in_range(v: &Vnode, x: Did, cs: &[NodeInfo]) -> Option<Vec<NodeInfo>> {
    let me = v.info().id;
    let last = cs.last()?;
    if !x.between_right_incl(me, last.id) {
        return None;
    }
    let i = cs
        .iter()
        .position(|s| x.between_right_incl(me, s.id))
        .unwrap_or(0);
    Some(cs[i..].to_vec())
}

/// Serve one hop of a recursive lookup.
pub(crate) async fn forward(v: Arc<Vnode>, msg: RouteSend) -> Result<()> {
    let me = v.info().clone();
    let x = msg.x;
    let m = msg.m.max(1);
    let mut retries = msg.retries;
    let mut path = msg.path.clone();
    path.push(me.clone());

    let cs = v.successors().succs()?;
    if cs.is_empty() || x == me.id {
        let mut succs = vec![me.clone()];
        succs.extend(cs.into_iter().take(m.saturating_sub(1)));
        complete(&v, &msg.origin, msg.route_id, succs, path, RouteStatus::Ok, retries).await;
        return Ok(());
    }

    let known = successors_in_range(&v, x, &cs);
    if let Some(known) = &known {
        if known.len() >= m {
            let succs = known[..m].to_vec();
            complete(&v, &msg.origin, msg.route_id, succs, path, RouteStatus::Ok, retries).await;
            return Ok(());
        }
        if v.config().shave && !known.is_empty() {
            if let Some(p) = nearest(&v, known)? {
                let penult = RoutePenultimateSend {
                    route_id: msg.route_id,
                    origin: msg.origin.clone(),
                    x,
                    m,
                    path: path.clone(),
                    successors: known.clone(),
                    retries,
                };
                match v.call(&p, &penult).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::debug!("[route] penultimate {} failed: {}", p.id, e);
                        retries += 1;
                    }
                }
            }
        }
    }

    let mut failed: Vec<Did> = vec![];
    loop {
        let next = v.closest_predecessor(x, &failed)?;
        if next.id == me.id {
            // nobody is closer to the key than this hop
            match known {
                Some(succs) => {
                    complete(&v, &msg.origin, msg.route_id, succs, path, RouteStatus::Ok, retries)
                        .await
                }
                None => {
                    complete(
                        &v,
                        &msg.origin,
                        msg.route_id,
                        vec![],
                        path,
                        RouteStatus::NoSuchEntry,
                        retries,
                    )
                    .await
                }
            }
            return Ok(());
        }
        let hop = RouteSend {
            route_id: msg.route_id,
            origin: msg.origin.clone(),
            x,
            m,
            path: path.clone(),
            retries,
        };
        match v.call(&next, &hop).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!("[route] forward of {} to {} failed: {}", msg.route_id, next.id, e);
                failed.push(next.id);
                retries += 1;
                if failed.len() > RECROUTE_MAX_FAILED {
                    complete(
                        &v,
                        &msg.origin,
                        msg.route_id,
                        vec![],
                        path,
                        RouteStatus::RpcFailure,
                        retries,
                    )
                    .await;
                    return Ok(());
                }
            }
        }
    }
}

/// Serve a penultimate hand-off: keep the successors the sender knew up to this
/// node, then fill up with this node's own successors.
pub(crate) async fn penultimate(v: Arc<Vnode>, msg: RoutePenultimateSend) -> Result<()> {
    let me = v.info().clone();
    let m = msg.m.max(1);
    let mut path = msg.path.clone();
    path.push(me.clone());

    let mut succs: Vec<NodeInfo> = vec![];
    for s in &msg.successors {
        succs.push(s.clone());
        if s.id == me.id {
            break;
        }
    }
    if !succs.iter().any(|s| s.id == me.id) {
        succs.push(me.clone());
    }
    for s in v.successors().succs()? {
        if succs.len() >= m {
            break;
        }
        if !succs.iter().any(|n| n.id == s.id) {
            succs.push(s);
        }
    }
    succs.truncate(m);

    let available = v.successors().num_succ()? + 1;
    let status = if succs.len() >= m.min(available) {
        RouteStatus::Ok
    } else {
        RouteStatus::RpcFailure
    };
    let succs = if status == RouteStatus::Ok { succs } else { vec![] };
    complete(&v, &msg.origin, msg.route_id, succs, path, status, msg.retries).await;
    Ok(())
}

fn nearest(v: &Vnode, candidates: &[NodeInfo]) -> Result<Option<NodeInfo>> {
    let coords = &v.info().coords;
    let mut best: Option<(f32, NodeInfo)> = None;
    for c in candidates {
        let Some(loc) = v.locations().lookup(c.id)? else {
            continue;
        };
        if !loc.is_good() {
            continue;
        }
        let d = loc.distance_to(coords);
        if best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
            best = Some((d, loc.info));
        }
    }
    Ok(best.map(|(_, n)| n))
}
