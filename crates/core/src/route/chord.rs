//! Iterative lookup: the origin asks every hop whether the key falls between the
//! hop and its successor, and otherwise for the hop's closest predecessor of the key.
use async_trait::async_trait;

use super::RouteIterator;
use super::RouteResult;
use super::RouteStatus;
use crate::consts::MAX_RETRIES;
use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::TestRangeReport;
use crate::message::TestRangeSend;
use crate::stats::StatsCounter;
use crate::vnode::Vnode;

/// Hop by hop lookup driven by the origin.
pub struct IterativeRoute<'a> {
    vnode: &'a Vnode,
}

impl<'a> IterativeRoute<'a> {
    /// Route on behalf of `vnode`.
    pub fn new(vnode: &'a Vnode) -> Self {
        Self { vnode }
    }
}

#[async_trait]
impl RouteIterator for IterativeRoute<'_> {
    async fn route(&self, x: Did, guess: Option<NodeInfo>) -> Result<RouteResult> {
        let v = self.vnode;
        let me = v.info().clone();
        let max_path_len = v.config().max_path_len;

        let first = match guess {
            Some(g) => g,
            None => v.closest_predecessor(x, &[])?,
        };
        let mut path = vec![first];
        let mut failed: Vec<Did> = vec![];
        let mut retries = 0u32;
        let mut consecutive = 0usize;

        loop {
            if path.len() > max_path_len || failed.len() > max_path_len {
                tracing::warn!("[route] lookup of {} exceeds {} hops", x, max_path_len);
                return Ok(RouteResult::failed(x, RouteStatus::RpcFailure, path, retries));
            }
            let Some(last) = path.last().cloned() else {
                path.push(me.clone());
                continue;
            };

            let reply = v
                .call(&last, &TestRangeSend {
                    x,
                    failed: failed.clone(),
                })
                .await;

            match reply {
                Err(e) => {
                    tracing::debug!("[route] hop {} failed for {}: {}", last.id, x, e);
                    path.pop();
                    failed.push(last.id);
                    retries += 1;
                    consecutive += 1;
                    v.stats_counters().incr(StatsCounter::Retries);
                    if consecutive > MAX_RETRIES {
                        return Ok(RouteResult::failed(x, RouteStatus::RpcFailure, path, retries));
                    }
                    match path.last() {
                        Some(prev) if prev.id != me.id => v.alert(prev.clone(), last),
                        _ => {}
                    }
                    if path.is_empty() {
                        path.push(me.clone());
                    }
                }
                Ok(TestRangeReport::InRange { succs }) => {
                    let alive: Vec<NodeInfo> = succs
                        .iter()
                        .filter(|s| !failed.contains(&s.id))
                        .cloned()
                        .collect();
                    let succs = if alive.is_empty() { succs } else { alive };
                    let Some(owner) = succs.first() else {
                        return Ok(RouteResult::failed(x, RouteStatus::NoSuchEntry, path, retries));
                    };
                    if owner.id != last.id {
                        path.push(owner.clone());
                    }
                    return Ok(RouteResult::ok(x, succs, path, retries));
                }
                Ok(TestRangeReport::NotInRange { next }) => {
                    consecutive = 0;
                    if next.id == last.id {
                        tracing::debug!("[route] {} has no hop toward {}", last.id, x);
                        return Ok(RouteResult::failed(x, RouteStatus::NoSuchEntry, path, retries));
                    }
                    if next.id.distance(x) >= last.id.distance(x) {
                        let e = Error::ProtocolViolation {
                            peer: last.id,
                            target: x,
                        };
                        tracing::warn!("[route] {}, answered {}", e, next.id);
                        v.stats_counters().incr(StatsCounter::Violations);
                        v.locations().mark_rpc_result(last.id, false, None)?;
                        return Ok(RouteResult::failed(x, RouteStatus::RpcFailure, path, retries));
                    }
                    path.push(next);
                }
            }
        }
    }
}
