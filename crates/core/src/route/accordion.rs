//! Accordion: recursive lookup with budget-bounded parallel forwarding.
//!
//! Each hop forwards the query to up to `p` next hops at once, where `p` is bounded
//! both by a token bucket of bytes (refilled at `budget` bytes per second, capped at
//! `burst`) and by an adaptive parallelism level. Every hop answers its sender with
//! the nodes it knows between the sender and the key, so lookups also fill the
//! sender's cache. A route id seen twice at a hop is answered but not forwarded
//! again.
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use num_bigint::BigUint;

use super::recursive::await_completion;
use super::recursive::complete;
use super::recursive::successors_in_range;
use super::RouteIterator;
use super::RouteResult;
use super::RouteStatus;
use crate::config::AccordionConfig;
use crate::consts::ACCORDION_CLEAN_INTERVAL_MS;
use crate::consts::ACCORDION_FILL_GAP_NODES;
use crate::consts::ACCORDION_MAX_PARALLELISM;
use crate::consts::ACCORDION_MSG_BYTES;
use crate::consts::ACCORDION_SENT_TTL_MS;
use crate::consts::MAX_RETRIES;
use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::AccordionRouteSend;
use crate::vnode::Vnode;

struct AccordionInner {
    bavail: f64,
    updated: Instant,
    para: usize,
    explored: u64,
    forwarded: u64,
    sent: HashMap<u64, Instant>,
    last_clean: Instant,
}

/// Token bucket, parallelism level and seen-route table of a vnode.
pub struct AccordionState {
    budget: f64,
    burst: f64,
    inner: Mutex<AccordionInner>,
}

impl AccordionState {
    /// A full bucket and a parallelism of one.
    pub fn new(config: &AccordionConfig) -> Self {
        let now = Instant::now();
        Self {
            budget: config.budget as f64,
            burst: config.burst as f64,
            inner: Mutex::new(AccordionInner {
                bavail: config.burst as f64,
                updated: now,
                para: 1,
                explored: 0,
                forwarded: 0,
                sent: HashMap::new(),
                last_clean: now,
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<AccordionInner>> {
        self.inner.lock().map_err(|_| Error::RoutingLockError)
    }

    fn refill(&self, inner: &mut AccordionInner, now: Instant) {
        let elapsed = now.saturating_duration_since(inner.updated).as_secs_f64();
        inner.bavail = (inner.bavail + self.budget * elapsed).min(self.burst);
        inner.updated = now;
    }

    /// Charge `bytes` to the bucket. The debt is bounded by the burst.
    pub fn bytes_sent(&self, bytes: u64) -> Result<()> {
        self.bytes_sent_at(bytes, Instant::now())
    }

    pub(crate) fn bytes_sent_at(&self, bytes: u64, now: Instant) -> Result<()> {
        let mut inner = self.lock()?;
        self.refill(&mut inner, now);
        inner.bavail = (inner.bavail - bytes as f64).max(-self.burst);
        Ok(())
    }

    /// Bytes available now.
    pub fn available(&self) -> Result<f64> {
        let mut inner = self.lock()?;
        self.refill(&mut inner, Instant::now());
        Ok(inner.bavail)
    }

    /// Number of next hops a forward may use now.
    pub fn parallelism(&self) -> Result<usize> {
        self.parallelism_at(Instant::now())
    }

    pub(crate) fn parallelism_at(&self, now: Instant) -> Result<usize> {
        let mut inner = self.lock()?;
        self.refill(&mut inner, now);
        let by_budget = (inner.bavail / ACCORDION_MSG_BYTES as f64).floor().max(1.0) as usize;
        let by_budget = by_budget.min(ACCORDION_MAX_PARALLELISM);
        Ok(by_budget.min(inner.para).max(1))
    }

    /// Current parallelism level.
    pub fn para(&self) -> usize {
        self.lock().map(|i| i.para).unwrap_or(1)
    }

    /// A forward was issued.
    pub fn record_forward(&self) -> Result<()> {
        self.lock()?.forwarded += 1;
        Ok(())
    }

    /// A hop reply taught `fresh` unknown nodes.
    pub fn record_explored(&self, fresh: usize) -> Result<()> {
        self.lock()?.explored += fresh as u64;
        Ok(())
    }

    /// Adapt the parallelism level to the last period: raise it when forwards taught
    /// more nodes than they cost, nearly halve it when they taught nothing.
    pub fn adjust_para(&self) -> Result<usize> {
        let mut inner = self.lock()?;
        if inner.forwarded > 0 {
            if inner.explored > inner.forwarded {
                inner.para = (inner.para + 1).min(ACCORDION_MAX_PARALLELISM);
            } else if inner.explored == 0 {
                inner.para = ((inner.para + 1) / 2).max(1);
            }
        }
        inner.explored = 0;
        inner.forwarded = 0;
        Ok(inner.para)
    }

    /// Record `route_id`. Returns true if it was already seen.
    pub fn seen(&self, route_id: u64) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.sent.contains_key(&route_id) {
            return Ok(true);
        }
        inner.sent.insert(route_id, Instant::now());
        Ok(false)
    }

    /// Drop seen routes older than `ttl`.
    pub fn clean_sent(&self, now: Instant, ttl: Duration) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.sent.len();
        inner
            .sent
            .retain(|_, at| now.saturating_duration_since(*at) <= ttl);
        inner.last_clean = now;
        Ok(before - inner.sent.len())
    }

    /// Sweep the seen routes if the sweep period elapsed.
    pub fn maybe_clean(&self, now: Instant) -> Result<usize> {
        let due = {
            let inner = self.lock()?;
            now.saturating_duration_since(inner.last_clean)
                >= Duration::from_millis(ACCORDION_CLEAN_INTERVAL_MS)
        };
        if !due {
            return Ok(0);
        }
        self.clean_sent(now, Duration::from_millis(ACCORDION_SENT_TTL_MS))
    }
}

/// Parallel lookup driven by the ring.
pub struct AccordionRoute<'a> {
    vnode: &'a Vnode,
}

impl<'a> AccordionRoute<'a> {
    /// Route on behalf of `vnode`.
    pub fn new(vnode: &'a Vnode) -> Self {
        Self { vnode }
    }
}

#[async_trait]
impl RouteIterator for AccordionRoute<'_> {
    async fn route(&self, x: Did, _guess: Option<NodeInfo>) -> Result<RouteResult> {
        let v = self.vnode;
        let (route_id, rx) = v.pending().register(x)?;
        let msg = AccordionRouteSend {
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

/// `a / b` as a float, both being ring distances.
fn ratio(a: &BigUint, b: &BigUint) -> f64 {
    if *b == BigUint::from(0u8) {
        return 1.0;
    }
    let q: BigUint = (a << 32usize) / b;
    u64::try_from(&q).unwrap_or(u64::MAX) as f64 / (1u64 << 32) as f64
}

/// Up to `p` good nodes strictly between the vnode and `x`, ranked by the share of
/// the remaining distance they leave, weighted by their network distance.
pub(crate) fn next_hops(v: &Vnode, x: Did, p: usize, exclude: &[Did]) -> Result<Vec<NodeInfo>> {
    let me = v.info();
    let mydist = me.id.distance(x);
    let mut ranked: Vec<(f64, NodeInfo)> = v
        .locations()
        .predecessors_of(x, 4 * p + 4)?
        .into_iter()
        .filter(|l| l.id().between(me.id, x) && !exclude.contains(&l.id()))
        .map(|l| {
            let share = ratio(&l.id().distance(x), &mydist);
            let lat = l.distance_to(&me.coords) as f64;
            (share * (1.0 + lat / 100.0), l.info)
        })
        .collect();
    ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    Ok(ranked.into_iter().take(p).map(|(_, n)| n).collect())
}

/// Nodes known strictly between `prev` and `x`, nearest to `x` first.
pub(crate) fn fill_gap(v: &Vnode, prev: Did, x: Did) -> Result<Vec<NodeInfo>> {
    Ok(v.locations()
        .predecessors_of(x, ACCORDION_FILL_GAP_NODES)?
        .into_iter()
        .filter(|l| l.id().between(prev, x))
        .map(|l| l.info)
        .collect())
}

/// Serve one hop of a parallel lookup.
pub(crate) async fn forward(v: Arc<Vnode>, msg: AccordionRouteSend) -> Result<()> {
    let me = v.info().clone();
    let x = msg.x;
    let m = msg.m.max(1);
    let mut path = msg.path.clone();
    path.push(me.clone());

    let cs = v.successors().succs()?;
    if cs.is_empty() || x == me.id {
        let mut succs = vec![me.clone()];
        succs.extend(cs.into_iter().take(m.saturating_sub(1)));
        v.accordion().bytes_sent(ACCORDION_MSG_BYTES)?;
        complete(&v, &msg.origin, msg.route_id, succs, path, RouteStatus::Ok, msg.retries).await;
        return Ok(());
    }

    let known = successors_in_range(&v, x, &cs);
    if let Some(known) = &known {
        if known.len() >= m {
            v.accordion().bytes_sent(ACCORDION_MSG_BYTES)?;
            let succs = known[..m].to_vec();
            complete(&v, &msg.origin, msg.route_id, succs, path, RouteStatus::Ok, msg.retries).await;
            return Ok(());
        }
    }

    let p = v.accordion().parallelism()?;
    let hops = next_hops(&v, x, p, &[])?;
    if hops.is_empty() {
        let (succs, status) = match known {
            Some(k) => (k, RouteStatus::Ok),
            None => (vec![], RouteStatus::NoSuchEntry),
        };
        v.accordion().bytes_sent(ACCORDION_MSG_BYTES)?;
        complete(&v, &msg.origin, msg.route_id, succs, path, status, msg.retries).await;
        return Ok(());
    }

    v.accordion().record_forward()?;
    let next = AccordionRouteSend {
        path,
        ..msg
    };
    let outstanding = Arc::new(AtomicUsize::new(hops.len()));
    let sends = hops
        .into_iter()
        .map(|h| send(v.clone(), h, next.clone(), known.clone(), outstanding.clone()));
    for r in futures::future::join_all(sends).await {
        if let Err(e) = r {
            tracing::error!("[accordion] forward of {} failed: {}", next.route_id, e);
        }
    }
    Ok(())
}

async fn send(
    v: Arc<Vnode>,
    hop: NodeInfo,
    msg: AccordionRouteSend,
    known: Option<Vec<NodeInfo>>,
    outstanding: Arc<AtomicUsize>,
) -> Result<()> {
    let me = v.info().id;
    let mut hop = hop;
    let mut retries = msg.retries;
    let mut failed: Vec<Did> = vec![];
    loop {
        v.accordion().bytes_sent(ACCORDION_MSG_BYTES)?;
        let req = AccordionRouteSend {
            retries,
            ..msg.clone()
        };
        match v.call(&hop, &req).await {
            Ok(gap) => {
                let mut fresh = 0;
                for n in gap {
                    if n.id == me {
                        continue;
                    }
                    if !v.locations().cached(n.id)? {
                        fresh += 1;
                    }
                    if let Err(e) = v.learn(&n).await {
                        tracing::debug!("[accordion] failed to learn {}: {}", n.id, e);
                    }
                }
                v.accordion().record_explored(fresh)?;
                outstanding.fetch_sub(1, Ordering::SeqCst);
                return Ok(());
            }
            Err(e) => {
                tracing::debug!("[accordion] hop {} of {} failed: {}", hop.id, msg.route_id, e);
                failed.push(hop.id);
                retries += 1;
                if (retries as usize) < MAX_RETRIES && outstanding.load(Ordering::SeqCst) == 1 {
                    if let Some(n) = next_hops(&v, msg.x, 1, &failed)?.into_iter().next() {
                        hop = n;
                        continue;
                    }
                }
                if outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
                    // every branch gave up, answer with what this hop knows
                    let (succs, status) = match known {
                        Some(k) if !k.is_empty() => (k, RouteStatus::Ok),
                        _ => (vec![], RouteStatus::RpcFailure),
                    };
                    complete(&v, &msg.origin, msg.route_id, succs, msg.path.clone(), status, retries)
                        .await;
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> AccordionState {
        AccordionState::new(&AccordionConfig {
            budget: 10,
            burst: 1000,
        })
    }

    #[test]
    fn test_parallelism_follows_para_and_budget() -> Result<()> {
        let s = state();
        let t0 = Instant::now();
        assert_eq!(s.parallelism_at(t0)?, 1);

        for _ in 0..10 {
            s.record_forward()?;
            s.record_explored(3)?;
            s.adjust_para()?;
        }
        assert_eq!(s.para(), ACCORDION_MAX_PARALLELISM);
        assert_eq!(s.parallelism_at(t0)?, ACCORDION_MAX_PARALLELISM);

        // drain the bucket, then let it refill for 8 seconds
        s.bytes_sent_at(1000, t0)?;
        assert_eq!(s.parallelism_at(t0)?, 1);
        assert_eq!(s.parallelism_at(t0 + Duration::from_secs(8))?, 2);
        Ok(())
    }

    #[test]
    fn test_debt_is_bounded() -> Result<()> {
        let s = state();
        let t0 = Instant::now();
        s.bytes_sent_at(10_000, t0)?;
        // refill of 100s would bring a bounded debt of 1000 back to 0
        assert_eq!(s.parallelism_at(t0 + Duration::from_secs(100))?, 1);
        let inner = s.lock()?;
        assert!(inner.bavail >= -1.0 && inner.bavail <= 1.0);
        Ok(())
    }

    #[test]
    fn test_para_nearly_halves_without_exploration() -> Result<()> {
        let s = state();
        for _ in 0..5 {
            s.record_forward()?;
            s.record_explored(2)?;
            s.adjust_para()?;
        }
        assert_eq!(s.para(), 6);
        s.record_forward()?;
        assert_eq!(s.adjust_para()?, 3);
        s.record_forward()?;
        assert_eq!(s.adjust_para()?, 2);
        s.record_forward()?;
        assert_eq!(s.adjust_para()?, 1);
        s.record_forward()?;
        assert_eq!(s.adjust_para()?, 1);
        // an idle period changes nothing
        assert_eq!(s.adjust_para()?, 1);
        Ok(())
    }

    #[test]
    fn test_seen_routes_expire() -> Result<()> {
        let s = state();
        assert!(!s.seen(7)?);
        assert!(s.seen(7)?);
        assert!(!s.seen(8)?);
        let now = Instant::now();
        assert_eq!(s.maybe_clean(now)?, 0);
        assert_eq!(s.clean_sent(now + Duration::from_secs(30), Duration::from_secs(20))?, 2);
        assert!(!s.seen(7)?);
        Ok(())
    }

    #[test]
    fn test_ratio() {
        let a = BigUint::from(1u8) << 100usize;
        let b = BigUint::from(1u8) << 101usize;
        assert!((ratio(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(ratio(&a, &BigUint::from(0u8)), 1.0);
    }
}
