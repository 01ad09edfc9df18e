#![warn(missing_docs)]
//! The location cache is the single source of truth for what a vnode knows about
//! other ring members.
//!
//! Records live in an arena owned by [LocationCache]. Maintainers keep ids or
//! [LocationRef] handles, never copies they trust blindly: every read returns a
//! fresh snapshot, and a handle whose slot was evicted resolves to `None`.
//!
//! A record is *good* when it is both alive and authenticated. Only good records
//! are returned by the closest-successor and closest-predecessor scans.
//!
//! Eviction is least-recently-used among records that are
//! - not the local vnode,
//! - not inside a pinned window,
//! - not in the middle of an identity challenge.
//!
//! Records that are not good are evicted first.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::consts::CHECK_DEAD_INITIAL_MS;
use crate::consts::CHECK_DEAD_MAX_MS;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;

/// Wire representation of a ring member.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Position on the ring.
    pub id: Did,
    /// `host:port` the member listens on.
    pub addr: String,
    /// Index of the vnode at that address.
    pub vnode_num: u32,
    /// Synthetic network coordinates, may be empty.
    #[serde(default)]
    pub coords: Vec<f32>,
}

impl NodeInfo {
    /// Build the info of vnode `vnode_num` at `addr`, with its derived id.
    pub fn new(addr: &str, vnode_num: u32) -> Self {
        Self {
            id: Did::from_addr(addr, vnode_num),
            addr: addr.to_string(),
            vnode_num,
            coords: vec![],
        }
    }

    /// Build an info with an explicit id.
    pub fn with_id(id: Did, addr: &str, vnode_num: u32) -> Self {
        Self {
            id,
            addr: addr.to_string(),
            vnode_num,
            coords: vec![],
        }
    }
}

/// Euclidean distance of two coordinate vectors. Missing dimensions count as zero.
pub fn coord_distance(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| {
            let d = a.get(i).copied().unwrap_or(0.0) - b.get(i).copied().unwrap_or(0.0);
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// State of the exponential re-check of a node believed dead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadCheck {
    /// Current re-check period.
    pub period: Duration,
    /// When the next ping is due.
    pub due: Instant,
}

/// A cache entry.
#[derive(Clone, Debug)]
pub struct Location {
    /// Identity and address.
    pub info: NodeInfo,
    /// False after an RPC to the node failed, until it answers again.
    pub alive: bool,
    /// True once the node passed an identity challenge.
    pub authenticated: bool,
    /// Last time the record was refreshed.
    pub last_update: DateTime<Utc>,
    /// How long the node has been known to be up.
    pub age: Duration,
    /// Opaque per-peer allowance, used by the parallel router.
    pub budget: i64,
    /// RPCs issued to the node.
    pub rpc_count: u64,
    /// Smoothed round trip time in milliseconds.
    pub rtt_ms: Option<f64>,
    /// Pending re-check when the node is believed dead.
    pub dead_check: Option<DeadCheck>,
    first_seen: DateTime<Utc>,
}

impl Location {
    fn new(info: NodeInfo) -> Self {
        let now = Utc::now();
        Self {
            info,
            alive: true,
            authenticated: false,
            last_update: now,
            age: Duration::ZERO,
            budget: 0,
            rpc_count: 0,
            rtt_ms: None,
            dead_check: None,
            first_seen: now,
        }
    }

    /// Did of the record.
    pub fn id(&self) -> Did {
        self.info.id
    }

    /// Address of the record.
    pub fn addr(&self) -> &str {
        &self.info.addr
    }

    /// Alive and authenticated.
    pub fn is_good(&self) -> bool {
        self.alive && self.authenticated
    }

    /// Estimated network distance to `coords`. Measured rtt wins over coordinates.
    pub fn distance_to(&self, coords: &[f32]) -> f32 {
        match self.rtt_ms {
            Some(rtt) => rtt as f32,
            None => coord_distance(&self.info.coords, coords),
        }
    }
}

/// A stable handle to a cache slot.
/// It stops resolving once the slot is evicted, even if the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocationRef {
    /// Did the handle was issued for.
    pub id: Did,
    slot: usize,
    generation: u64,
}

/// Protection window of a pin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinWindow {
    /// Good records at or after the pinned id kept resident.
    pub succs: usize,
    /// Good predecessors of the pinned id kept resident.
    pub preds: usize,
}

/// Pins as set by maintainers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pin {
    /// Keep the closest successor of the id.
    Succ,
    /// Keep the closest predecessor of the id.
    Pred,
    /// Keep `n` successors of the id.
    SuccList(usize),
    /// Keep `n` predecessors of the id.
    PredList(usize),
}

/// Outcome of asking to challenge a node.
#[derive(Debug)]
pub enum ChallengeTicket {
    /// The caller must issue the challenge and report with [LocationCache::finish_challenge].
    Leader,
    /// Another challenge is in flight. The receiver yields its result.
    Follower(oneshot::Receiver<bool>),
}

struct Slot {
    loc: Location,
    generation: u64,
    last_used: u64,
}

#[derive(Default)]
struct CacheInner {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: BTreeMap<Did, usize>,
    pins: HashMap<Did, PinWindow>,
    challenges: HashMap<Did, Vec<oneshot::Sender<bool>>>,
    tick: u64,
    generation: u64,
}

impl CacheInner {
    fn get(&self, id: &Did) -> Option<&Slot> {
        self.index
            .get(id)
            .and_then(|i| self.slots.get(*i))
            .and_then(|s| s.as_ref())
    }

    fn get_mut(&mut self, id: &Did) -> Option<&mut Slot> {
        let i = *self.index.get(id)?;
        self.slots.get_mut(i).and_then(|s| s.as_mut())
    }

    fn loc(&self, slot: usize) -> Option<&Location> {
        self.slots.get(slot).and_then(|s| s.as_ref()).map(|s| &s.loc)
    }

    fn touch(&mut self, id: &Did) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(slot) = self.get_mut(id) {
            slot.last_used = tick;
        }
    }

    /// Ids clockwise strictly after `x`, wrapping once, never reaching `x` again.
    fn clockwise_after(&self, x: Did) -> impl Iterator<Item = (&Did, &usize)> {
        use std::ops::Bound::Excluded;
        use std::ops::Bound::Unbounded;
        self.index
            .range((Excluded(x), Unbounded))
            .chain(self.index.range(..x))
    }

    /// Ids counter-clockwise strictly before `x`, wrapping once.
    fn counter_clockwise_before(&self, x: Did) -> impl Iterator<Item = (&Did, &usize)> {
        use std::ops::Bound::Excluded;
        use std::ops::Bound::Unbounded;
        self.index
            .range(..x)
            .rev()
            .chain(self.index.range((Excluded(x), Unbounded)).rev())
    }

    fn good_at(&self, slot: usize) -> bool {
        self.loc(slot).map(|l| l.is_good()).unwrap_or(false)
    }

    fn protected(&self, myid: Did) -> HashSet<Did> {
        let mut keep: HashSet<Did> = self.challenges.keys().copied().collect();
        for (x, w) in self.pins.iter() {
            let at_or_after = self.index.get_key_value(x).into_iter();
            let succs = at_or_after
                .chain(self.clockwise_after(*x))
                .filter(|(id, i)| **id != myid && self.good_at(**i))
                .take(w.succs);
            keep.extend(succs.map(|(id, _)| *id));
            let preds = self
                .counter_clockwise_before(*x)
                .filter(|(id, i)| **id != myid && self.good_at(**i))
                .take(w.preds);
            keep.extend(preds.map(|(id, _)| *id));
        }
        keep
    }

    fn remove(&mut self, id: &Did) -> Option<Location> {
        let i = self.index.remove(id)?;
        let slot = self.slots.get_mut(i)?.take()?;
        self.free.push(i);
        Some(slot.loc)
    }
}

/// The bounded, evictable cache of ring members.
pub struct LocationCache {
    myid: Did,
    max_cache: usize,
    check_dead_initial: Duration,
    check_dead_max: Duration,
    inner: Mutex<CacheInner>,
}

impl LocationCache {
    /// Create a cache holding at most `max_cache` records, with `me` already inserted
    /// as a good record.
    pub fn new(me: NodeInfo, max_cache: usize) -> Self {
        let cache = Self {
            myid: me.id,
            max_cache,
            check_dead_initial: Duration::from_millis(CHECK_DEAD_INITIAL_MS),
            check_dead_max: Duration::from_millis(CHECK_DEAD_MAX_MS),
            inner: Mutex::new(CacheInner::default()),
        };
        if let Ok(mut inner) = cache.lock() {
            let slot = Self::alloc(&mut inner, Location {
                authenticated: true,
                ..Location::new(me)
            });
            inner.index.insert(cache.myid, slot);
        }
        cache
    }

    /// Override the dead-node re-check bounds.
    pub fn with_check_dead(mut self, initial: Duration, max: Duration) -> Self {
        self.check_dead_initial = initial;
        self.check_dead_max = max;
        self
    }

    fn lock(&self) -> Result<MutexGuard<CacheInner>> {
        self.inner.lock().map_err(|_| Error::LocationCacheLockError)
    }

    fn alloc(inner: &mut CacheInner, loc: Location) -> usize {
        inner.generation += 1;
        inner.tick += 1;
        let slot = Slot {
            loc,
            generation: inner.generation,
            last_used: inner.tick,
        };
        match inner.free.pop() {
            Some(i) => {
                inner.slots[i] = Some(slot);
                i
            }
            None => {
                inner.slots.push(Some(slot));
                inner.slots.len() - 1
            }
        }
    }

    /// Did of the local vnode.
    pub fn my_id(&self) -> Did {
        self.myid
    }

    /// Inserts or refreshes a record.
    /// Re-inserting a known id keeps its rpc count and marks it alive. A changed
    /// address drops its authentication.
    pub fn insert(&self, info: NodeInfo) -> Result<LocationRef> {
        let mut inner = self.lock()?;
        let id = info.id;
        if let Some(&slot) = inner.index.get(&id) {
            let myid = self.myid;
            let generation = match inner.slots.get_mut(slot).and_then(|s| s.as_mut()) {
                Some(s) => {
                    let loc = &mut s.loc;
                    if loc.info.addr != info.addr || loc.info.vnode_num != info.vnode_num {
                        loc.authenticated = id == myid;
                    }
                    if !info.coords.is_empty() {
                        loc.info.coords = info.coords;
                    }
                    loc.info.addr = info.addr;
                    loc.info.vnode_num = info.vnode_num;
                    loc.alive = true;
                    loc.dead_check = None;
                    loc.last_update = Utc::now();
                    s.generation
                }
                None => return Err(Error::LocationNotFound(id)),
            };
            inner.touch(&id);
            return Ok(LocationRef {
                id,
                slot,
                generation,
            });
        }

        let slot = Self::alloc(&mut inner, Location::new(info));
        inner.index.insert(id, slot);
        let generation = inner.slots[slot].as_ref().map(|s| s.generation).unwrap_or(0);
        self.evict(&mut inner, id);
        Ok(LocationRef {
            id,
            slot,
            generation,
        })
    }

    fn evict(&self, inner: &mut CacheInner, fresh: Did) {
        if inner.index.len() <= self.max_cache {
            return;
        }
        let keep = inner.protected(self.myid);
        while inner.index.len() > self.max_cache {
            let victim = inner
                .index
                .iter()
                .filter(|(id, _)| **id != self.myid && **id != fresh && !keep.contains(*id))
                .filter_map(|(id, i)| {
                    inner
                        .slots
                        .get(*i)
                        .and_then(|s| s.as_ref())
                        .map(|s| ((s.loc.is_good(), s.last_used), *id))
                })
                .min()
                .map(|(_, id)| id);
            match victim {
                Some(id) => {
                    tracing::debug!("[location] evict {}", id);
                    inner.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Snapshot of the record of `id`.
    pub fn lookup(&self, id: Did) -> Result<Option<Location>> {
        let inner = self.lock()?;
        Ok(inner.get(&id).map(|s| s.loc.clone()))
    }

    /// Handle of the record of `id`.
    pub fn handle(&self, id: Did) -> Result<Option<LocationRef>> {
        let inner = self.lock()?;
        Ok(inner.index.get(&id).and_then(|i| {
            inner.slots[*i].as_ref().map(|s| LocationRef {
                id,
                slot: *i,
                generation: s.generation,
            })
        }))
    }

    /// Resolve a handle. `None` once the record was evicted.
    pub fn resolve(&self, handle: &LocationRef) -> Result<Option<Location>> {
        let inner = self.lock()?;
        Ok(inner
            .slots
            .get(handle.slot)
            .and_then(|s| s.as_ref())
            .filter(|s| s.generation == handle.generation && s.loc.id() == handle.id)
            .map(|s| s.loc.clone()))
    }

    /// Whether a record exists for `id`.
    pub fn cached(&self, id: Did) -> Result<bool> {
        Ok(self.lock()?.index.contains_key(&id))
    }

    /// Whether `id` is alive and authenticated.
    pub fn is_good(&self, id: Did) -> Result<bool> {
        Ok(self.lock()?.get(&id).map(|s| s.loc.is_good()).unwrap_or(false))
    }

    /// Number of records.
    pub fn size(&self) -> Result<usize> {
        Ok(self.lock()?.index.len())
    }

    /// Number of good records, the local vnode included.
    pub fn usable_nodes(&self) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner
            .index
            .values()
            .filter(|i| inner.good_at(**i))
            .count())
    }

    /// The nearest good record at or after `x`, skipping `excluding`.
    pub fn closest_successor(&self, x: Did, excluding: &[Did]) -> Result<Option<Location>> {
        let mut inner = self.lock()?;
        let found = inner
            .index
            .range(x..)
            .chain(inner.index.range(..x))
            .find(|(id, i)| inner.good_at(**i) && !excluding.contains(id))
            .map(|(id, _)| *id);
        Ok(found.and_then(|id| {
            inner.touch(&id);
            inner.get(&id).map(|s| s.loc.clone())
        }))
    }

    /// The nearest good record strictly before `x`, skipping `excluding`.
    /// The local vnode is a candidate like any other.
    pub fn closest_predecessor(&self, x: Did, excluding: &[Did]) -> Result<Option<Location>> {
        let mut inner = self.lock()?;
        let found = inner
            .counter_clockwise_before(x)
            .find(|(id, i)| inner.good_at(**i) && !excluding.contains(id))
            .map(|(id, _)| *id);
        Ok(found.and_then(|id| {
            inner.touch(&id);
            inner.get(&id).map(|s| s.loc.clone())
        }))
    }

    /// Up to `n` good records clockwise strictly after `x`, nearest first.
    pub fn successors_of(&self, x: Did, n: usize) -> Result<Vec<Location>> {
        let inner = self.lock()?;
        Ok(inner
            .clockwise_after(x)
            .filter_map(|(_, i)| inner.loc(*i).filter(|l| l.is_good()).cloned())
            .take(n)
            .collect())
    }

    /// Up to `n` good records counter-clockwise strictly before `x`, nearest first.
    pub fn predecessors_of(&self, x: Did, n: usize) -> Result<Vec<Location>> {
        let inner = self.lock()?;
        Ok(inner
            .counter_clockwise_before(x)
            .filter_map(|(_, i)| inner.loc(*i).filter(|l| l.is_good()).cloned())
            .take(n)
            .collect())
    }

    /// Every record in ring order starting at the local vnode.
    pub fn get_node_list(&self) -> Result<Vec<Location>> {
        let inner = self.lock()?;
        let mut ret: Vec<Location> = inner.get(&self.myid).map(|s| s.loc.clone()).into_iter().collect();
        ret.extend(
            inner
                .clockwise_after(self.myid)
                .filter_map(|(_, i)| inner.loc(*i).cloned()),
        );
        Ok(ret)
    }

    /// Record the outcome of an RPC to `id`.
    /// A failure marks the record dead and schedules a re-check. It never removes it.
    pub fn mark_rpc_result(&self, id: Did, ok: bool, rtt: Option<Duration>) -> Result<()> {
        let initial = self.check_dead_initial;
        let mut inner = self.lock()?;
        let Some(slot) = inner.get_mut(&id) else {
            return Ok(());
        };
        let loc = &mut slot.loc;
        loc.rpc_count += 1;
        if ok {
            let now = Utc::now();
            if !loc.alive {
                loc.first_seen = now;
            }
            loc.alive = true;
            loc.dead_check = None;
            loc.last_update = now;
            loc.age = (now - loc.first_seen).to_std().unwrap_or_default();
            if let Some(rtt) = rtt {
                let sample = rtt.as_secs_f64() * 1000.0;
                loc.rtt_ms = Some(match loc.rtt_ms {
                    Some(old) => 0.875 * old + 0.125 * sample,
                    None => sample,
                });
            }
        } else if id != self.myid {
            if loc.alive {
                tracing::debug!("[location] {} marked dead", id);
            }
            loc.alive = false;
            if loc.dead_check.is_none() {
                loc.dead_check = Some(DeadCheck {
                    period: initial,
                    due: Instant::now() + initial,
                });
            }
        }
        Ok(())
    }

    /// Dead records whose re-check is due at `now`.
    pub fn due_dead_checks(&self, now: Instant) -> Result<Vec<NodeInfo>> {
        let inner = self.lock()?;
        Ok(inner
            .slots
            .iter()
            .flatten()
            .filter(|s| matches!(&s.loc.dead_check, Some(c) if c.due <= now))
            .map(|s| s.loc.info.clone())
            .collect())
    }

    /// A re-check of `id` failed: double its period, and evict the record once the
    /// period passes the ceiling. Pinned records stay at the ceiling instead.
    /// Returns true if the record was evicted.
    pub fn dead_check_failed(&self, id: Did, now: Instant) -> Result<bool> {
        let max = self.check_dead_max;
        let mut inner = self.lock()?;
        let period = match inner.get(&id).and_then(|s| s.loc.dead_check.as_ref()) {
            Some(c) => c.period * 2,
            None => return Ok(false),
        };
        if period > max {
            let keep = inner.protected(self.myid);
            if !keep.contains(&id) {
                tracing::info!("[location] {} dead for too long, evicted", id);
                inner.remove(&id);
                return Ok(true);
            }
        }
        let period = period.min(max);
        if let Some(slot) = inner.get_mut(&id) {
            slot.loc.dead_check = Some(DeadCheck {
                period,
                due: now + period,
            });
        }
        Ok(false)
    }

    /// Protect a window around `id` from eviction. Pins on the same id accumulate.
    pub fn pin(&self, id: Did, pin: Pin) -> Result<()> {
        let mut inner = self.lock()?;
        let w = inner.pins.entry(id).or_default();
        match pin {
            Pin::Succ => w.succs = w.succs.max(1),
            Pin::Pred => w.preds = w.preds.max(1),
            Pin::SuccList(n) => w.succs = w.succs.max(n),
            Pin::PredList(n) => w.preds = w.preds.max(n),
        }
        Ok(())
    }

    /// Drop every pin on `id`.
    pub fn unpin(&self, id: Did) -> Result<()> {
        self.lock()?.pins.remove(&id);
        Ok(())
    }

    /// Start challenging `id`. Concurrent callers are coalesced behind one leader.
    pub fn begin_challenge(&self, id: Did) -> Result<ChallengeTicket> {
        let mut inner = self.lock()?;
        match inner.challenges.get_mut(&id) {
            Some(waiters) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Ok(ChallengeTicket::Follower(rx))
            }
            None => {
                inner.challenges.insert(id, vec![]);
                Ok(ChallengeTicket::Leader)
            }
        }
    }

    /// Finish the challenge of `id`, update its record and wake every follower.
    pub fn finish_challenge(&self, id: Did, authenticated: bool) -> Result<()> {
        let waiters = {
            let mut inner = self.lock()?;
            if let Some(slot) = inner.get_mut(&id) {
                slot.loc.authenticated = authenticated;
            }
            inner.challenges.remove(&id).unwrap_or_default()
        };
        for w in waiters {
            let _ = w.send(authenticated);
        }
        Ok(())
    }

    /// Forget `id` unless it is protected. Returns true if removed.
    pub fn remove(&self, id: Did) -> Result<bool> {
        if id == self.myid {
            return Ok(false);
        }
        let mut inner = self.lock()?;
        if inner.protected(self.myid).contains(&id) {
            return Ok(false);
        }
        Ok(inner.remove(&id).is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn info(n: u32) -> NodeInfo {
        NodeInfo::with_id(Did::from(n), &format!("127.0.0.1:{}", 10000 + n), 0)
    }

    pub(crate) fn good(cache: &LocationCache, n: u32) -> LocationRef {
        let h = cache.insert(info(n)).unwrap();
        cache.finish_challenge(Did::from(n), true).unwrap();
        h
    }

    fn ids(locs: &[Location]) -> Vec<Did> {
        locs.iter().map(|l| l.id()).collect()
    }

    #[test]
    fn test_idempotent_insert() {
        let cache = LocationCache::new(info(0), 16);
        good(&cache, 10);
        cache.mark_rpc_result(Did::from(10u32), true, None).unwrap();
        cache.mark_rpc_result(Did::from(10u32), false, None).unwrap();
        assert!(!cache.is_good(Did::from(10u32)).unwrap());

        cache.insert(info(10)).unwrap();
        assert_eq!(cache.size().unwrap(), 2);
        let loc = cache.lookup(Did::from(10u32)).unwrap().unwrap();
        assert_eq!(loc.rpc_count, 2);
        assert!(loc.alive);
        assert!(loc.authenticated);
        assert!(loc.dead_check.is_none());
    }

    #[test]
    fn test_changed_address_drops_authentication() {
        let cache = LocationCache::new(info(0), 16);
        good(&cache, 10);
        let mut moved = info(10);
        moved.addr = "10.0.0.1:1".to_string();
        cache.insert(moved).unwrap();
        assert!(!cache.is_good(Did::from(10u32)).unwrap());
    }

    #[test]
    fn test_closest_successor_and_predecessor() {
        let cache = LocationCache::new(info(50), 16);
        for n in [10, 20, 30, 70, 90] {
            good(&cache, n);
        }
        // 40 is known but not authenticated
        cache.insert(info(40)).unwrap();

        let s = |x: u32, ex: &[Did]| cache.closest_successor(Did::from(x), ex).unwrap().unwrap().id();
        let p = |x: u32, ex: &[Did]| cache.closest_predecessor(Did::from(x), ex).unwrap().unwrap().id();

        assert_eq!(s(20, &[]), Did::from(20u32));
        assert_eq!(s(21, &[]), Did::from(30u32));
        assert_eq!(s(31, &[]), Did::from(50u32));
        assert_eq!(s(91, &[]), Did::from(10u32));
        assert_eq!(s(21, &[Did::from(30u32)]), Did::from(50u32));

        assert_eq!(p(20, &[]), Did::from(10u32));
        assert_eq!(p(50, &[]), Did::from(30u32));
        assert_eq!(p(5, &[]), Did::from(90u32));
        assert_eq!(p(95, &[Did::from(90u32), Did::from(70u32)]), Did::from(50u32));

        cache.mark_rpc_result(Did::from(30u32), false, None).unwrap();
        assert_eq!(s(21, &[]), Did::from(50u32));
        assert_eq!(p(50, &[]), Did::from(20u32));
    }

    #[test]
    fn test_ring_closure() {
        let cache = LocationCache::new(info(500), 64);
        let members = [3u32, 77, 150, 151, 420, 999, 4096, 70000];
        for n in members {
            good(&cache, n);
        }
        let start = Did::from(12345u32);
        let first = cache.closest_successor(start, &[]).unwrap().unwrap().id();
        let mut seen = vec![first];
        let mut cur = first;
        loop {
            cur = cache.closest_successor(cur.inc(), &[]).unwrap().unwrap().id();
            if cur == first {
                break;
            }
            seen.push(cur);
        }
        assert_eq!(seen.len(), members.len() + 1);
        let unique: HashSet<Did> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len());
    }

    #[test]
    fn test_successors_of_wraps() {
        let cache = LocationCache::new(info(50), 16);
        for n in [10, 20, 70, 90] {
            good(&cache, n);
        }
        let succs = cache.successors_of(Did::from(50u32), 16).unwrap();
        assert_eq!(ids(&succs), vec![70u32, 90, 10, 20].into_iter().map(Did::from).collect::<Vec<_>>());
        let preds = cache.predecessors_of(Did::from(50u32), 2).unwrap();
        assert_eq!(ids(&preds), vec![Did::from(20u32), Did::from(10u32)]);
    }

    #[test]
    fn test_eviction_respects_pins() {
        let cache = LocationCache::new(info(0), 8);
        cache.pin(Did::from(0u32), Pin::SuccList(3)).unwrap();
        cache.pin(Did::from(0u32), Pin::Pred).unwrap();
        for n in 1..=40u32 {
            good(&cache, n * 100);
        }
        assert!(cache.size().unwrap() <= 8);
        // three successors of self and the predecessor are resident
        for n in [100u32, 200, 300, 4000] {
            assert!(cache.cached(Did::from(n)).unwrap(), "{} evicted", n);
        }
        let succs = cache.successors_of(Did::from(0u32), 3).unwrap();
        assert_eq!(succs.len(), 3);
    }

    #[test]
    fn test_eviction_prefers_bad_records() {
        let cache = LocationCache::new(info(0), 4);
        good(&cache, 1);
        good(&cache, 2);
        cache.insert(info(3)).unwrap();
        // 3 is unauthenticated, 1 is the least recently used good record
        good(&cache, 4);
        assert!(!cache.cached(Did::from(3u32)).unwrap());
        assert!(cache.cached(Did::from(1u32)).unwrap());
    }

    #[test]
    fn test_challenge_is_never_evicted() {
        let cache = LocationCache::new(info(0), 2);
        cache.insert(info(1)).unwrap();
        assert!(matches!(cache.begin_challenge(Did::from(1u32)).unwrap(), ChallengeTicket::Leader));
        good(&cache, 2);
        assert!(cache.cached(Did::from(1u32)).unwrap());
        assert_eq!(cache.size().unwrap(), 3);
    }

    #[test]
    fn test_handle_invalidated_on_eviction() {
        let cache = LocationCache::new(info(0), 2);
        let h = cache.insert(info(1)).unwrap();
        assert!(cache.resolve(&h).unwrap().is_some());
        cache.insert(info(2)).unwrap();
        assert!(cache.resolve(&h).unwrap().is_none());
        // the freed slot is reused, the old handle still fails
        let h3 = cache.insert(info(3)).unwrap();
        assert!(cache.resolve(&h).unwrap().is_none());
        assert!(cache.resolve(&h3).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_challenge_coalescing() {
        let cache = LocationCache::new(info(0), 16);
        cache.insert(info(7)).unwrap();
        let id = Did::from(7u32);
        assert!(matches!(cache.begin_challenge(id).unwrap(), ChallengeTicket::Leader));
        let ChallengeTicket::Follower(rx1) = cache.begin_challenge(id).unwrap() else {
            panic!("second caller must follow");
        };
        let ChallengeTicket::Follower(rx2) = cache.begin_challenge(id).unwrap() else {
            panic!("third caller must follow");
        };
        cache.finish_challenge(id, true).unwrap();
        assert!(rx1.await.unwrap());
        assert!(rx2.await.unwrap());
        assert!(cache.is_good(id).unwrap());
        assert!(matches!(cache.begin_challenge(id).unwrap(), ChallengeTicket::Leader));
    }

    #[test]
    fn test_check_dead_backoff() {
        let cache = LocationCache::new(info(0), 16)
            .with_check_dead(Duration::from_secs(60), Duration::from_secs(3600));
        good(&cache, 9);
        let id = Did::from(9u32);
        cache.mark_rpc_result(id, false, None).unwrap();
        let now = Instant::now();
        assert!(cache.due_dead_checks(now).unwrap().is_empty());
        assert_eq!(cache.due_dead_checks(now + Duration::from_secs(61)).unwrap().len(), 1);

        let mut periods = vec![];
        let mut evicted = false;
        for _ in 0..10 {
            evicted = cache.dead_check_failed(id, now).unwrap();
            if evicted {
                break;
            }
            periods.push(cache.lookup(id).unwrap().unwrap().dead_check.unwrap().period.as_secs());
        }
        assert_eq!(periods, vec![120, 240, 480, 960, 1920]);
        assert!(evicted);
        assert!(!cache.cached(id).unwrap());
    }

    #[test]
    fn test_rpc_success_revives() {
        let cache = LocationCache::new(info(0), 16);
        good(&cache, 9);
        let id = Did::from(9u32);
        cache.mark_rpc_result(id, false, None).unwrap();
        cache
            .mark_rpc_result(id, true, Some(Duration::from_millis(10)))
            .unwrap();
        let loc = cache.lookup(id).unwrap().unwrap();
        assert!(loc.is_good());
        assert!(loc.dead_check.is_none());
        assert_eq!(loc.rtt_ms, Some(10.0));
    }
}
