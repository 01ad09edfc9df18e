//! Proximity neighbor selection on top of the basic [FingerTable].
//!
//! For finger `i` every node in `[start(i), start(i + 1))` is a valid next hop. The
//! maintenance round asks the basic finger for its successor list, learns the
//! candidates of that interval, and keeps the one with the lowest network distance as
//! the *fast* finger `i`. Reads prefer a good fast finger; maintenance of the basic
//! table is unchanged.
#![warn(missing_docs)]
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::did::Did;
use super::finger::FingerTable;
use super::location::LocationCache;
use super::location::LocationRef;
use super::location::NodeInfo;
use super::stabilization::RoundState;
use super::types::RoutingTable;
use crate::consts::NBIT;
use crate::error::Error;
use crate::error::Result;

struct PnsState {
    next: usize,
    fast: Vec<Option<LocationRef>>,
}

/// Finger table with proximity neighbor selection.
pub struct PnsFingerTable {
    me: NodeInfo,
    locations: Arc<LocationCache>,
    basic: Arc<FingerTable>,
    state: Mutex<PnsState>,
    /// Round flags of the maintainer.
    pub round: RoundState,
}

impl PnsFingerTable {
    /// Layer proximity selection over `basic`.
    pub fn new(me: NodeInfo, locations: Arc<LocationCache>, basic: Arc<FingerTable>) -> Self {
        Self {
            me,
            locations,
            basic,
            state: Mutex::new(PnsState {
                next: 1,
                fast: vec![None; NBIT],
            }),
            round: RoundState::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<PnsState>> {
        self.state.lock().map_err(|_| Error::RoutingLockError)
    }

    /// The basic table.
    pub fn basic(&self) -> &FingerTable {
        &self.basic
    }

    /// Next index worth a round, with its basic finger. Indices sharing the basic
    /// finger of the previous index are skipped, so is the local vnode.
    pub fn next_index(&self) -> Result<Option<(usize, NodeInfo)>> {
        let start = self.lock()?.next;
        let mut i = start;
        let mut prev = self.basic.finger(i.saturating_sub(1))?.id;
        for _ in 0..NBIT {
            if i == 0 || i >= NBIT {
                i = 1;
                prev = self.basic.finger(0)?.id;
            }
            let f = self.basic.finger(i)?;
            if f.id != self.me.id && f.id != prev {
                self.lock()?.next = i + 1;
                return Ok(Some((i, f)));
            }
            prev = f.id;
            i += 1;
        }
        Ok(None)
    }

    /// Nodes of `list` that are valid substitutes for finger `i`.
    pub fn candidates(&self, i: usize, list: &[NodeInfo]) -> Vec<NodeInfo> {
        let (lo, hi) = (self.basic.start(i), self.basic.end(i));
        list.iter()
            .filter(|n| n.id != self.me.id && n.id.between_left_incl(lo, hi))
            .cloned()
            .collect()
    }

    /// Among the good `candidates`, keep the closest to the local vnode as fast
    /// finger `i`. Returns the choice.
    pub fn select(&self, i: usize, candidates: &[NodeInfo]) -> Result<Option<NodeInfo>> {
        let mut best: Option<(f32, LocationRef, NodeInfo)> = None;
        for c in candidates {
            let Some(loc) = self.locations.lookup(c.id)? else {
                continue;
            };
            if !loc.is_good() {
                continue;
            }
            let d = loc.distance_to(&self.me.coords);
            if best.as_ref().map(|(bd, _, _)| d < *bd).unwrap_or(true) {
                if let Some(h) = self.locations.handle(c.id)? {
                    best = Some((d, h, loc.info));
                }
            }
        }
        let mut st = self.lock()?;
        match best {
            Some((_, h, info)) => {
                st.fast[i % NBIT] = Some(h);
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Fast finger `i` if it is still resident and good.
    pub fn fast_finger(&self, i: usize) -> Result<Option<NodeInfo>> {
        let h = self.lock()?.fast[i % NBIT];
        let Some(h) = h else {
            return Ok(None);
        };
        Ok(self
            .locations
            .resolve(&h)?
            .filter(|l| l.is_good())
            .map(|l| l.info))
    }

    /// Fast finger `i`, else basic finger `i`.
    pub fn finger(&self, i: usize) -> Result<NodeInfo> {
        match self.fast_finger(i)? {
            Some(f) => Ok(f),
            None => self.basic.finger(i),
        }
    }
}

impl RoutingTable for PnsFingerTable {
    fn closest_predecessor(&self, x: Did, failed: &[Did]) -> Result<NodeInfo> {
        for i in (0..NBIT).rev() {
            if let Some(f) = self.fast_finger(i)? {
                if f.id.between(self.me.id, x) && !failed.contains(&f.id) {
                    return Ok(f);
                }
            }
            let n = self.basic.finger(i)?;
            if n.id.between(self.me.id, x) && !failed.contains(&n.id) {
                return Ok(n);
            }
        }
        Ok(self.me.clone())
    }

    fn closest_successor(&self, x: Did) -> Result<NodeInfo> {
        self.basic.closest_successor(x)
    }

    fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut ret = vec![self.me.clone()];
        for i in 0..NBIT {
            let f = self.finger(i)?;
            if !ret.iter().any(|n| n.id == f.id) {
                ret.push(f);
            }
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use num_bigint::BigUint;

    use super::*;

    fn did(n: u128) -> Did {
        Did::from(BigUint::from(n))
    }

    fn node(n: u128) -> NodeInfo {
        NodeInfo::with_id(did(n), &format!("10.0.0.2:{n}"), 0)
    }

    fn add(cache: &LocationCache, n: u128, rtt_ms: u64) {
        cache.insert(node(n)).unwrap();
        cache.finish_challenge(did(n), true).unwrap();
        cache
            .mark_rpc_result(did(n), true, Some(Duration::from_millis(rtt_ms)))
            .unwrap();
    }

    fn table() -> (Arc<LocationCache>, PnsFingerTable) {
        let cache = Arc::new(LocationCache::new(node(0), 400));
        let basic = Arc::new(FingerTable::new(node(0), cache.clone()).unwrap());
        let pns = PnsFingerTable::new(node(0), cache.clone(), basic);
        (cache, pns)
    }

    #[test]
    fn test_candidates_stay_in_the_finger_interval() {
        let (_, pns) = table();
        // finger 4 covers [16, 32)
        let list: Vec<NodeInfo> = [0u128, 15, 16, 20, 31, 32, 40].iter().map(|n| node(*n)).collect();
        let c: Vec<Did> = pns.candidates(4, &list).iter().map(|n| n.id).collect();
        assert_eq!(c, vec![did(16), did(20), did(31)]);
    }

    #[test]
    fn test_select_prefers_the_nearest() {
        let (cache, pns) = table();
        add(&cache, 17, 80);
        add(&cache, 20, 5);
        add(&cache, 30, 40);
        add(&cache, 1000, 1);

        assert_eq!(pns.basic().finger(4).unwrap().id, did(17));
        let picked = pns
            .select(4, &[node(17), node(20), node(30)])
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, did(20));
        assert_eq!(pns.finger(4).unwrap().id, did(20));
        assert_eq!(pns.closest_predecessor(did(25), &[]).unwrap().id, did(20));
        assert_eq!(
            pns.closest_predecessor(did(25), &[did(20)]).unwrap().id,
            did(17)
        );

        // a dead fast finger falls back to the basic one
        cache.mark_rpc_result(did(20), false, None).unwrap();
        assert_eq!(pns.finger(4).unwrap().id, did(17));
    }

    #[test]
    fn test_next_index_skips_duplicates() {
        let (cache, pns) = table();
        add(&cache, 1, 1);
        add(&cache, 8, 1);
        // basic fingers: 0 -> 1, 1..=3 -> 8, others -> self
        assert_eq!(pns.next_index().unwrap().map(|(i, _)| i), Some(1));
        assert_eq!(pns.next_index().unwrap().map(|(i, _)| i), Some(1));
    }
}
