//! Basic finger table.
//!
//! Finger `i` is the closest good successor of `self + 2^i`. The table stores no
//! node: every read goes to the [LocationCache], and each start is pinned so that
//! its successor stays resident. What the table does keep is the bookkeeping of
//! the maintenance round: the index checked next, the finger seen at the last
//! check of every index, and whether the last two full passes saw a change.
#![warn(missing_docs)]
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use super::did::Did;
use super::location::LocationCache;
use super::location::NodeInfo;
use super::location::Pin;
use super::stabilization::RoundState;
use super::types::RoutingTable;
use crate::consts::NBIT;
use crate::error::Error;
use crate::error::Result;

struct FingerState {
    next: usize,
    seen: Vec<Option<Did>>,
    pass_stable: bool,
    last_pass_stable: bool,
}

/// The finger table of a vnode.
pub struct FingerTable {
    me: NodeInfo,
    locations: Arc<LocationCache>,
    starts: Vec<Did>,
    state: Mutex<FingerState>,
    /// Round flags of the maintainer.
    pub round: RoundState,
}

impl FingerTable {
    /// Create the table of `me`, pinning every finger start.
    pub fn new(me: NodeInfo, locations: Arc<LocationCache>) -> Result<Self> {
        let starts: Vec<Did> = (0..NBIT).map(|i| me.id.successor_id(i)).collect();
        for s in &starts {
            locations.pin(*s, Pin::Succ)?;
        }
        Ok(Self {
            me,
            locations,
            starts,
            state: Mutex::new(FingerState {
                next: 0,
                seen: vec![None; NBIT],
                pass_stable: false,
                last_pass_stable: false,
            }),
            round: RoundState::new(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<FingerState>> {
        self.state.lock().map_err(|_| Error::RoutingLockError)
    }

    /// `self + 2^i`.
    pub fn start(&self, i: usize) -> Did {
        self.starts[i % NBIT]
    }

    /// Upper bound of the interval of finger `i`: the next start, or the local id for
    /// the last finger.
    pub fn end(&self, i: usize) -> Did {
        if i + 1 < NBIT {
            self.starts[i + 1]
        } else {
            self.me.id
        }
    }

    /// Finger `i`, the local vnode when nothing better is known.
    pub fn finger(&self, i: usize) -> Result<NodeInfo> {
        Ok(self
            .locations
            .closest_successor(self.start(i), &[])?
            .map(|l| l.info)
            .unwrap_or_else(|| self.me.clone()))
    }

    /// Index to check in this round. Wrapping around ends a pass. Index 0 is the
    /// first successor and is left to the successor list.
    pub fn next_index(&self) -> Result<usize> {
        let mut st = self.lock()?;
        let mut i = st.next % NBIT;
        if i == 0 {
            st.last_pass_stable = st.pass_stable;
            st.pass_stable = true;
            i = 1;
        }
        st.next = i;
        Ok(i)
    }

    /// Current finger `i` and whether it differs from the last check of `i`.
    pub fn check(&self, i: usize) -> Result<(NodeInfo, bool)> {
        let f = self.finger(i)?;
        let mut st = self.lock()?;
        let changed = st.seen[i % NBIT] != Some(f.id);
        st.seen[i % NBIT] = Some(f.id);
        Ok((f, changed))
    }

    /// The current pass saw a change or a failure.
    pub fn mark_unstable(&self) -> Result<()> {
        self.lock()?.pass_stable = false;
        self.round.set_stable(false);
        Ok(())
    }

    /// Move past finger `i` and every following index sharing its node.
    pub fn advance(&self, i: usize) -> Result<()> {
        let f = self.finger(i)?.id;
        let mut next = i + 1;
        while next < NBIT && self.finger(next)?.id == f {
            next += 1;
        }
        let mut st = self.lock()?;
        st.next = next;
        let stable = st.pass_stable && st.last_pass_stable;
        drop(st);
        self.round.set_stable(stable);
        Ok(())
    }

    /// The last two passes saw no change.
    pub fn isstable(&self) -> bool {
        self.lock()
            .map(|st| st.pass_stable && st.last_pass_stable)
            .unwrap_or(false)
    }
}

impl RoutingTable for FingerTable {
    fn closest_predecessor(&self, x: Did, failed: &[Did]) -> Result<NodeInfo> {
        for i in (0..NBIT).rev() {
            let n = self.finger(i)?;
            if n.id.between(self.me.id, x) && !failed.contains(&n.id) {
                return Ok(n);
            }
        }
        Ok(self.me.clone())
    }

    fn closest_successor(&self, x: Did) -> Result<NodeInfo> {
        Ok(self
            .locations
            .closest_successor(x, &[])?
            .map(|l| l.info)
            .unwrap_or_else(|| self.me.clone()))
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
