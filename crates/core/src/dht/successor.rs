//! Successor list of a vnode.
//!
//! The list is never stored: it is the window of good records following the local
//! vnode in the [LocationCache], kept resident by a pin on the local id. The
//! maintenance round fetches the successor list of the first successor and merges
//! it into the cache, see [SuccessorList::merge_plan].
#![warn(missing_docs)]
use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;

use num_bigint::BigUint;

use super::did::Did;
use super::location::LocationCache;
use super::location::NodeInfo;
use super::location::Pin;
use super::stabilization::RoundState;
use super::types::RoutingTable;
use crate::consts::NBIT;
use crate::error::Error;
use crate::error::Result;

/// What a maintenance round must do after comparing the local list with the one of
/// the successor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergePlan {
    /// Local entries the successor does not know about. They must answer a ping to
    /// stay.
    pub ping: Vec<NodeInfo>,
    /// Entries of the successor unknown here. They are learnt and challenged.
    pub learn: Vec<NodeInfo>,
}

impl MergePlan {
    /// Nothing to do.
    pub fn is_empty(&self) -> bool {
        self.ping.is_empty() && self.learn.is_empty()
    }
}

/// Successor list view over the location cache.
pub struct SuccessorList {
    me: NodeInfo,
    nsucc: usize,
    locations: Arc<LocationCache>,
    oldsucc: Mutex<Option<Did>>,
    /// Round flags of the maintainer.
    pub round: RoundState,
}

impl SuccessorList {
    /// Create the list of `me`, keeping `nsucc` successors resident.
    pub fn new(me: NodeInfo, nsucc: usize, locations: Arc<LocationCache>) -> Result<Self> {
        locations.pin(me.id, Pin::SuccList(nsucc))?;
        Ok(Self {
            me,
            nsucc,
            locations,
            oldsucc: Mutex::new(None),
            round: RoundState::new(),
        })
    }

    /// Replication factor.
    pub fn nsucc(&self) -> usize {
        self.nsucc
    }

    /// `min(nsucc, usable - 1)`.
    pub fn num_succ(&self) -> Result<usize> {
        let usable = self.locations.usable_nodes()?;
        Ok(self.nsucc.min(usable.saturating_sub(1)))
    }

    /// The first successor, or the local vnode when alone.
    pub fn succ(&self) -> Result<NodeInfo> {
        Ok(self
            .locations
            .closest_successor(self.me.id.inc(), &[])?
            .map(|l| l.info)
            .unwrap_or_else(|| self.me.clone()))
    }

    /// The successors, nearest first, never including the local vnode.
    pub fn succs(&self) -> Result<Vec<NodeInfo>> {
        let n = self.num_succ()?;
        Ok(self
            .locations
            .successors_of(self.me.id, n)?
            .into_iter()
            .map(|l| l.info)
            .collect())
    }

    /// The local vnode followed by its successors, as sent to peers.
    pub fn reply_list(&self) -> Result<Vec<NodeInfo>> {
        let mut ret = vec![self.me.clone()];
        ret.extend(self.succs()?);
        Ok(ret)
    }

    /// Estimated ring size: `num_succ * 2^160 / dist(self, last successor)`.
    pub fn estimate_nnodes(&self) -> Result<u64> {
        let succs = self.succs()?;
        let Some(last) = succs.last() else {
            return Ok(1);
        };
        let d = self.me.id.distance(last.id);
        if d == BigUint::from(0u8) {
            return Ok(1);
        }
        let n = (BigUint::from(succs.len()) << NBIT) / d;
        Ok(u64::try_from(&n).unwrap_or(u64::MAX).max(1))
    }

    /// The successor seen by the last continuous round.
    pub fn oldsucc(&self) -> Result<Option<Did>> {
        Ok(*self.oldsucc.lock().map_err(|_| Error::RoutingLockError)?)
    }

    /// Remember the successor notified by the last continuous round.
    pub fn set_oldsucc(&self, id: Did) -> Result<()> {
        *self.oldsucc.lock().map_err(|_| Error::RoutingLockError)? = Some(id);
        Ok(())
    }

    /// Compare the local successors with `remote`, the list replied by the first
    /// successor (itself first). The last remote entry is ignored, it lies past the
    /// window this vnode is responsible for.
    pub fn merge_plan(&self, remote: &[NodeInfo]) -> Result<MergePlan> {
        let local = self.succs()?;
        let me = self.me.id;
        let keep = remote.len().saturating_sub(1).max(1).min(remote.len());
        let remote: Vec<&NodeInfo> = remote[..keep].iter().filter(|n| n.id != me).collect();

        let mut plan = MergePlan::default();
        let (mut i, mut j) = (0, 0);
        while i < local.len() && j < remote.len() {
            let (l, r) = (&local[i], remote[j]);
            if l.id == r.id {
                i += 1;
                j += 1;
            } else if l.id.between(me, r.id) {
                plan.ping.push(l.clone());
                i += 1;
            } else {
                plan.learn.push(r.clone());
                j += 1;
            }
        }
        plan.ping.extend(local[i..].iter().cloned());
        for r in &remote[j..] {
            if !self.locations.is_good(r.id)? {
                plan.learn.push((*r).clone());
            }
        }
        Ok(plan)
    }
}

impl RoutingTable for SuccessorList {
    fn closest_predecessor(&self, x: Did, failed: &[Did]) -> Result<NodeInfo> {
        Ok(self
            .succs()?
            .into_iter()
            .filter(|n| n.id.between(self.me.id, x) && !failed.contains(&n.id))
            .last()
            .unwrap_or_else(|| self.me.clone()))
    }

    fn closest_successor(&self, x: Did) -> Result<NodeInfo> {
        Ok(self
            .locations
            .closest_successor(x, &[])?
            .map(|l| l.info)
            .unwrap_or_else(|| self.me.clone()))
    }

    fn nodes(&self) -> Result<Vec<NodeInfo>> {
        self.reply_list()
    }
}

impl fmt::Display for SuccessorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.me.id)?;
        match self.succs() {
            Ok(succs) => {
                for (i, s) in succs.iter().enumerate() {
                    writeln!(f, "succ {}: {} {}", i + 1, s.id, s.addr)?;
                }
            }
            Err(e) => writeln!(f, "unavailable: {e}")?,
        }
        Ok(())
    }
}
