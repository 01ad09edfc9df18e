//! Routing table seam shared by the successor list and the finger tables.
#![warn(missing_docs)]
use super::did::Did;
use super::location::NodeInfo;
use super::successor::SuccessorList;
use crate::error::Result;

/// A source of next hops.
///
/// Implementors never cache a finger snapshot: every answer is recomputed from the
/// [LocationCache](super::LocationCache), so a dead or evicted record stops being
/// returned as soon as the cache learns about it.
pub trait RoutingTable: Send + Sync {
    /// The best known node strictly between the local vnode and `x`, skipping
    /// `failed`. Falls back to the local vnode.
    fn closest_predecessor(&self, x: Did, failed: &[Did]) -> Result<NodeInfo>;

    /// The best known node at or after `x`.
    fn closest_successor(&self, x: Did) -> Result<NodeInfo>;

    /// Distinct nodes of the table, the local vnode first.
    fn nodes(&self) -> Result<Vec<NodeInfo>>;
}

/// Combines a finger table with the successor list: the successor list wins when
/// its candidate is at least as close to the key as the finger's.
pub struct FingerRoute<'a> {
    me: &'a NodeInfo,
    table: &'a dyn RoutingTable,
    succs: &'a SuccessorList,
}

impl<'a> FingerRoute<'a> {
    /// Borrow a table and a successor list of the vnode `me`.
    pub fn new(me: &'a NodeInfo, table: &'a dyn RoutingTable, succs: &'a SuccessorList) -> Self {
        Self { me, table, succs }
    }
}

impl RoutingTable for FingerRoute<'_> {
    fn closest_predecessor(&self, x: Did, failed: &[Did]) -> Result<NodeInfo> {
        let f = self.table.closest_predecessor(x, failed)?;
        let u = self.succs.closest_predecessor(x, failed)?;
        if f.id == self.me.id {
            return Ok(u);
        }
        if u.id.between(self.me.id, f.id) {
            Ok(f)
        } else {
            Ok(u)
        }
    }

    fn closest_successor(&self, x: Did) -> Result<NodeInfo> {
        self.table.closest_successor(x)
    }

    fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let mut ret = self.table.nodes()?;
        for n in self.succs.succs()? {
            if !ret.iter().any(|r| r.id == n.id) {
                ret.push(n);
            }
        }
        Ok(ret)
    }
}
