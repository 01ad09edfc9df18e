//! The predecessor of a vnode.
//! Like the successor list it is derived from the [LocationCache]: the predecessor is
//! the closest good record before the local id. A `Notify` only has to insert the
//! candidate for it to take over.
#![warn(missing_docs)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use super::did::Did;
use super::location::LocationCache;
use super::location::NodeInfo;
use super::location::Pin;
use super::stabilization::RoundState;
use crate::error::Error;
use crate::error::Result;

/// Tracks the single immediate predecessor.
pub struct PredecessorTracker {
    me: NodeInfo,
    locations: Arc<LocationCache>,
    oldpred: Mutex<Option<Did>>,
    gotfingers: AtomicBool,
    /// Round flags of the maintainer.
    pub round: RoundState,
}

impl PredecessorTracker {
    /// Create the tracker of `me` and pin its predecessor.
    pub fn new(me: NodeInfo, locations: Arc<LocationCache>) -> Result<Self> {
        locations.pin(me.id, Pin::Pred)?;
        Ok(Self {
            me,
            locations,
            oldpred: Mutex::new(None),
            gotfingers: AtomicBool::new(false),
            round: RoundState::new(),
        })
    }

    /// The predecessor, or the local vnode when none is known.
    pub fn pred(&self) -> Result<NodeInfo> {
        Ok(self
            .locations
            .closest_predecessor(self.me.id, &[])?
            .map(|l| l.info)
            .unwrap_or_else(|| self.me.clone()))
    }

    /// Whether `candidate` would replace the current predecessor: it must lie strictly
    /// between the predecessor and the local vnode. Anything is accepted while the
    /// predecessor is unknown.
    pub fn accepts(&self, candidate: &NodeInfo) -> Result<bool> {
        if candidate.id == self.me.id {
            return Ok(false);
        }
        let pred = self.pred()?;
        if pred.id == self.me.id || !self.locations.is_good(pred.id)? {
            return Ok(true);
        }
        Ok(candidate.id.between(pred.id, self.me.id))
    }

    /// Compare the predecessor with the one seen by the previous round and record
    /// the result as the stability of the maintainer.
    pub fn check_stable(&self) -> Result<bool> {
        let current = self.pred()?.id;
        let mut old = self.oldpred.lock().map_err(|_| Error::RoutingLockError)?;
        let stable = *old == Some(current);
        *old = Some(current);
        self.round.set_stable(stable);
        Ok(stable)
    }

    /// True exactly once, the first time a predecessor other than the local vnode is
    /// known. Its fingers are then fetched to warm the cache.
    pub fn first_pred(&self, pred: &NodeInfo) -> bool {
        pred.id != self.me.id && !self.gotfingers.swap(true, Ordering::SeqCst)
    }
}
