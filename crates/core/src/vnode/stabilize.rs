//! Maintenance rounds of a [Vnode], and the [Maintainer]s that hand them to the
//! [StabilizeManager](crate::dht::StabilizeManager).
//!
//! | maintainer  | continuous         | backoff                |
//! |-------------|--------------------|------------------------|
//! | successor   | successor and notify |                      |
//! | succlist    |                    | successor list merge   |
//! | predecessor | predecessor check  |                        |
//! | fingers     |                    | one finger, one PNS slot |
//! | locations   |                    | dead checks and sweeps |
//!
//! Round failures are logged and only leave the maintainer unstable.

use std::sync::Weak;
use std::time::Instant;

use async_trait::async_trait;

use super::Vnode;
use crate::dht::Cadence;
use crate::dht::NodeInfo;
use crate::dht::RoundState;
use crate::dht::Stabilizable;
use crate::error::Result;
use crate::message::GetFingersExtSend;
use crate::message::GetFingersSend;
use crate::message::GetSuccessorSend;

impl Vnode {
    /// Ask the successor for its predecessor, adopt it when it sits in between, and
    /// notify the successor. Stable when nothing moved.
    pub(crate) async fn stabilize_succ(&self) -> Result<bool> {
        let me = self.info().clone();
        let succ = self.successors.succ()?;
        if succ.id == me.id {
            return Ok(true);
        }
        let p = match self.get_remote_predecessor(&succ).await {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!("[stabilize] successor {} lost: {}", succ.id, e);
                return Ok(false);
            }
        };

        let mut stable = true;
        if p.id != me.id && p.id.between(me.id, succ.id) {
            tracing::debug!("[stabilize] {} joined between {} and {}", p.id, me.id, succ.id);
            if self.learn(&p).await? {
                // notified by the next round, once it is the successor
                stable = false;
            }
        }
        if self.successors.oldsucc()? != Some(succ.id) {
            self.successors.set_oldsucc(succ.id)?;
            stable = false;
        }
        if let Err(e) = self.notify(&succ).await {
            tracing::debug!("[stabilize] failed to notify {}: {}", succ.id, e);
            stable = false;
        }
        Ok(stable)
    }

    /// Merge the successor list of the successor into the cache.
    pub(crate) async fn stabilize_succlist(&self) -> Result<bool> {
        let succ = self.successors.succ()?;
        if succ.id == self.id() {
            return Ok(true);
        }
        let list = match self.get_remote_succ_list(&succ).await {
            Ok(list) => list,
            Err(e) => {
                tracing::debug!("[stabilize] no successor list from {}: {}", succ.id, e);
                return Ok(false);
            }
        };
        let plan = self.successors.merge_plan(&list)?;
        if plan.is_empty() {
            return Ok(true);
        }

        let mut stable = true;
        for n in &plan.learn {
            let was_good = self.locations.is_good(n.id)?;
            match self.learn(n).await {
                Ok(good) => stable &= was_good || !good,
                Err(e) => {
                    tracing::debug!("[stabilize] failed to learn {}: {}", n.id, e);
                    stable = false;
                }
            }
        }
        for n in &plan.ping {
            if !self.ping(n).await {
                tracing::debug!("[stabilize] successor {} is gone", n.id);
                stable = false;
            }
        }
        Ok(stable)
    }

    /// Ask the predecessor for its successor to catch a missed notification, and
    /// warm the cache with the fingers of the first predecessor.
    pub(crate) async fn stabilize_pred(&self) -> Result<bool> {
        let me = self.info().clone();
        let pred = self.predecessor.pred()?;
        if pred.id != me.id {
            match self.call(&pred, &GetSuccessorSend).await {
                Ok(s) if s.id != me.id && s.id.between(pred.id, me.id) => {
                    tracing::debug!("[stabilize] {} sits between {} and {}", s.id, pred.id, me.id);
                    self.learn(&s).await?;
                }
                Ok(_) => {}
                Err(e) => tracing::debug!("[stabilize] predecessor {} lost: {}", pred.id, e),
            }
            if self.predecessor.first_pred(&pred) {
                match self.call(&pred, &GetFingersSend).await {
                    Ok(fingers) => self.learn_all(&fingers).await,
                    Err(e) => tracing::debug!("[stabilize] no fingers from {}: {}", pred.id, e),
                }
            }
        }
        self.predecessor.check_stable()
    }

    /// Check one finger. A finger that changed since its last check, or whose
    /// predecessor lies in `[start, finger)`, is re-anchored with a lookup.
    pub(crate) async fn stabilize_finger(&self) -> Result<()> {
        let me = self.id();
        let i = self.fingers.next_index()?;
        let (f, changed) = self.fingers.check(i)?;
        if f.id == me {
            return self.fingers.advance(i);
        }
        let start = self.fingers.start(i);

        let stale = changed
            || match self.get_remote_predecessor(&f).await {
                Ok(p) => p.id != f.id && p.id.between_left_incl(start, f.id),
                Err(_) => true,
            };
        if stale {
            self.fingers.mark_unstable()?;
            match self.find_successor(start).await {
                Ok(Some(n)) => tracing::debug!("[finger] finger {} is {}", i, n.id),
                Ok(None) => tracing::debug!("[finger] no successor for finger {}", i),
                Err(e) => tracing::debug!("[finger] lookup of finger {} failed: {}", i, e),
            }
        }
        self.fingers.advance(i)
    }

    /// Pick a proximity finger for the next slot worth it.
    pub(crate) async fn stabilize_pns(&self) -> Result<()> {
        let Some(pns) = &self.pns else {
            return Ok(());
        };
        let Some((i, f)) = pns.next_index()? else {
            return Ok(());
        };
        let mut list = self.get_remote_succ_list(&f).await.unwrap_or_default();
        if let Ok(ext) = self.call(&f, &GetFingersExtSend).await {
            list.extend(ext.fingers);
        }
        let candidates = pns.candidates(i, &list);
        self.learn_all(&candidates).await;
        if let Some(n) = pns.select(i, &candidates)? {
            tracing::debug!("[pns] fast finger {} is {}", i, n.id);
        }
        Ok(())
    }

    /// Re-check dead records, sweep stale lookups and adapt the parallel router.
    pub(crate) async fn housekeeping(&self) -> Result<()> {
        let now = Instant::now();
        for n in self.locations.due_dead_checks(now)? {
            if self.ping(&n).await {
                tracing::info!("[location] {} is back", n.id);
            } else {
                self.locations.dead_check_failed(n.id, now)?;
            }
        }
        let swept = self.pending.sweep(self.config.lookup_timeout())?;
        if swept > 0 {
            tracing::debug!("[route] swept {} stale lookups", swept);
        }
        self.accordion.maybe_clean(now)?;
        self.accordion.adjust_para()?;
        Ok(())
    }

    async fn learn_all(&self, nodes: &[NodeInfo]) {
        for n in nodes.iter().filter(|n| n.id != self.id()) {
            if let Err(e) = self.learn(n).await {
                tracing::debug!("[stabilize] failed to learn {}: {}", n.id, e);
            }
        }
    }

    /// Run every maintenance round once, in order. Returns whether the vnode
    /// looks stable afterwards.
    pub async fn stabilize_once(&self) -> Result<bool> {
        let succ = self.stabilize_succ().await?;
        self.successors.round.set_stable(succ);
        let list = self.stabilize_succlist().await?;
        self.succlist_round.set_stable(list);
        self.stabilize_pred().await?;
        self.stabilize_finger().await?;
        self.stabilize_pns().await?;
        self.housekeeping().await?;
        Ok(self.isstable())
    }
}

/// Which maintainer a [Maintainer] drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MaintainerKind {
    Successor,
    SuccList,
    Predecessor,
    Fingers,
    Locations,
}

impl MaintainerKind {
    pub(crate) fn all() -> &'static [MaintainerKind] {
        use MaintainerKind::*;
        &[Successor, SuccList, Predecessor, Fingers, Locations]
    }
}

/// Binds one maintainer of a vnode to the scheduler.
pub(crate) struct Maintainer {
    vnode: Weak<Vnode>,
    kind: MaintainerKind,
}

impl Maintainer {
    pub(crate) fn new(vnode: Weak<Vnode>, kind: MaintainerKind) -> Self {
        Self { vnode, kind }
    }

    fn round<'a>(&self, v: &'a Vnode) -> &'a RoundState {
        match self.kind {
            MaintainerKind::Successor => &v.successors.round,
            MaintainerKind::SuccList => &v.succlist_round,
            MaintainerKind::Predecessor => &v.predecessor.round,
            MaintainerKind::Fingers => &v.fingers.round,
            MaintainerKind::Locations => &v.housekeeping,
        }
    }

    fn in_progress(&self, cadence: Cadence) -> bool {
        self.vnode
            .upgrade()
            .map(|v| self.round(&v).in_progress(cadence))
            .unwrap_or(false)
    }

    async fn run(&self, v: &Vnode, cadence: Cadence) -> Result<()> {
        use MaintainerKind::*;
        match (self.kind, cadence) {
            (Successor, Cadence::Continuous) => {
                let stable = v.stabilize_succ().await?;
                v.successors.round.set_stable(stable);
            }
            (SuccList, Cadence::Backoff) => {
                let stable = v.stabilize_succlist().await?;
                v.succlist_round.set_stable(stable);
            }
            (Predecessor, Cadence::Continuous) => {
                v.stabilize_pred().await?;
            }
            (Fingers, Cadence::Backoff) => {
                v.stabilize_finger().await?;
                v.stabilize_pns().await?;
            }
            (Locations, Cadence::Backoff) => v.housekeeping().await?,
            _ => {}
        }
        Ok(())
    }

    async fn round_of(&self, cadence: Cadence) {
        let Some(v) = self.vnode.upgrade() else {
            return;
        };
        let round = self.round(&v);
        let Some(_guard) = round.enter(cadence) else {
            return;
        };
        if let Err(e) = self.run(&v, cadence).await {
            tracing::error!("[stabilize] {} {:?} round failed: {}", self.name(), cadence, e);
            round.set_stable(false);
        }
    }
}

#[async_trait]
impl Stabilizable for Maintainer {
    fn name(&self) -> &'static str {
        match self.kind {
            MaintainerKind::Successor => "successor",
            MaintainerKind::SuccList => "succlist",
            MaintainerKind::Predecessor => "predecessor",
            MaintainerKind::Fingers => "fingers",
            MaintainerKind::Locations => "locations",
        }
    }

    fn continuous_stabilizing(&self) -> bool {
        self.in_progress(Cadence::Continuous)
    }

    fn backoff_stabilizing(&self) -> bool {
        self.in_progress(Cadence::Backoff)
    }

    async fn do_continuous(&self) {
        self.round_of(Cadence::Continuous).await
    }

    async fn do_backoff(&self) {
        self.round_of(Cadence::Backoff).await
    }

    fn isstable(&self) -> bool {
        let Some(v) = self.vnode.upgrade() else {
            return true;
        };
        match self.kind {
            MaintainerKind::Fingers => v.fingers.isstable(),
            MaintainerKind::Locations => true,
            _ => self.round(&v).is_stable(),
        }
    }
}
