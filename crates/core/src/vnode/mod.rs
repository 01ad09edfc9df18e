#![warn(missing_docs)]
//! Ring member façade.
//!
//! A [Vnode] owns one identifier and composes the [LocationCache], the maintainers,
//! the [StabilizeManager] and the lookup protocols. It is always shared as
//! `Arc<Vnode>`: built by [VnodeBuilder], it serves the requests its transport
//! delivers and runs stabilization once [Vnode::start] is called.

mod builder;
mod rpc;
mod stabilize;

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

pub use builder::VnodeBuilder;
pub use rpc::VnodeCallback;
use chordring_transport::core::transport::TransportInterface;

use crate::config::RouteStrategy;
use crate::config::VnodeConfig;
use crate::consts::MAX_RETRIES;
use crate::dht::Did;
use crate::dht::FingerRoute;
use crate::dht::FingerTable;
use crate::dht::LocationCache;
use crate::dht::NodeInfo;
use crate::dht::PnsFingerTable;
use crate::dht::PredecessorTracker;
use crate::dht::RoundState;
use crate::dht::RoutingTable;
use crate::dht::StabilizeManager;
use crate::dht::SuccessorList;
use crate::error::Error;
use crate::error::Result;
use crate::message::AlertSend;
use crate::message::FingersExtReport;
use crate::message::GetFingersExtSend;
use crate::message::GetPredecessorSend;
use crate::message::GetSuccListSend;
use crate::message::NotifySend;
use crate::route::AccordionRoute;
use crate::route::AccordionState;
use crate::route::IterativeRoute;
use crate::route::PendingRoutes;
use crate::route::RecursiveRoute;
use crate::route::RouteIterator;
use crate::route::RouteResult;
use crate::stats::Stats;
use crate::stats::StatsCounter;
use crate::stats::StatsSnapshot;

/// One member of the ring.
pub struct Vnode {
    me: NodeInfo,
    config: VnodeConfig,
    transport: Arc<dyn TransportInterface>,
    locations: Arc<LocationCache>,
    successors: SuccessorList,
    predecessor: PredecessorTracker,
    fingers: Arc<FingerTable>,
    pns: Option<PnsFingerTable>,
    accordion: AccordionState,
    pending: PendingRoutes,
    stabilizer: Arc<StabilizeManager>,
    succlist_round: RoundState,
    housekeeping: RoundState,
    stats: Stats,
    weak: Weak<Vnode>,
}

impl Vnode {
    /// Identity of the vnode.
    pub fn info(&self) -> &NodeInfo {
        &self.me
    }

    /// Did of the vnode.
    pub fn id(&self) -> Did {
        self.me.id
    }

    /// Configuration the vnode was built with.
    pub fn config(&self) -> &VnodeConfig {
        &self.config
    }

    /// The location cache.
    pub fn locations(&self) -> &Arc<LocationCache> {
        &self.locations
    }

    /// The successor list maintainer.
    pub fn successors(&self) -> &SuccessorList {
        &self.successors
    }

    /// The predecessor maintainer.
    pub fn predecessor(&self) -> &PredecessorTracker {
        &self.predecessor
    }

    /// The basic finger table.
    pub fn fingers(&self) -> &FingerTable {
        &self.fingers
    }

    /// The proximity finger table, when configured.
    pub fn pns(&self) -> Option<&PnsFingerTable> {
        self.pns.as_ref()
    }

    /// The routing table selected by the configuration.
    pub fn routing_table(&self) -> &dyn RoutingTable {
        match &self.pns {
            Some(pns) => pns as &dyn RoutingTable,
            None => self.fingers.as_ref() as &dyn RoutingTable,
        }
    }

    /// The stabilization scheduler.
    pub fn stabilizer(&self) -> &Arc<StabilizeManager> {
        &self.stabilizer
    }

    pub(crate) fn accordion(&self) -> &AccordionState {
        &self.accordion
    }

    pub(crate) fn pending(&self) -> &PendingRoutes {
        &self.pending
    }

    pub(crate) fn stats_counters(&self) -> &Stats {
        &self.stats
    }

    pub(crate) fn transport(&self) -> &Arc<dyn TransportInterface> {
        &self.transport
    }

    /// A strong reference to self, for tasks that outlive the current call.
    pub(crate) fn arc(&self) -> Result<Arc<Vnode>> {
        self.weak.upgrade().ok_or(Error::VnodeDropped)
    }

    /// The first successor, self when alone.
    pub fn succ(&self) -> Result<NodeInfo> {
        self.successors.succ()
    }

    /// The successor list, nearest first.
    pub fn get_succ_list(&self) -> Result<Vec<NodeInfo>> {
        self.successors.succs()
    }

    /// The predecessor, self when unknown.
    pub fn get_predecessor(&self) -> Result<NodeInfo> {
        self.predecessor.pred()
    }

    /// The best known node strictly between self and `x`, skipping `excluding`.
    pub fn closest_predecessor(&self, x: Did, excluding: &[Did]) -> Result<NodeInfo> {
        FingerRoute::new(&self.me, self.routing_table(), &self.successors)
            .closest_predecessor(x, excluding)
    }

    /// Offer self as predecessor of `to`.
    pub async fn notify(&self, to: &NodeInfo) -> Result<()> {
        if to.id == self.me.id {
            return Ok(());
        }
        self.call(to, &NotifySend {
            node: self.me.clone(),
        })
        .await
    }

    /// Warn `to` that `suspect` did not answer. Fire and forget.
    pub fn alert(&self, to: NodeInfo, suspect: NodeInfo) {
        let Ok(v) = self.arc() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = v.call(&to, &AlertSend { node: suspect }).await {
                tracing::debug!("[alert] failed to alert {}: {}", to.id, e);
            }
        });
    }

    /// Find the successors of `x` with the configured protocol.
    pub async fn lookup(&self, x: Did) -> Result<RouteResult> {
        self.lookup_with(self.config.route_strategy, x, None).await
    }

    /// Find the successors of `x` with `strategy`, starting at `guess` when given.
    pub async fn lookup_with(
        &self,
        strategy: RouteStrategy,
        x: Did,
        guess: Option<NodeInfo>,
    ) -> Result<RouteResult> {
        self.stats.incr(StatsCounter::Lookups);
        let succs = self.successors.succs()?;
        if succs.is_empty() || x == self.me.id {
            let mut successors = vec![self.me.clone()];
            successors.extend(succs.into_iter().take(self.config.nsucc.saturating_sub(1)));
            return Ok(RouteResult::ok(x, successors, vec![self.me.clone()], 0));
        }

        let result = match strategy {
            RouteStrategy::Iterative => IterativeRoute::new(self).route(x, guess).await?,
            RouteStrategy::Recursive => RecursiveRoute::new(self).route(x, guess).await?,
            RouteStrategy::Accordion => AccordionRoute::new(self).route(x, guess).await?,
        };
        self.stats.add(StatsCounter::Hops, result.hops() as u64);
        if strategy != RouteStrategy::Iterative {
            self.stats.add(StatsCounter::Retries, result.retries as u64);
        }
        if !result.is_ok() {
            self.stats.incr(StatsCounter::FailedLookups);
            tracing::info!("[lookup] {} resolved with {:?}", x, result.status);
        }
        Ok(result)
    }

    /// The successor of `x`, learnt into the cache.
    pub(crate) async fn find_successor(&self, x: Did) -> Result<Option<NodeInfo>> {
        let result = self.lookup(x).await?;
        let Some(owner) = result.successor().cloned() else {
            return Ok(None);
        };
        if self.learn(&owner).await? {
            Ok(Some(owner))
        } else {
            Ok(None)
        }
    }

    /// Join the ring through the vnode listening at `introducer`.
    pub async fn join(&self, introducer: &str) -> Result<()> {
        match introducer.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {}
            _ => return Err(Error::InvalidAddress(introducer.to_string())),
        }
        let mut last = None;
        for attempt in 0..MAX_RETRIES {
            match self.try_join(introducer).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!("[join] attempt {} through {} failed: {}", attempt, introducer, e);
                    last = Some(e);
                    tokio::time::sleep(Duration::from_millis(100 << attempt)).await;
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::ChordError(format!("cannot join {introducer}"))))
    }

    async fn try_join(&self, introducer: &str) -> Result<()> {
        // the introducer is known by address only
        let FingersExtReport { node, fingers } = self
            .call_with::<GetFingersExtSend>(introducer, None, &GetFingersExtSend)
            .await?;
        if node.id == self.me.id {
            return Err(Error::ChordError("cannot join through self".to_string()));
        }
        if !self.learn(&node).await? {
            return Err(Error::ChallengeFailed(node.id));
        }

        let result = IterativeRoute::new(self).route(self.me.id, Some(node)).await?;
        if !result.is_ok() {
            return Err(Error::ChordError(format!(
                "lookup of {} failed with {:?}",
                self.me.id, result.status
            )));
        }
        for s in result.successors.iter().filter(|s| s.id != self.me.id) {
            self.learn(s).await?;
        }
        for f in fingers.iter().filter(|f| f.id != self.me.id) {
            if let Err(e) = self.learn(f).await {
                tracing::debug!("[join] failed to learn finger {}: {}", f.id, e);
            }
        }

        let succ = self.successors.succ()?;
        if succ.id == self.me.id {
            return Err(Error::NoSuchEntry(self.me.id));
        }
        tracing::info!("[join] {} joined with successor {}", self.me.id, succ.id);
        self.notify(&succ).await?;
        self.successors.set_oldsucc(succ.id)?;
        Ok(())
    }

    /// Fetch the successor list of `n`, itself first.
    pub async fn get_remote_succ_list(&self, n: &NodeInfo) -> Result<Vec<NodeInfo>> {
        self.call(n, &GetSuccListSend).await
    }

    /// Fetch the predecessor of `n`.
    pub async fn get_remote_predecessor(&self, n: &NodeInfo) -> Result<NodeInfo> {
        self.call(n, &GetPredecessorSend).await
    }

    /// Start the stabilization timers.
    pub fn start(&self) {
        self.stabilizer.start();
    }

    /// Stop the stabilization timers. Idempotent.
    pub fn stop(&self) {
        self.stabilizer.stop();
    }

    /// Whether every maintainer reports stable.
    pub fn isstable(&self) -> bool {
        self.stabilizer.isstable()
    }

    /// Snapshot of the counters and of the ring view.
    pub fn stats(&self) -> Result<StatsSnapshot> {
        Ok(StatsSnapshot {
            id: self.me.id.to_string(),
            procedures: self.stats.procedures(),
            nhops: self.stats.get(StatsCounter::Hops),
            lookups: self.stats.get(StatsCounter::Lookups),
            failed_lookups: self.stats.get(StatsCounter::FailedLookups),
            violations: self.stats.get(StatsCounter::Violations),
            retries: self.stats.get(StatsCounter::Retries),
            continuous_timer_ms: self.stabilizer.continuous_timer(),
            backoff_timer_ms: self.stabilizer.backoff_timer(),
            estimated_nodes: self.successors.estimate_nnodes()?,
            cache_size: self.locations.size()?,
            usable_nodes: self.locations.usable_nodes()?,
            stable: self.isstable(),
        })
    }
}

impl Drop for Vnode {
    fn drop(&mut self) {
        self.stabilizer.stop();
    }
}
