//! This module provide the [Stats] counters of a vnode.
//! Counters live in the vnode that owns them; nothing here is process-wide.
#![warn(missing_docs)]
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use serde::Deserialize;
use serde::Serialize;

use crate::message::Procedure;

/// Number of procedure slots, indexed by procedure number.
const NPROC: usize = 24;

/// The tag of global counters in [Stats].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatsCounter {
    /// Hops taken by finished lookups.
    Hops,
    /// Lookups started here.
    Lookups,
    /// Lookups that did not resolve with `Ok`.
    FailedLookups,
    /// Peers caught returning a hop that is not closer to the target.
    Violations,
    /// Hops retried after an RPC failure.
    Retries,
}

/// Per-vnode counters.
/// `sent` counts RPCs issued per procedure, `served` counts calls handled per procedure.
#[derive(Debug, Default)]
pub struct Stats {
    sent: [AtomicU64; NPROC],
    served: [AtomicU64; NPROC],
    hops: AtomicU64,
    lookups: AtomicU64,
    failed_lookups: AtomicU64,
    violations: AtomicU64,
    retries: AtomicU64,
}

impl Stats {
    fn counter(&self, counter: StatsCounter) -> &AtomicU64 {
        match counter {
            StatsCounter::Hops => &self.hops,
            StatsCounter::Lookups => &self.lookups,
            StatsCounter::FailedLookups => &self.failed_lookups,
            StatsCounter::Violations => &self.violations,
            StatsCounter::Retries => &self.retries,
        }
    }

    /// Add `n` to a global counter.
    pub fn add(&self, counter: StatsCounter, n: u64) {
        self.counter(counter).fetch_add(n, Ordering::Relaxed);
    }

    /// Increment a global counter.
    pub fn incr(&self, counter: StatsCounter) {
        self.add(counter, 1)
    }

    /// Read a global counter.
    pub fn get(&self, counter: StatsCounter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    /// An RPC of `proc` was issued.
    pub fn incr_sent(&self, proc: Procedure) {
        if let Some(c) = self.sent.get(u32::from(proc) as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A call of `proc` was served.
    pub fn incr_served(&self, proc: Procedure) {
        if let Some(c) = self.served.get(u32::from(proc) as usize) {
            c.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// RPCs of `proc` issued so far.
    pub fn sent(&self, proc: Procedure) -> u64 {
        self.sent
            .get(u32::from(proc) as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Calls of `proc` served so far.
    pub fn served(&self, proc: Procedure) -> u64 {
        self.served
            .get(u32::from(proc) as usize)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or_default()
    }

    /// Copy the counters.
    pub fn procedures(&self) -> Vec<ProcedureStats> {
        Procedure::all()
            .iter()
            .map(|p| ProcedureStats {
                procedure: *p,
                sent: self.sent(*p),
                served: self.served(*p),
            })
            .collect()
    }
}

/// Counters of one procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureStats {
    /// The procedure.
    pub procedure: Procedure,
    /// RPCs issued.
    pub sent: u64,
    /// Calls served.
    pub served: u64,
}

/// A serializable view of a vnode's state and counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Did of the vnode.
    pub id: String,
    /// Per procedure counters.
    pub procedures: Vec<ProcedureStats>,
    /// Hops taken by finished lookups.
    pub nhops: u64,
    /// Lookups started here.
    pub lookups: u64,
    /// Lookups that failed.
    pub failed_lookups: u64,
    /// Protocol violations observed.
    pub violations: u64,
    /// Retried hops.
    pub retries: u64,
    /// Continuous stabilization delay in ms.
    pub continuous_timer_ms: u64,
    /// Backoff stabilization delay in ms.
    pub backoff_timer_ms: u64,
    /// Estimated number of ring members.
    pub estimated_nodes: u64,
    /// Records in the location cache.
    pub cache_size: usize,
    /// Good records in the location cache.
    pub usable_nodes: usize,
    /// Whether every maintainer reports stability.
    pub stable: bool,
}
