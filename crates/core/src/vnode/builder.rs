#![warn(missing_docs)]
//! This module provides [VnodeBuilder] to configure a [Vnode].

use std::sync::Arc;
use std::time::Duration;

use chordring_transport::core::transport::TransportInterface;

use super::rpc::VnodeCallback;
use super::stabilize::Maintainer;
use super::stabilize::MaintainerKind;
use super::Vnode;
use crate::config::FingerStrategy;
use crate::config::VnodeConfig;
use crate::dht::Did;
use crate::dht::FingerTable;
use crate::dht::LocationCache;
use crate::dht::NodeInfo;
use crate::dht::PnsFingerTable;
use crate::dht::PredecessorTracker;
use crate::dht::RoundState;
use crate::dht::StabilizeManager;
use crate::dht::SuccessorList;
use crate::error::Result;
use crate::route::AccordionState;
use crate::route::PendingRoutes;
use crate::stats::Stats;

/// Creates a VnodeBuilder to configure a Vnode.
pub struct VnodeBuilder {
    transport: Arc<dyn TransportInterface>,
    vnode_num: u32,
    id: Option<Did>,
    coords: Vec<f32>,
    config: VnodeConfig,
}

impl VnodeBuilder {
    /// Creates new instance of [VnodeBuilder] serving on `transport`.
    pub fn new(transport: Arc<dyn TransportInterface>) -> Self {
        Self {
            transport,
            vnode_num: 0,
            id: None,
            coords: vec![],
            config: VnodeConfig::default(),
        }
    }

    /// Index of the vnode at its address, part of the derived id.
    pub fn vnode_num(mut self, vnode_num: u32) -> Self {
        self.vnode_num = vnode_num;
        self
    }

    /// Use `id` instead of the id derived from the address.
    /// Peers reject it unless they run with `verify_ids` off.
    pub fn id(mut self, id: Did) -> Self {
        self.id = Some(id);
        self
    }

    /// Synthetic network coordinates of the vnode.
    pub fn coords(mut self, coords: Vec<f32>) -> Self {
        self.coords = coords;
        self
    }

    /// Sets up the configuration.
    pub fn config(mut self, config: VnodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Try build for `Vnode`. The vnode serves its transport right away, call
    /// [Vnode::start] to run stabilization.
    pub fn build(self) -> Result<Arc<Vnode>> {
        let config = self.config;
        let mut me = NodeInfo::new(self.transport.local_addr(), self.vnode_num);
        if let Some(id) = self.id {
            me.id = id;
        }
        me.coords = self.coords;

        let locations = Arc::new(
            LocationCache::new(me.clone(), config.max_cache).with_check_dead(
                Duration::from_millis(config.check_dead_initial_ms),
                Duration::from_millis(config.check_dead_max_ms),
            ),
        );
        let successors = SuccessorList::new(me.clone(), config.nsucc, locations.clone())?;
        let predecessor = PredecessorTracker::new(me.clone(), locations.clone())?;
        let fingers = Arc::new(FingerTable::new(me.clone(), locations.clone())?);
        let pns = match config.finger_strategy {
            FingerStrategy::Pns => Some(PnsFingerTable::new(
                me.clone(),
                locations.clone(),
                fingers.clone(),
            )),
            FingerStrategy::Basic => None,
        };
        let stabilizer = Arc::new(StabilizeManager::new(&config));
        let accordion = AccordionState::new(&config.accordion);
        let transport = self.transport;

        tracing::info!("[vnode] {} at {} vnode {}", me.id, me.addr, me.vnode_num);
        let vnode = Arc::new_cyclic(|weak| Vnode {
            me,
            config,
            transport,
            locations,
            successors,
            predecessor,
            fingers,
            pns,
            accordion,
            pending: PendingRoutes::new(),
            stabilizer,
            succlist_round: RoundState::new(),
            housekeeping: RoundState::new(),
            stats: Stats::default(),
            weak: weak.clone(),
        });

        vnode
            .transport
            .set_callback(Box::new(VnodeCallback::new(Arc::downgrade(&vnode))))?;
        for kind in MaintainerKind::all() {
            vnode
                .stabilizer
                .register(Arc::new(Maintainer::new(Arc::downgrade(&vnode), *kind)))?;
        }
        Ok(vnode)
    }
}
