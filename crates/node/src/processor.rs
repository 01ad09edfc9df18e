#![warn(missing_docs)]

//! Processor of the chordring node daemon.
//!
//! A [Processor] binds a [TcpTransport], builds the [Vnode] served over it and
//! drives its lifecycle: join, stabilization, periodic stats reports and shutdown.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chordring_core::dht::Did;
use chordring_core::route::RouteResult;
use chordring_core::stats::StatsSnapshot;
use chordring_core::vnode::Vnode;
use chordring_core::vnode::VnodeBuilder;
use chordring_transport::connections::TcpTransport;
use futures::pin_mut;
use futures::FutureExt;
use futures_timer::Delay;

use crate::config::Config;
use crate::error::Error;
use crate::error::Result;

/// Processor for the chordring node.
pub struct Processor {
    vnode: Arc<Vnode>,
    transport: Arc<TcpTransport>,
    introducer: Option<String>,
    stats_interval: Duration,
}

impl Processor {
    /// Bind the transport described by `config` and build its vnode.
    pub async fn new(config: Config) -> Result<Self> {
        let transport = TcpTransport::bind(&config.bind_addr, config.external_addr.clone()).await?;
        let vnode = VnodeBuilder::new(transport.clone())
            .vnode_num(config.vnode_num)
            .config(config.vnode)
            .build()
            .map_err(Error::VnodeError)?;
        Ok(Self {
            vnode,
            transport,
            introducer: config.introducer,
            stats_interval: Duration::from_secs(config.stats_interval.max(1)),
        })
    }

    /// The served vnode.
    pub fn vnode(&self) -> &Arc<Vnode> {
        &self.vnode
    }

    /// Did of the served vnode.
    pub fn did(&self) -> Did {
        self.vnode.id()
    }

    /// Join through the configured introducer. A processor without one is the
    /// first member of a new ring.
    pub async fn join(&self) -> Result<()> {
        let Some(introducer) = &self.introducer else {
            tracing::info!("[node] no introducer, {} starts a new ring", self.did());
            return Ok(());
        };
        self.vnode.join(introducer).await.map_err(Error::JoinError)
    }

    /// Look `key` up with the configured protocol.
    pub async fn lookup(&self, key: Did) -> Result<RouteResult> {
        self.vnode.lookup(key).await.map_err(Error::LookupError)
    }

    /// Look up a key given in hex.
    pub async fn lookup_hex(&self, key: &str) -> Result<RouteResult> {
        let key = Did::from_str(key).map_err(|_| Error::InvalidDid(key.to_string()))?;
        self.lookup(key).await
    }

    /// Current stats of the vnode.
    pub fn stats(&self) -> Result<StatsSnapshot> {
        Ok(self.vnode.stats()?)
    }

    /// Join, start stabilization and report stats until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where F: std::future::Future<Output = ()> {
        self.join().await?;
        self.vnode.start();
        tracing::info!("[node] {} serving at {}", self.did(), self.vnode.info().addr);

        let shutdown = shutdown.fuse();
        pin_mut!(shutdown);
        loop {
            let report = Delay::new(self.stats_interval).fuse();
            pin_mut!(report);
            futures::select! {
                _ = shutdown => break,
                _ = report => match self.stats().and_then(|s| serde_json::to_string(&s).map_err(Error::from)) {
                    Ok(s) => tracing::info!("[stats] {}", s),
                    Err(e) => tracing::error!("[stats] failed to collect stats: {}", e),
                },
            }
        }

        self.stop();
        Ok(())
    }

    /// Stop stabilization and close the transport. Idempotent.
    pub fn stop(&self) {
        tracing::info!("[node] {} stops", self.did());
        self.vnode.stop();
        self.transport.close();
    }
}
