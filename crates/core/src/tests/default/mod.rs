use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chordring_transport::connections::DummyTransport;

use crate::config::TimerConfig;
use crate::config::VnodeConfig;
use crate::dht::Did;
use crate::error::Result;
use crate::vnode::Vnode;
use crate::vnode::VnodeBuilder;

mod test_dispatch;
mod test_routing;
mod test_stabilization;

static NEXT_PORT: AtomicU32 = AtomicU32::new(20000);

/// A fresh dummy address. The dummy endpoints are process wide, so tests
/// running concurrently must never share one.
pub fn next_addr() -> String {
    format!("10.0.0.1:{}", NEXT_PORT.fetch_add(1, Ordering::SeqCst))
}

/// Short timers and timeouts, so failures are detected fast.
pub fn test_config(nsucc: usize) -> VnodeConfig {
    let timer = TimerConfig {
        init_ms: 50,
        base_ms: 50,
        max_ms: 500,
    };
    VnodeConfig {
        nsucc,
        rpc_timeout_ms: 500,
        lookup_timeout_ms: 3000,
        continuous: timer.clone(),
        backoff: timer,
        decrease_step_ms: 10,
        check_dead_initial_ms: 100,
        check_dead_max_ms: 1000,
        ..VnodeConfig::default()
    }
}

pub fn prepare_vnode(config: VnodeConfig) -> Result<Arc<Vnode>> {
    let transport = Arc::new(DummyTransport::new(&next_addr())?);
    VnodeBuilder::new(transport).config(config).build()
}

/// `n` vnodes sorted by id. Nothing is joined yet.
pub fn gen_sorted_ring(n: usize, config: VnodeConfig) -> Result<Vec<Arc<Vnode>>> {
    let mut ring = (0..n)
        .map(|_| prepare_vnode(config.clone()))
        .collect::<Result<Vec<_>>>()?;
    ring.sort_by_key(|v| v.id());
    Ok(ring)
}

/// Join every vnode through the first one, then give the spawned
/// notifications a moment to land.
pub async fn join_ring(ring: &[Arc<Vnode>]) -> Result<()> {
    let introducer = ring[0].info().addr.clone();
    for v in &ring[1..] {
        v.join(&introducer).await?;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}

pub async fn stabilize_ring(ring: &[Arc<Vnode>], rounds: usize) -> Result<()> {
    for _ in 0..rounds {
        for v in ring {
            v.stabilize_once().await?;
        }
    }
    Ok(())
}

/// A joined and stabilized ring of `n` vnodes.
pub async fn gen_stable_ring(n: usize, config: VnodeConfig) -> Result<Vec<Arc<Vnode>>> {
    let ring = gen_sorted_ring(n, config)?;
    join_ring(&ring).await?;
    stabilize_ring(&ring, 2 * n).await?;
    Ok(ring)
}

/// Index of the vnode owning `x` in a sorted ring.
pub fn owner_of(ring: &[Arc<Vnode>], x: Did) -> usize {
    ring.iter().position(|v| v.id() >= x).unwrap_or(0)
}

pub fn ids(nodes: &[crate::dht::NodeInfo]) -> Vec<Did> {
    nodes.iter().map(|n| n.id).collect()
}
