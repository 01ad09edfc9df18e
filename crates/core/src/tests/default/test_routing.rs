use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use chordring_transport::connections::DummyTransport;
use chordring_transport::core::callback::CallbackError;
use chordring_transport::core::callback::TransportCallback;
use chordring_transport::core::transport::TransportInterface;

use super::gen_stable_ring;
use super::ids;
use super::next_addr;
use super::owner_of;
use super::test_config;
use crate::config::FingerStrategy;
use crate::config::RouteStrategy;
use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Result;
use crate::message::decode;
use crate::message::encode;
use crate::message::RpcReply;
use crate::message::RpcRequest;
use crate::message::TestRangeReport;
use crate::message::TestRangeSend;
use crate::route::RouteResult;
use crate::route::RouteStatus;
use crate::vnode::Vnode;

const STRATEGIES: [RouteStrategy; 3] = [
    RouteStrategy::Iterative,
    RouteStrategy::Recursive,
    RouteStrategy::Accordion,
];

/// The successors in `result` are the ring members following the owner of its key.
fn assert_owned(ring: &[Arc<Vnode>], result: &RouteResult) {
    assert_eq!(result.status, RouteStatus::Ok, "lookup of {}", result.key);
    let owner = owner_of(ring, result.key);
    let expected: Vec<Did> = (0..result.successors.len())
        .map(|k| ring[(owner + k) % ring.len()].id())
        .collect();
    assert!(!expected.is_empty());
    assert_eq!(ids(&result.successors), expected, "lookup of {}", result.key);
}

#[tokio::test]
async fn test_strategies_agree() -> Result<()> {
    let ring = gen_stable_ring(5, test_config(3)).await?;

    for _ in 0..8 {
        let x = Did::random();
        let origin = &ring[rand::random::<usize>() % ring.len()];
        for strategy in STRATEGIES {
            let result = origin.lookup_with(strategy, x, None).await?;
            assert_owned(&ring, &result);
            if strategy != RouteStrategy::Iterative {
                // forwarded lookups start at their origin
                assert_eq!(result.path.first().map(|n| n.id), Some(origin.id()));
            }
        }
    }

    let stats = ring[0].stats()?;
    assert!(stats.lookups > 0);
    assert_eq!(stats.failed_lookups, 0);
    Ok(())
}

#[tokio::test]
async fn test_lookup_of_member_ids() -> Result<()> {
    let ring = gen_stable_ring(4, test_config(2)).await?;
    for strategy in STRATEGIES {
        for target in &ring {
            let result = ring[0].lookup_with(strategy, target.id(), None).await?;
            assert_eq!(result.successor().map(|n| n.id), Some(target.id()));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_lookup_own_id_short_circuits() -> Result<()> {
    let ring = gen_stable_ring(3, test_config(2)).await?;
    let v = &ring[1];
    let result = v.lookup(v.id()).await?;
    assert_eq!(result.hops(), 0);
    assert_eq!(result.successor().map(|n| n.id), Some(v.id()));
    assert_eq!(result.successors.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_lookup_with_guess() -> Result<()> {
    let ring = gen_stable_ring(5, test_config(3)).await?;
    let x = ring[3].id().dec();
    let guess = ring[2].info().clone();
    let result = ring[0]
        .lookup_with(RouteStrategy::Iterative, x, Some(guess))
        .await?;
    assert_owned(&ring, &result);
    assert_eq!(result.path.first().map(|n| n.id), Some(ring[2].id()));
    Ok(())
}

#[tokio::test]
async fn test_iterative_lookup_of_the_guess_id() -> Result<()> {
    let ring = gen_stable_ring(5, test_config(3)).await?;
    let target = &ring[2];
    let result = ring[0]
        .lookup_with(RouteStrategy::Iterative, target.id(), Some(target.info().clone()))
        .await?;
    assert_owned(&ring, &result);
    assert_eq!(result.successor().map(|n| n.id), Some(target.id()));
    assert_eq!(ring[0].stats()?.violations, 0);
    Ok(())
}

/// Answers every range query with a fixed next hop, whatever the key.
struct MisroutingPeer {
    next: NodeInfo,
}

#[async_trait]
impl TransportCallback for MisroutingPeer {
    async fn on_request(&self, _from: &str, body: Bytes) -> std::result::Result<Bytes, CallbackError> {
        let req: RpcRequest = decode(&body)?;
        let _: TestRangeSend = decode(&req.args)?;
        let report = TestRangeReport::NotInRange {
            next: self.next.clone(),
        };
        Ok(encode(&RpcReply::Ok(encode(&report)?))?)
    }
}

#[tokio::test]
async fn test_hop_moving_away_from_the_key_is_a_violation() -> Result<()> {
    let ring = gen_stable_ring(2, test_config(3)).await?;
    let origin = &ring[0];
    let transport = DummyTransport::new(&next_addr())?;
    let peer = NodeInfo::new(transport.local_addr(), 0);
    transport.set_callback(Box::new(MisroutingPeer {
        next: ring[1].info().clone(),
    }))?;
    origin.locations().insert(peer.clone())?;

    // the peer is at distance 1 of the key, any other hop is farther
    let x = peer.id.inc();
    let result = origin
        .lookup_with(RouteStrategy::Iterative, x, Some(peer.clone()))
        .await?;
    assert_ne!(result.status, RouteStatus::Ok);
    assert!(result.successors.is_empty());

    let stats = origin.stats()?;
    assert_eq!(stats.violations, 1);
    assert!(!origin.locations().is_good(peer.id)?);
    let due = origin
        .locations()
        .due_dead_checks(Instant::now() + Duration::from_secs(1))?;
    assert!(ids(&due).contains(&peer.id));
    drop(transport);
    Ok(())
}

#[tokio::test]
async fn test_lookup_routes_around_a_dead_hop() -> Result<()> {
    let ring = gen_stable_ring(6, test_config(3)).await?;
    let gone = 3;
    DummyTransport::set_online_by_addr(&ring[gone].info().addr, false)?;
    let live: Vec<_> = ring
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != gone)
        .map(|(_, v)| v.clone())
        .collect();

    for strategy in STRATEGIES {
        for target in &live[1..] {
            let result = live[0].lookup_with(strategy, target.id(), None).await?;
            assert_eq!(result.status, RouteStatus::Ok, "{strategy:?} lookup of {}", target.id());
            assert_eq!(result.successor().map(|n| n.id), Some(target.id()));
            assert!(!ids(&result.path).contains(&ring[gone].id()));
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_pns_ring_routes() -> Result<()> {
    let mut config = test_config(3);
    config.finger_strategy = FingerStrategy::Pns;
    let ring = gen_stable_ring(5, config).await?;
    for v in &ring {
        assert!(v.pns().is_some());
    }
    for _ in 0..4 {
        let result = ring[1].lookup(Did::random()).await?;
        assert_owned(&ring, &result);
    }
    Ok(())
}

#[tokio::test]
async fn test_shaved_recursive_lookup() -> Result<()> {
    let mut config = test_config(3);
    config.shave = true;
    config.route_strategy = RouteStrategy::Recursive;
    let ring = gen_stable_ring(5, config).await?;
    for _ in 0..4 {
        let result = ring[2].lookup(Did::random()).await?;
        assert_owned(&ring, &result);
    }
    assert!(ring[2].pending().is_empty());
    Ok(())
}
