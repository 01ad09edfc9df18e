use std::time::Duration;

use chordring_transport::connections::DummyTransport;
use tokio::time::sleep;

use super::gen_sorted_ring;
use super::gen_stable_ring;
use super::ids;
use super::join_ring;
use super::owner_of;
use super::prepare_vnode;
use super::stabilize_ring;
use super::test_config;
use crate::consts::NBIT;
use crate::dht::Did;
use crate::error::Error;
use crate::error::Result;
use crate::route::RouteStatus;

#[tokio::test]
async fn test_single_vnode() -> Result<()> {
    let v = prepare_vnode(test_config(3))?;
    assert_eq!(v.succ()?.id, v.id());
    assert_eq!(v.get_predecessor()?.id, v.id());
    assert!(v.get_succ_list()?.is_empty());

    let result = v.lookup(Did::random()).await?;
    assert_eq!(result.status, RouteStatus::Ok);
    assert_eq!(result.successor().map(|n| n.id), Some(v.id()));
    assert_eq!(result.hops(), 0);

    v.stabilize_once().await?;
    assert_eq!(v.stats()?.estimated_nodes, 1);
    Ok(())
}

#[tokio::test]
async fn test_two_vnodes_join() -> Result<()> {
    let ring = gen_sorted_ring(2, test_config(3))?;
    join_ring(&ring).await?;
    stabilize_ring(&ring, 2).await?;

    assert_eq!(ring[0].succ()?.id, ring[1].id());
    assert_eq!(ring[1].succ()?.id, ring[0].id());
    assert_eq!(ring[0].get_predecessor()?.id, ring[1].id());
    assert_eq!(ring[1].get_predecessor()?.id, ring[0].id());
    // only one other node, so the list is cut to one entry
    assert_eq!(ids(&ring[0].get_succ_list()?), vec![ring[1].id()]);
    Ok(())
}

#[tokio::test]
async fn test_join_through_self_fails() -> Result<()> {
    let v = prepare_vnode(test_config(3))?;
    let addr = v.info().addr.clone();
    assert!(v.join(&addr).await.is_err());
    assert!(matches!(
        v.join("nowhere").await,
        Err(Error::InvalidAddress(a)) if a == "nowhere"
    ));
    Ok(())
}

#[tokio::test]
async fn test_ring_converges() -> Result<()> {
    let n = 6;
    let nsucc = 3;
    let ring = gen_sorted_ring(n, test_config(nsucc))?;
    join_ring(&ring).await?;
    stabilize_ring(&ring, 2 * n).await?;

    for (i, v) in ring.iter().enumerate() {
        let expected: Vec<Did> = (1..=nsucc).map(|k| ring[(i + k) % n].id()).collect();
        assert_eq!(ids(&v.get_succ_list()?), expected, "successors of vnode {i}");
        assert_eq!(v.get_predecessor()?.id, ring[(i + n - 1) % n].id(), "predecessor of vnode {i}");

        let reply = v.successors().reply_list()?;
        assert_eq!(reply[0].id, v.id());
        assert_eq!(reply.len(), nsucc + 1);
    }
    Ok(())
}

#[tokio::test]
async fn test_fingers_point_to_successors_of_their_start() -> Result<()> {
    let ring = gen_stable_ring(6, test_config(2)).await?;
    // one finger per round, enough rounds for a full pass
    for _ in 0..NBIT / 4 {
        for v in &ring {
            v.stabilize_finger().await?;
        }
    }

    for v in &ring {
        for i in (0..NBIT).step_by(7) {
            let start = v.fingers().start(i);
            let expected = ring[owner_of(&ring, start)].id();
            assert_eq!(v.fingers().finger(i)?.id, expected, "finger {i} of {}", v.id());
        }
        assert!(v.fingers().isstable());
    }
    Ok(())
}

#[tokio::test]
async fn test_departure_is_repaired() -> Result<()> {
    let n = 5;
    let ring = gen_stable_ring(n, test_config(3)).await?;
    let gone = 2;
    DummyTransport::set_online_by_addr(&ring[gone].info().addr, false)?;

    let live: Vec<_> = ring
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != gone)
        .map(|(_, v)| v.clone())
        .collect();
    stabilize_ring(&live, 4).await?;

    let m = live.len();
    for (i, v) in live.iter().enumerate() {
        let succs = ids(&v.get_succ_list()?);
        assert!(!succs.contains(&ring[gone].id()));
        assert_eq!(succs[0], live[(i + 1) % m].id());
        assert_eq!(v.get_predecessor()?.id, live[(i + m - 1) % m].id());
    }
    assert!(!live[gone - 1].locations().is_good(ring[gone].id())?);
    Ok(())
}

#[tokio::test]
async fn test_stabilizer_runs_on_timers() -> Result<()> {
    let ring = gen_sorted_ring(3, test_config(2))?;
    join_ring(&ring).await?;
    for v in &ring {
        v.start();
    }
    sleep(Duration::from_millis(2000)).await;

    for (i, v) in ring.iter().enumerate() {
        assert_eq!(v.succ()?.id, ring[(i + 1) % 3].id());
        assert_eq!(v.get_predecessor()?.id, ring[(i + 2) % 3].id());
        assert!(v.stabilizer().is_running());
    }
    for v in &ring {
        v.stop();
        v.stop();
        assert!(!v.stabilizer().is_running());
    }
    Ok(())
}
