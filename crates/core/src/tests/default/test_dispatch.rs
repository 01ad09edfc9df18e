use std::sync::Arc;

use chordring_transport::connections::DummyTransport;

use super::gen_stable_ring;
use super::next_addr;
use super::prepare_vnode;
use super::test_config;
use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::encode;
use crate::message::ChallengeSend;
use crate::message::GetSuccListSend;
use crate::message::NullSend;
use crate::message::Procedure;
use crate::message::RpcReply;
use crate::message::RpcRequest;
use crate::message::TestRangeReport;
use crate::message::TestRangeSend;
use crate::vnode::VnodeBuilder;

fn request(procno: u32, to: Option<Did>, args: bytes::Bytes) -> RpcRequest {
    RpcRequest {
        procno,
        to,
        from: NodeInfo::new("10.0.0.2:1", 0),
        args,
    }
}

#[tokio::test]
async fn test_unknown_procedure_is_unavailable() -> Result<()> {
    let v = prepare_vnode(test_config(3))?;
    let reply = v.serve_request(request(99, None, encode(&NullSend)?)).await;
    assert!(matches!(reply, RpcReply::Unavailable(99)));
    Ok(())
}

#[tokio::test]
async fn test_wrong_target_is_unknown_node() -> Result<()> {
    let a = prepare_vnode(test_config(3))?;
    let b = prepare_vnode(test_config(3))?;

    let stranger = Did::random();
    let reply = a
        .serve_request(request(Procedure::Null.into(), Some(stranger), encode(&NullSend)?))
        .await;
    assert!(matches!(reply, RpcReply::UnknownNode(id) if id == stranger));

    let ghost = NodeInfo::with_id(stranger, &a.info().addr, 0);
    match b.call(&ghost, &NullSend).await {
        Err(Error::UnknownNode(id)) => assert_eq!(id, stranger),
        other => panic!("unexpected reply {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_garbled_arguments_fail() -> Result<()> {
    let v = prepare_vnode(test_config(3))?;
    let reply = v
        .serve_request(request(
            Procedure::Challenge.into(),
            Some(v.id()),
            bytes::Bytes::from_static(&[1]),
        ))
        .await;
    assert!(matches!(reply, RpcReply::Failed(_)));
    Ok(())
}

#[tokio::test]
async fn test_served_procedures_are_counted() -> Result<()> {
    let a = prepare_vnode(test_config(3))?;
    let b = prepare_vnode(test_config(3))?;
    for _ in 0..3 {
        assert!(a.ping(b.info()).await);
    }
    let list = a.call(b.info(), &GetSuccListSend).await?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, b.id());

    let served = b.stats()?;
    let null = served
        .procedures
        .iter()
        .find(|p| p.procedure == Procedure::Null)
        .map(|p| p.served);
    assert_eq!(null, Some(3));
    let sent = a.stats()?;
    assert!(sent.procedures.iter().any(|p| p.procedure == Procedure::GetSuccList && p.sent == 1));
    Ok(())
}

#[tokio::test]
async fn test_challenge() -> Result<()> {
    let a = prepare_vnode(test_config(3))?;
    let b = prepare_vnode(test_config(3))?;
    assert!(a.learn(b.info()).await?);
    assert!(a.locations().is_good(b.id())?);

    let report = a.call(b.info(), &ChallengeSend { nonce: 7 }).await?;
    assert_eq!(report.nonce, 7);
    assert_eq!(report.node.id, b.id());

    // concurrent challenges of one id share a single outcome
    let c = prepare_vnode(test_config(3))?;
    let (x, y) = tokio::join!(a.learn(c.info()), a.learn(c.info()));
    assert!(x? && y?);
    Ok(())
}

#[tokio::test]
async fn test_forged_ids_are_rejected() -> Result<()> {
    let a = prepare_vnode(test_config(3))?;

    // serves under an id not derived from its address
    let forged = Did::random();
    let transport = Arc::new(DummyTransport::new(&next_addr())?);
    let b = VnodeBuilder::new(transport).id(forged).config(test_config(3)).build()?;
    assert!(!a.learn(b.info()).await?);
    assert!(!a.locations().is_good(forged)?);

    let mut lax = test_config(3);
    lax.verify_ids = false;
    let transport = Arc::new(DummyTransport::new(&next_addr())?);
    let c = VnodeBuilder::new(transport).config(lax).build()?;
    assert!(c.learn(b.info()).await?);

    // an id claimed for somebody else's address is unknown there
    let impostor = NodeInfo::with_id(Did::random(), &a.info().addr, 0);
    assert!(!c.learn(&impostor).await?);
    Ok(())
}

#[tokio::test]
async fn test_offline_peer_is_marked_dead() -> Result<()> {
    let a = prepare_vnode(test_config(3))?;
    let b = prepare_vnode(test_config(3))?;
    assert!(a.learn(b.info()).await?);

    DummyTransport::set_online_by_addr(&b.info().addr, false)?;
    assert!(!a.ping(b.info()).await);
    assert!(!a.locations().is_good(b.id())?);
    assert!(a.locations().cached(b.id())?);

    DummyTransport::set_online_by_addr(&b.info().addr, true)?;
    assert!(a.learn(b.info()).await?);
    assert!(a.locations().is_good(b.id())?);
    Ok(())
}

#[tokio::test]
async fn test_range_query() -> Result<()> {
    let ring = gen_stable_ring(4, test_config(2)).await?;
    let (a, b, c) = (&ring[0], &ring[1], &ring[2]);

    match a.call(b.info(), &TestRangeSend { x: c.id(), failed: vec![] }).await? {
        TestRangeReport::InRange { succs } => assert_eq!(succs[0].id, c.id()),
        other => panic!("unexpected reply {other:?}"),
    }
    match a.call(a.info(), &TestRangeSend { x: c.id(), failed: vec![] }).await? {
        TestRangeReport::NotInRange { next } => assert_eq!(next.id, b.id()),
        other => panic!("unexpected reply {other:?}"),
    }
    // a failed successor is skipped
    match a
        .call(b.info(), &TestRangeSend {
            x: c.id(),
            failed: vec![c.id()],
        })
        .await?
    {
        TestRangeReport::InRange { succs } => assert_eq!(succs[0].id, ring[3].id()),
        other => panic!("unexpected reply {other:?}"),
    }
    Ok(())
}
