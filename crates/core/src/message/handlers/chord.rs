use async_trait::async_trait;

use crate::dht::NodeInfo;
use crate::dht::RoutingTable;
use crate::error::Result;
use crate::message::types::*;
use crate::message::HandleRpc;
use crate::vnode::Vnode;

#[async_trait]
impl HandleRpc<NullSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: NullSend) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<GetSuccessorSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: GetSuccessorSend) -> Result<NodeInfo> {
        self.successors().succ()
    }
}

#[async_trait]
impl HandleRpc<GetPredecessorSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: GetPredecessorSend) -> Result<NodeInfo> {
        self.predecessor().pred()
    }
}

#[async_trait]
impl HandleRpc<FindClosestPredSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: FindClosestPredSend) -> Result<NodeInfo> {
        self.closest_predecessor(msg.x, &msg.failed)
    }
}

#[async_trait]
impl HandleRpc<NotifySend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: NotifySend) -> Result<()> {
        if !self.predecessor().accepts(&msg.node)? {
            return Ok(());
        }
        tracing::debug!("[notify] {} offers itself as predecessor of {}", msg.node.id, self.id());
        // the notifier is waiting for this reply, challenge it afterwards
        let v = self.arc()?;
        tokio::spawn(async move {
            match v.learn(&msg.node).await {
                Ok(true) => {}
                Ok(false) => tracing::info!("[notify] rejected predecessor {}", msg.node.id),
                Err(e) => tracing::error!("[notify] failed to learn {}: {}", msg.node.id, e),
            }
        });
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<AlertSend> for Vnode {
    async fn handle(&self, from: &NodeInfo, msg: AlertSend) -> Result<()> {
        if !self.locations().cached(msg.node.id)? {
            return Ok(());
        }
        tracing::debug!("[alert] {} suspects {}", from.id, msg.node.id);
        let v = self.arc()?;
        tokio::spawn(async move {
            if !v.ping(&msg.node).await {
                tracing::info!("[alert] {} confirmed dead", msg.node.id);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<GetSuccListSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: GetSuccListSend) -> Result<Vec<NodeInfo>> {
        self.successors().reply_list()
    }
}

#[async_trait]
impl HandleRpc<TestRangeSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: TestRangeSend) -> Result<TestRangeReport> {
        let me = self.info();
        let succs: Vec<NodeInfo> = self
            .successors()
            .succs()?
            .into_iter()
            .filter(|s| !msg.failed.contains(&s.id))
            .collect();
        if msg.x == me.id {
            let mut owned = vec![me.clone()];
            owned.extend(succs);
            return Ok(TestRangeReport::InRange { succs: owned });
        }
        let Some(succ) = succs.first() else {
            return Ok(TestRangeReport::InRange {
                succs: vec![me.clone()],
            });
        };
        if msg.x.between_right_incl(me.id, succ.id) {
            return Ok(TestRangeReport::InRange { succs });
        }
        Ok(TestRangeReport::NotInRange {
            next: self.closest_predecessor(msg.x, &msg.failed)?,
        })
    }
}

#[async_trait]
impl HandleRpc<GetFingersSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: GetFingersSend) -> Result<Vec<NodeInfo>> {
        self.routing_table().nodes()
    }
}

#[async_trait]
impl HandleRpc<ChallengeSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: ChallengeSend) -> Result<ChallengeReport> {
        Ok(ChallengeReport {
            nonce: msg.nonce,
            node: self.info().clone(),
        })
    }
}

#[async_trait]
impl HandleRpc<GetFingersExtSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, _msg: GetFingersExtSend) -> Result<FingersExtReport> {
        Ok(FingersExtReport {
            node: self.info().clone(),
            fingers: self.routing_table().nodes()?,
        })
    }
}
