use async_trait::async_trait;

use crate::dht::NodeInfo;
use crate::error::Result;
use crate::message::types::*;
use crate::message::HandleRpc;
use crate::route::accordion;
use crate::route::recursive;
use crate::vnode::Vnode;

#[async_trait]
impl HandleRpc<RouteSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: RouteSend) -> Result<()> {
        let v = self.arc()?;
        tokio::spawn(async move {
            let route_id = msg.route_id;
            if let Err(e) = recursive::forward(v, msg).await {
                tracing::error!("[route] failed to forward route {}: {}", route_id, e);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<RouteCompleteSend> for Vnode {
    async fn handle(&self, from: &NodeInfo, msg: RouteCompleteSend) -> Result<()> {
        tracing::debug!("[route] {} completed by {} with {:?}", msg.route_id, from.id, msg.status);
        self.pending().complete(msg)?;
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<RoutePenultimateSend> for Vnode {
    async fn handle(&self, _from: &NodeInfo, msg: RoutePenultimateSend) -> Result<()> {
        let v = self.arc()?;
        tokio::spawn(async move {
            let route_id = msg.route_id;
            if let Err(e) = recursive::penultimate(v, msg).await {
                tracing::error!("[route] failed to finish route {}: {}", route_id, e);
            }
        });
        Ok(())
    }
}

#[async_trait]
impl HandleRpc<AccordionRouteSend> for Vnode {
    async fn handle(&self, from: &NodeInfo, msg: AccordionRouteSend) -> Result<Vec<NodeInfo>> {
        let prev = msg.path.last().map(|n| n.id).unwrap_or(from.id);
        let gap = accordion::fill_gap(self, prev, msg.x)?;
        if self.accordion().seen(msg.route_id)? {
            tracing::debug!("[accordion] drop duplicated route {}", msg.route_id);
            return Ok(gap);
        }
        let v = self.arc()?;
        tokio::spawn(async move {
            let route_id = msg.route_id;
            if let Err(e) = accordion::forward(v, msg).await {
                tracing::error!("[accordion] failed to forward route {}: {}", route_id, e);
            }
        });
        Ok(gap)
    }
}
