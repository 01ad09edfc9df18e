#![warn(missing_docs)]
//! This module implements the dispatch of incoming RPCs.
//!
//! A request names its procedure by number. [Vnode::dispatch] maps the number to the
//! argument type and hands the decoded arguments to the matching [HandleRpc]
//! implementation. Numbers outside of [Procedure] are rejected with
//! [Error::Unavailable], never ignored.

use async_trait::async_trait;
use bytes::Bytes;

use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::message::types::*;
use crate::vnode::Vnode;

/// Operator and handler of the ring maintenance procedures
pub mod chord;
/// Operator and handler of the lookup procedures
pub mod route;

/// Generic trait for handle message, inspired by Actor-Model.
#[async_trait]
pub trait HandleRpc<T: Rpc> {
    /// Serve `msg` sent by `from`.
    async fn handle(&self, from: &NodeInfo, msg: T) -> Result<T::Reply>;
}

impl Vnode {
    async fn serve<T>(&self, req: &RpcRequest) -> Result<Bytes>
    where
        T: Rpc + 'static,
        Vnode: HandleRpc<T>,
    {
        let msg: T = decode(&req.args)?;
        self.stats_counters().incr_served(T::PROCEDURE);
        let reply = HandleRpc::<T>::handle(self, &req.from, msg).await?;
        encode(&reply)
    }

    /// Decode the arguments of `req` and run its handler.
    pub(crate) async fn dispatch(&self, req: &RpcRequest) -> Result<Bytes> {
        let proc = Procedure::try_from(req.procno)?;
        tracing::trace!("[dispatch] {:?} from {}", proc, req.from.id);
        match proc {
            Procedure::Null => self.serve::<NullSend>(req).await,
            Procedure::GetSuccessor => self.serve::<GetSuccessorSend>(req).await,
            Procedure::GetPredecessor => self.serve::<GetPredecessorSend>(req).await,
            Procedure::FindClosestPred => self.serve::<FindClosestPredSend>(req).await,
            Procedure::Notify => self.serve::<NotifySend>(req).await,
            Procedure::Alert => self.serve::<AlertSend>(req).await,
            Procedure::GetSuccList => self.serve::<GetSuccListSend>(req).await,
            Procedure::TestRangeFindClosestPred => self.serve::<TestRangeSend>(req).await,
            Procedure::GetFingers => self.serve::<GetFingersSend>(req).await,
            Procedure::Challenge => self.serve::<ChallengeSend>(req).await,
            Procedure::GetFingersExt => self.serve::<GetFingersExtSend>(req).await,
            Procedure::Route => self.serve::<RouteSend>(req).await,
            Procedure::RouteComplete => self.serve::<RouteCompleteSend>(req).await,
            Procedure::RoutePenultimate => self.serve::<RoutePenultimateSend>(req).await,
            Procedure::AccordionRoute => self.serve::<AccordionRouteSend>(req).await,
        }
    }

    /// Serve a request envelope. Never fails: errors are folded into the reply.
    pub(crate) async fn serve_request(&self, req: RpcRequest) -> RpcReply {
        if let Some(to) = req.to {
            if to != self.info().id {
                tracing::debug!("[dispatch] request for unknown vnode {}", to);
                return RpcReply::UnknownNode(to);
            }
        }
        match self.dispatch(&req).await {
            Ok(body) => RpcReply::Ok(body),
            Err(Error::Unavailable(n)) => {
                tracing::warn!("[dispatch] unavailable procedure {} from {}", n, req.from.addr);
                RpcReply::Unavailable(n)
            }
            Err(e) => {
                tracing::debug!("[dispatch] procedure {} failed: {}", req.procno, e);
                RpcReply::Failed(e.to_string())
            }
        }
    }
}
