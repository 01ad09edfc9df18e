#![warn(missing_docs)]
//! This module defines the RPC messages spoken between ring members.
//! Every procedure follows the Send/Report pattern: a `xxxSend` argument type is bound
//! to its reply type through the [Rpc] trait.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::dht::Did;
use crate::dht::NodeInfo;
use crate::error::Error;
use crate::error::Result;
use crate::route::RouteStatus;

/// Procedure numbers of the ring protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Procedure {
    /// Liveness probe.
    Null = 0,
    /// Ask for the first successor.
    GetSuccessor = 1,
    /// Ask for the predecessor.
    GetPredecessor = 2,
    /// Ask for the closest predecessor of a key.
    FindClosestPred = 3,
    /// Tell a node about a possible predecessor.
    Notify = 4,
    /// Tell a node that another one looks dead.
    Alert = 5,
    /// Ask for the successor list.
    GetSuccList = 6,
    /// Ask whether a key falls between a node and its successor.
    TestRangeFindClosestPred = 7,
    /// Ask for the finger table.
    GetFingers = 8,
    /// Identity challenge.
    Challenge = 9,
    /// Ask for the finger table with the replying node's identity.
    GetFingersExt = 10,
    /// One hop of a recursive lookup.
    Route = 20,
    /// Final answer of a recursive lookup, sent to its origin.
    RouteComplete = 21,
    /// Hand a recursive lookup to the penultimate hop.
    RoutePenultimate = 22,
    /// One hop of a parallel lookup.
    AccordionRoute = 23,
}

impl Procedure {
    /// Every procedure, in number order.
    pub fn all() -> &'static [Procedure] {
        use Procedure::*;
        &[
            Null,
            GetSuccessor,
            GetPredecessor,
            FindClosestPred,
            Notify,
            Alert,
            GetSuccList,
            TestRangeFindClosestPred,
            GetFingers,
            Challenge,
            GetFingersExt,
            Route,
            RouteComplete,
            RoutePenultimate,
            AccordionRoute,
        ]
    }
}

impl From<Procedure> for u32 {
    fn from(p: Procedure) -> u32 {
        p as u32
    }
}

impl TryFrom<u32> for Procedure {
    type Error = Error;
    fn try_from(n: u32) -> Result<Self> {
        Self::all()
            .iter()
            .find(|p| u32::from(**p) == n)
            .copied()
            .ok_or(Error::Unavailable(n))
    }
}

/// The `Rpc` trait binds an argument type to its procedure and its reply.
pub trait Rpc: Serialize + DeserializeOwned + Send + Sync {
    /// Procedure number carried on the wire.
    const PROCEDURE: Procedure;
    /// Type of the reply.
    type Reply: Serialize + DeserializeOwned + Send;
}

/// Envelope of every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Procedure number.
    pub procno: u32,
    /// Target vnode. `None` is served by the first vnode at the address, which is how
    /// a joining node reaches an introducer it knows only by address.
    pub to: Option<Did>,
    /// The caller.
    pub from: NodeInfo,
    /// Encoded arguments.
    pub args: Bytes,
}

/// Envelope of every reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcReply {
    /// Encoded reply.
    Ok(Bytes),
    /// The procedure number is not served.
    Unavailable(u32),
    /// No vnode with that id lives at the address.
    UnknownNode(Did),
    /// The handler failed.
    Failed(String),
}

/// Encode a value with bincode.
pub fn encode<T: Serialize>(v: &T) -> Result<Bytes> {
    bincode::serialize(v)
        .map(Bytes::from)
        .map_err(Error::BincodeSerialize)
}

/// Decode a value with bincode.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(Error::BincodeDeserialize)
}

macro_rules! impl_rpc {
    ($send:ty, $proc:ident, $reply:ty) => {
        impl Rpc for $send {
            const PROCEDURE: Procedure = Procedure::$proc;
            type Reply = $reply;
        }
    };
}

/// Liveness probe.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct NullSend;

/// Ask for the first successor of the callee.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GetSuccessorSend;

/// Ask for the predecessor of the callee.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GetPredecessorSend;

/// Ask for the best known predecessor of `x`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FindClosestPredSend {
    /// The key.
    pub x: Did,
    /// Nodes the caller already knows to be unreachable.
    pub failed: Vec<Did>,
}

/// Offer `node` as the predecessor of the callee.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotifySend {
    /// The candidate.
    pub node: NodeInfo,
}

/// Warn the callee that `node` did not answer.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AlertSend {
    /// The suspect.
    pub node: NodeInfo,
}

/// Ask for the successor list of the callee.
/// The reply starts with the callee itself.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GetSuccListSend;

/// Ask whether `x` lies between the callee and its successor.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TestRangeSend {
    /// The key.
    pub x: Did,
    /// Nodes the caller already knows to be unreachable.
    pub failed: Vec<Did>,
}

/// Reply of [TestRangeSend].
#[derive(Debug, Deserialize, Serialize, Clone)]
pub enum TestRangeReport {
    /// `x` is owned by the first of `succs`.
    InRange {
        /// Successor list of the callee.
        succs: Vec<NodeInfo>,
    },
    /// `x` is beyond the successor, `next` is the best known predecessor.
    NotInRange {
        /// Next hop.
        next: NodeInfo,
    },
}

/// Ask for the distinct fingers of the callee.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GetFingersSend;

/// Ask the callee to prove its identity.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChallengeSend {
    /// Random value to echo back.
    pub nonce: u64,
}

/// Reply of [ChallengeSend].
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChallengeReport {
    /// Echo of the nonce.
    pub nonce: u64,
    /// The identity claimed by the callee.
    pub node: NodeInfo,
}

/// Ask for fingers along with the identity of the callee.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct GetFingersExtSend;

/// Reply of [GetFingersExtSend].
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FingersExtReport {
    /// The callee.
    pub node: NodeInfo,
    /// Its distinct fingers.
    pub fingers: Vec<NodeInfo>,
}

/// One hop of a recursive lookup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouteSend {
    /// Lookup id, unique at the origin.
    pub route_id: u64,
    /// Node waiting for the answer.
    pub origin: NodeInfo,
    /// The key.
    pub x: Did,
    /// Number of successors wanted.
    pub m: usize,
    /// Hops taken so far, the origin first.
    pub path: Vec<NodeInfo>,
    /// Hops retried so far.
    pub retries: u32,
}

/// Answer of a recursive or parallel lookup, sent to its origin.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouteCompleteSend {
    /// Lookup id.
    pub route_id: u64,
    /// Successors of the key.
    pub succs: Vec<NodeInfo>,
    /// Hops taken.
    pub path: Vec<NodeInfo>,
    /// Outcome.
    pub status: RouteStatus,
    /// Hops retried.
    pub retries: u32,
}

/// Ask the penultimate hop to finish a recursive lookup.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RoutePenultimateSend {
    /// Lookup id.
    pub route_id: u64,
    /// Node waiting for the answer.
    pub origin: NodeInfo,
    /// The key.
    pub x: Did,
    /// Number of successors wanted.
    pub m: usize,
    /// Hops taken so far.
    pub path: Vec<NodeInfo>,
    /// Successors already known by the sender.
    pub successors: Vec<NodeInfo>,
    /// Hops retried so far.
    pub retries: u32,
}

/// One hop of a parallel lookup. The reply carries nodes that fill the gap between
/// the sender and the key.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccordionRouteSend {
    /// Lookup id.
    pub route_id: u64,
    /// Node waiting for the answer.
    pub origin: NodeInfo,
    /// The key.
    pub x: Did,
    /// Number of successors wanted.
    pub m: usize,
    /// Hops taken so far.
    pub path: Vec<NodeInfo>,
    /// Hops retried so far.
    pub retries: u32,
}

impl_rpc!(NullSend, Null, ());
impl_rpc!(GetSuccessorSend, GetSuccessor, NodeInfo);
impl_rpc!(GetPredecessorSend, GetPredecessor, NodeInfo);
impl_rpc!(FindClosestPredSend, FindClosestPred, NodeInfo);
impl_rpc!(NotifySend, Notify, ());
impl_rpc!(AlertSend, Alert, ());
impl_rpc!(GetSuccListSend, GetSuccList, Vec<NodeInfo>);
impl_rpc!(TestRangeSend, TestRangeFindClosestPred, TestRangeReport);
impl_rpc!(GetFingersSend, GetFingers, Vec<NodeInfo>);
impl_rpc!(ChallengeSend, Challenge, ChallengeReport);
impl_rpc!(GetFingersExtSend, GetFingersExt, FingersExtReport);
impl_rpc!(RouteSend, Route, ());
impl_rpc!(RouteCompleteSend, RouteComplete, ());
impl_rpc!(RoutePenultimateSend, RoutePenultimate, ());
impl_rpc!(AccordionRouteSend, AccordionRoute, Vec<NodeInfo>);
