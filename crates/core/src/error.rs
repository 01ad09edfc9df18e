//! Error of chordring_core

use crate::dht::Did;
use crate::message::Procedure;

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors collections in chordring-core.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("RPC to {0} failed")]
    RpcFailure(Did),

    #[error("Transport error: {0}")]
    Transport(#[from] chordring_transport::error::Error),

    #[error("No node is responsible for {0}")]
    NoSuchEntry(Did),

    #[error("Chord error: {0}")]
    ChordError(String),

    #[error("Peer {peer} returned a hop that is not closer to {target}")]
    ProtocolViolation { peer: Did, target: Did },

    #[error("Procedure {0} is unavailable")]
    Unavailable(u32),

    #[error("Vnode {0} is unknown at the remote endpoint")]
    UnknownNode(Did),

    #[error("Remote rejected {0:?}: {1}")]
    RemoteError(Procedure, String),

    #[error("Bincode serialization error")]
    BincodeSerialize(#[source] bincode::Error),

    #[error("Bincode deserialization error")]
    BincodeDeserialize(#[source] bincode::Error),

    #[error("Location cache lock poisoned")]
    LocationCacheLockError,

    #[error("Routing table lock poisoned")]
    RoutingLockError,

    #[error("Stabilizer lock poisoned")]
    StabilizerLockError,

    #[error("Node {0} failed the identity challenge")]
    ChallengeFailed(Did),

    #[error("Node {0} is not in the location cache")]
    LocationNotFound(Did),

    #[error("Invalid hexadecimal did")]
    BadHexDid,

    #[error("Invalid node address: {0}")]
    InvalidAddress(String),

    #[error("Lookup {0} was cancelled")]
    RouteCancelled(u64),

    #[error("Stabilizer has been stopped")]
    StabilizerStopped,

    #[error("Vnode has been dropped")]
    VnodeDropped,
}
