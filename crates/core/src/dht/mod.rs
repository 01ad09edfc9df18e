#![warn(missing_docs)]
//! Ring membership of a vnode,
//! which is based on CHORD, ref: <https://pdos.csail.mit.edu/papers/ton:chord/paper-ton.pdf>
//! With high probability, the number of nodes that must be contacted to find a successor in an N-node network is O(log N).
//!
//! Everything a vnode knows about other members lives in the [LocationCache]. The
//! maintainers ([SuccessorList], [PredecessorTracker], [FingerTable] and
//! [PnsFingerTable]) are views over it plus the bookkeeping of their stabilization
//! rounds, driven by the [StabilizeManager].

pub mod did;
pub mod finger;
pub mod finger_pns;
pub mod location;
pub mod predecessor;
pub mod stabilization;
pub mod successor;
pub mod types;

pub use did::Did;
pub use finger::FingerTable;
pub use finger_pns::PnsFingerTable;
pub use location::ChallengeTicket;
pub use location::Location;
pub use location::LocationCache;
pub use location::LocationRef;
pub use location::NodeInfo;
pub use location::Pin;
pub use predecessor::PredecessorTracker;
pub use stabilization::Cadence;
pub use stabilization::RoundState;
pub use stabilization::Stabilizable;
pub use stabilization::StabilizeManager;
pub use successor::MergePlan;
pub use successor::SuccessorList;
pub use types::FingerRoute;
pub use types::RoutingTable;
