//! Chordring: ring membership and routing of a Chord based DHT.
//! --------------
//! - [LocationCache](crate::dht::LocationCache) is the bounded cache of everything a vnode knows about
//!   other members, with liveness and identity tracking.
//! - [SuccessorList](crate::dht::SuccessorList), [PredecessorTracker](crate::dht::PredecessorTracker)
//!   and the finger tables are views over the cache, kept fresh by the
//!   [StabilizeManager](crate::dht::StabilizeManager).
//! - [route](crate::route) provides the iterative, recursive and accordion lookup protocols.
//! - [Vnode](crate::vnode::Vnode) is the ring member façade, serving RPCs over a
//!   [TransportInterface](chordring_transport::core::transport::TransportInterface).
//!
//! # Join
//!
//! A joining vnode only knows the address of an introducer.
//! 1. It asks the address for the identity and the fingers of the vnode listening there,
//!    and challenges that identity.
//! 2. It routes toward its own id through the introducer. The successors of its id become
//!    its successors.
//! 3. It notifies its successor, which adopts it as predecessor. Stabilization does the rest.
//!
//! # Lookup
//!
//! `Vnode::lookup(x)` resolves with the successors of `x`, the path taken and a status.
//! A lookup never resolves with an error once routing started: peers that fail are retried
//! around, and the status tells whether the result is usable.
//!
//! ```txt
//! path: [A, B, C] successors: [D, E, F] status: Ok
//! ```

pub mod config;
pub mod consts;
pub mod dht;
pub mod error;
pub mod message;
pub mod route;
pub mod stats;
#[cfg(test)]
mod tests;
pub mod vnode;
