#![warn(missing_docs)]

//! Identifiers on the ring.
//!
//! Every node and every key owns a position on a circle of `2^160` points. A [Did] is
//! such a position, stored as a big-endian [H160] so that the derived [Ord] is the
//! numeric order. All arithmetic is performed modulo `2^160`, so adding to or
//! subtracting from a [Did] never leaves the circle.
//!
//! Since a circle has no natural "smaller than", interval tests are always relative
//! to an anchor. `x.between_right_incl(a, b)` reads as "walking clockwise from `a`,
//! `x` is met strictly after `a` and no later than `b`".

use std::ops::Add;
use std::ops::Deref;
use std::ops::Neg;
use std::ops::Sub;
use std::str::FromStr;

use ethereum_types::H160;
use num_bigint::BigUint;
use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::consts::NBIT;
use crate::error::Error;
use crate::error::Result;

/// A position on the identifier circle R(P) where P = 2^160.
#[derive(Copy, Clone, Eq, Ord, PartialEq, PartialOrd, Debug, Serialize, Deserialize, Hash)]
pub struct Did(H160);

impl std::fmt::Display for Did {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let inner = &self.0;
        write!(f, "0x{inner:x}")
    }
}

impl From<u32> for Did {
    fn from(id: u32) -> Did {
        Self::from(BigUint::from(id))
    }
}

fn modulus() -> BigUint {
    BigUint::from(1u8) << NBIT
}

impl Did {
    /// The zero point of the circle.
    pub fn zero() -> Self {
        Self(H160::zero())
    }

    /// Identifier of the vnode `vnode_num` hosted at `addr`.
    /// The first 160 bits of `SHA-256("{addr}.{vnode_num}")`.
    pub fn from_addr(addr: &str, vnode_num: u32) -> Self {
        let digest = Sha256::digest(format!("{addr}.{vnode_num}").as_bytes());
        Self(H160::from_slice(&digest[..20]))
    }

    /// A uniformly random identifier.
    pub fn random() -> Self {
        Self(H160::from(rand::random::<[u8; 20]>()))
    }

    /// Returns true if `self` was derived from `addr` and `vnode_num` by [Did::from_addr].
    pub fn is_authentic(&self, addr: &str, vnode_num: u32) -> bool {
        vnode_num <= crate::consts::MAX_VNODES && Self::from_addr(addr, vnode_num) == *self
    }

    /// x ∈ (a, b). When a == b the interval is the whole circle except a.
    pub fn between(&self, a: Self, b: Self) -> bool {
        let n = *self;
        if a == b {
            n != a
        } else if a < b {
            n > a && n < b
        } else {
            n > a || n < b
        }
    }

    /// x ∈ [a, b). When a == b only a itself is inside.
    pub fn between_left_incl(&self, a: Self, b: Self) -> bool {
        let n = *self;
        if a == b {
            n == a
        } else if a < b {
            n >= a && n < b
        } else {
            n >= a || n < b
        }
    }

    /// x ∈ (a, b]. When a == b the interval is the whole circle.
    pub fn between_right_incl(&self, a: Self, b: Self) -> bool {
        let n = *self;
        if a == b && n == a {
            true
        } else if a < b {
            n > a && n <= b
        } else {
            n > a || n <= b
        }
    }

    /// x ∈ [a, b].
    pub fn between_both_incl(&self, a: Self, b: Self) -> bool {
        let n = *self;
        if a == b && n == a {
            true
        } else if a < b {
            n >= a && n <= b
        } else {
            n >= a || n <= b
        }
    }

    /// Clockwise distance from `self` to `to`, in `[0, 2^160)`.
    pub fn distance(&self, to: Self) -> BigUint {
        BigUint::from(to - *self)
    }

    /// `self + 2^p`, the start of finger `p`.
    pub fn successor_id(&self, p: usize) -> Self {
        *self + Did::from(BigUint::from(1u8) << p)
    }

    /// `self - 2^p`.
    pub fn predecessor_id(&self, p: usize) -> Self {
        *self - Did::from(BigUint::from(1u8) << p)
    }

    /// `self + 1`.
    pub fn inc(&self) -> Self {
        *self + Did::from(1u32)
    }

    /// `self - 1`.
    pub fn dec(&self) -> Self {
        *self - Did::from(1u32)
    }
}

impl Deref for Did {
    type Target = H160;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Did> for H160 {
    fn from(a: Did) -> Self {
        a.0
    }
}

impl From<Did> for BigUint {
    fn from(did: Did) -> BigUint {
        BigUint::from_bytes_be(did.as_bytes())
    }
}

impl From<BigUint> for Did {
    fn from(a: BigUint) -> Self {
        let ff = a % modulus();
        let va: Vec<u8> = ff.to_bytes_be();
        let mut res = [0u8; 20];
        res[20 - va.len()..].copy_from_slice(&va);
        Self(H160::from(res))
    }
}

impl From<H160> for Did {
    fn from(addr: H160) -> Self {
        Self(addr)
    }
}

impl FromStr for Did {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Ok(Self(H160::from_str(s).map_err(|_| Error::BadHexDid)?))
    }
}

impl Neg for Did {
    type Output = Self;
    fn neg(self) -> Self {
        let ret = modulus() - BigUint::from(self);
        ret.into()
    }
}

impl Add for Did {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        (BigUint::from(self) + BigUint::from(rhs)).into()
    }
}

impl Sub for Did {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        self + (-rhs)
    }
}
