/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! "Inert" types that are sent around and inspected, but have no active behavior.
//!
//! These types follow the newtype pattern, and the API for using them is defined in this module.

use borsh::{BorshDeserialize, BorshSerialize};
use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{Add, AddAssign, Sub},
};

/// A consensus round. Views are totally ordered and [`View::genesis`] is reserved for the genesis vertex.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct View(u64);

impl View {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn genesis() -> Self {
        Self(0)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn is_genesis(&self) -> bool {
        self.0 == 0
    }

    /// The view directly after this one.
    pub const fn next(&self) -> View {
        View(self.0 + 1)
    }

    /// Whether `self` is the immediate predecessor of `other`, i.e., there is no gap between the two views.
    pub fn directly_precedes(&self, other: View) -> bool {
        self.0.checked_add(1) == Some(other.0)
    }
}

impl Display for View {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Add<u64> for View {
    type Output = View;

    fn add(self, rhs: u64) -> Self::Output {
        View(self.0.add(rhs))
    }
}

impl Sub<View> for View {
    type Output = u64;

    /// Number of views between `rhs` and `self`, saturating at zero.
    fn sub(self, rhs: View) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// The SHA-256 hash identifying a [vertex](crate::types::vertex::Vertex), or a digest that is signed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero hash. Referenced by the QC embedded in the genesis vertex, which has no parent.
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0[0..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// The opaque payload of a vertex, supplied by the [mempool](crate::app::Mempool).
#[derive(Clone, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Command(Vec<u8>);

impl Command {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Command({} bytes)", self.0.len())
    }
}

/// Stake weight of a validator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Power(u64);

impl Power {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

/// Total power obtained via summing up the [`Power`]s of a set of validators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, BorshDeserialize, BorshSerialize)]
pub struct TotalPower(u128);

impl TotalPower {
    pub const fn new(int: u128) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u128 {
        self.0
    }
}

impl AddAssign<Power> for TotalPower {
    fn add_assign(&mut self, rhs: Power) {
        self.0.add_assign(rhs.0 as u128)
    }
}

/// Signature represented in bytes.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureBytes({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// Set of signatures, represented as a vector with the size of a given validator set.
/// The value at a particular position is either:
/// 1. None: if a valid signature from the validator at the given position has not been obtained, or
/// 2. Some(signature_bytes): if signature_bytes has been obtained from the validator at the given position.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureSet(Vec<Option<SignatureBytes>>);

impl SignatureSet {
    pub const fn init() -> Self {
        Self(Vec::new())
    }

    pub fn new(len: usize) -> Self {
        Self(vec![None; len])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Option<SignatureBytes>> {
        self.0.iter()
    }

    pub fn get(&self, pos: usize) -> Option<&SignatureBytes> {
        self.0.get(pos).and_then(|signature| signature.as_ref())
    }

    pub(crate) fn set(&mut self, pos: usize, value: Option<SignatureBytes>) {
        if let Some(slot) = self.0.get_mut(pos) {
            *slot = value
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of positions holding a signature.
    pub fn count(&self) -> usize {
        self.0.iter().filter(|signature| signature.is_some()).count()
    }
}

/// Maximum number of messages held by a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSize(usize);

impl BufferSize {
    pub const fn new(int: usize) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> usize {
        self.0
    }
}
