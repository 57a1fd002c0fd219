/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Vote-safety and commit decisions.
//!
//! [`SafetyRules`] owns the replica's persisted [`SafetyState`] and exposes the three decisions that the
//! rest of the core relies on for safety:
//! - [`process`](SafetyRules::process): track the highest QC and apply the 2-chain locking rule.
//! - [`vote_for`](SafetyRules::vote_for): sign a vote only if doing so cannot contradict an earlier vote
//!   or the lock.
//! - [`committed_vertex`](SafetyRules::committed_vertex): apply the 3-chain commit rule, which takes effect
//!   through [`record_commit`](SafetyRules::record_commit).
//!
//! The rules themselves are pure functions over the state, defined in [`invariants`].

pub mod invariants;

pub mod rules;

pub mod state;

pub use rules::{SafetyRules, VoteError};
pub use state::SafetyState;

use crate::types::basic::View;

/// A vote that would break a safety invariant. Always rejected locally and never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyViolation {
    /// The vertex is not above the last view this replica voted in.
    AlreadyVoted {
        vertex_view: View,
        last_voted_view: View,
    },
    /// The vertex extends a branch that conflicts with the vertex this replica is locked on.
    ConflictsWithLock {
        vertex_view: View,
        grandparent_view: View,
        locked_view: View,
    },
}
