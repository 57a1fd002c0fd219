/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! View progression, view timeouts, and leader selection.
//!
//! ## View changes
//!
//! A replica leaves its current view `v` in one of two ways:
//! 1. **On a QC**: obtaining a QC for `v` or a later view moves the replica to `qc.voted_view + 1`. This is the
//!    happy path: the leader of `v + 1` forms the QC from the votes for `v`'s proposal and proposes right away.
//! 2. **On a timeout**: if `v` ends without a QC, the replica moves to `v + 1` and sends a
//!    [`NewView`](crate::messages::NewView) carrying its highest QC to the leader of `v + 1`. The leader
//!    proposes once it has collected new views carrying a quorum of power, extending the highest QC it knows.
//!
//! Note that a view change on a timeout leaves a gap in the views of the chain: the next vertex's parent is not
//! in the directly preceding view. Gaps break the contiguity that locking and committing require, so a
//! timeout restarts the chain of consecutive views that a commit needs.
//!
//! ## Leader selection
//!
//! The leader of each view is chosen by [`ProposerElection`] with Interleaved Weighted Round Robin, so that
//! validators lead views in proportion to their power.

pub mod implementation;

pub mod new_views;

pub mod proposer_election;

pub mod timeouts;

pub use implementation::{Pacemaker, PacemakerError};
pub use new_views::PendingNewViews;
pub use proposer_election::ProposerElection;
pub use timeouts::{TimeoutPolicy, TimeoutPolicyError};
