/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The speculative tree of uncommitted vertices, and the protocol for fetching missing ancestors.
//!
//! ## Lifecycle of a vertex
//!
//! A vertex enters the [`VertexStore`] when it is received in a proposal (or fetched through sync) and its
//! parent is already stored. From there, it reaches exactly one of two terminal states:
//! - **Committed**: the vertex, or a descendant of it, is committed. The vertex is executed through the
//!   [`StateComputer`](crate::app::StateComputer) and, unless it is the newly committed vertex itself,
//!   leaves the store.
//! - **Pruned**: a vertex on a conflicting branch is committed. The vertex is removed without being executed.
//!
//! The most recently committed vertex stays in the store as its root.

pub mod state;

pub mod store;

pub(crate) mod sync;

pub use state::VertexStoreState;
pub use store::{CommitOutcome, PendingExecution, VertexStore, VertexStoreError};
