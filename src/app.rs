/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits that the consensus core uses to interact with the replicated application.
//!
//! The core never looks inside a [`Command`]. It obtains commands to propose from a [`Mempool`] and hands
//! committed vertices, in commit order, to a [`StateComputer`].
//!
//! Both traits are expected to be *deterministic* in the sense that matters for replication: given the same
//! sequence of committed vertices, every replica's `StateComputer` must end up in the same state.

use crate::types::{basic::Command, vertex::Vertex};

/// The execution engine that committed vertices are applied to.
pub trait StateComputer: Send + 'static {
    /// Called exactly once for each committed vertex, in commit order (parents before children).
    ///
    /// Committing is irreversible. Returning [`ExecutionOutcome::Rejected`] tells the core that the command
    /// was a no-op for the application, which is logged and published as part of the commit event, but the
    /// vertex remains committed.
    fn execute(&mut self, vertex: &Vertex) -> ExecutionOutcome;
}

/// Result of executing a committed vertex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Accepted,
    Rejected,
}

/// Source of the commands that a leader proposes.
pub trait Mempool: Send + 'static {
    /// Called when this replica is the leader of a view and is about to propose. May return an empty
    /// command if nothing is pending.
    fn get_next_commands(&mut self) -> Command;

    /// Called for every committed vertex's command, after it was executed, so that the mempool stops
    /// offering it.
    fn remove_committed(&mut self, command: &Command);
}
