/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use crate::{
    messages::Vote,
    persistence::{KVStore, PersistenceError, PersistentStore},
    types::{
        basic::{CryptoHash, View},
        certificates::QuorumCertificate,
        crypto_primitives::Keypair,
        vertex::Vertex,
    },
    vertex_store::VertexStoreState,
};

use super::{invariants, state::SafetyState, SafetyViolation};

/// Owner of the replica's [`SafetyState`] and its signing key.
///
/// Every method that changes the state saves it to the [`PersistentStore`] before returning, so anything
/// the caller does with the result (sending a vote, executing a commit) happens after the state is durable.
pub struct SafetyRules<K: KVStore> {
    keypair: Keypair,
    state: SafetyState,
    store: PersistentStore<K>,
}

impl<K: KVStore> SafetyRules<K> {
    pub fn new(keypair: Keypair, state: SafetyState, store: PersistentStore<K>) -> Self {
        Self {
            keypair,
            state,
            store,
        }
    }

    /// Create `SafetyRules` from the state saved in `store`, or from the genesis state if there is none.
    pub fn load(keypair: Keypair, store: PersistentStore<K>) -> Result<Self, PersistenceError> {
        let state = store
            .load_safety_state()?
            .unwrap_or_else(SafetyState::genesis);
        Ok(Self::new(keypair, state, store))
    }

    pub fn state(&self) -> &SafetyState {
        &self.state
    }

    pub fn highest_qc(&self) -> &QuorumCertificate {
        &self.state.highest_qc
    }

    /// Update the highest QC and apply the 2-chain locking rule for a QC that has been validated.
    pub fn process(&mut self, qc: &QuorumCertificate) -> Result<(), PersistenceError> {
        let mut next_state = self.state.clone();

        if invariants::is_newer_qc(&next_state, qc) {
            next_state.highest_qc = qc.clone();
        }

        if let Some((locked_view, locked_vertex_id)) = invariants::lock_to_take(&next_state, qc) {
            next_state.locked_view = locked_view;
            next_state.locked_vertex_id = locked_vertex_id;
            // A vertex at or below the locked view can never pass the lock check, so this keeps
            // `last_voted_view >= locked_view` without ruling out any vote.
            next_state.last_voted_view = next_state.last_voted_view.max(locked_view);
        }

        self.update(next_state)
    }

    /// Sign a vote for `vertex` if doing so is safe. The vote is returned only after the new last voted
    /// view has been persisted.
    pub fn vote_for(&mut self, vertex: &Vertex) -> Result<Vote, VoteError> {
        if let Err(violation) = invariants::safe_to_vote(&self.state, vertex) {
            log::warn!("Refusing to vote for {} at view {}: {:?}", vertex.id, vertex.view, violation);
            return Err(violation.into());
        }

        let mut next_state = self.state.clone();
        next_state.last_voted_view = vertex.view;
        self.update(next_state)?;

        Ok(Vote::new(&self.keypair, vertex))
    }

    /// Apply the 3-chain commit rule to `certified`, the vertex whose QC was just processed. Returns the view
    /// and id of the vertex it commits, if any.
    ///
    /// The decision only takes effect once it is [recorded](Self::record_commit). Until then, calling this
    /// again with the same vertex returns the same answer.
    pub fn committed_vertex(&self, certified: &Vertex) -> Option<(View, CryptoHash)> {
        invariants::vertex_to_commit(&self.state, certified)
    }

    /// Raise the committed view to `committed_view` and save it in one write together with
    /// `vertex_store_state`, the vertex store already pruned to the committed vertex.
    ///
    /// Committed vertices must only be executed after this returns `Ok`. A replica that restarts from the
    /// saved state then never commits the same vertex again.
    pub fn record_commit(
        &mut self,
        committed_view: View,
        vertex_store_state: &VertexStoreState,
    ) -> Result<(), PersistenceError> {
        let mut next_state = self.state.clone();
        next_state.committed_view = next_state.committed_view.max(committed_view);
        self.store
            .save_consensus_state(&next_state, vertex_store_state)?;
        self.state = next_state;
        Ok(())
    }

    fn update(&mut self, next_state: SafetyState) -> Result<(), PersistenceError> {
        if next_state != self.state {
            self.store.save_safety_state(&next_state)?;
            self.state = next_state;
        }
        Ok(())
    }
}

/// Reasons why [`SafetyRules::vote_for`] did not produce a vote.
#[derive(Debug)]
pub enum VoteError {
    /// Voting would break a safety invariant. Not retried.
    SafetyViolation(SafetyViolation),
    /// The new state could not be persisted. Fatal.
    PersistenceFailure(PersistenceError),
}

impl From<SafetyViolation> for VoteError {
    fn from(value: SafetyViolation) -> Self {
        VoteError::SafetyViolation(value)
    }
}

impl From<PersistenceError> for VoteError {
    fn from(value: PersistenceError) -> Self {
        VoteError::PersistenceFailure(value)
    }
}
