/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`PersistentStore`], the consensus core's typed facade over a [`KVStore`].

use std::io;

use borsh::BorshSerialize;

use crate::{safety::SafetyState, vertex_store::VertexStoreState};

use super::{
    kv_store::{KVGet, KVGetError, KVStore, Key, WriteBatch},
    paths,
};

/// Reads and writes [`SafetyState`] and [`VertexStoreState`].
///
/// Every save is a single [`WriteBatch`], so a crash leaves either the old or the new value in place. Callers
/// must only act on a new state (for example, send a vote) after the corresponding save returned `Ok`.
#[derive(Clone)]
pub struct PersistentStore<K: KVStore>(K);

impl<K: KVStore> PersistentStore<K> {
    pub fn new(kv_store: K) -> Self {
        Self(kv_store)
    }

    pub fn save_safety_state(&mut self, safety_state: &SafetyState) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        set(&mut wb, &paths::SAFETY_STATE, safety_state)?;
        self.write(wb)
    }

    pub fn load_safety_state(&self) -> Result<Option<SafetyState>, PersistenceError> {
        Ok(self.0.safety_state()?)
    }

    pub fn save_vertex_store_state(
        &mut self,
        vertex_store_state: &VertexStoreState,
    ) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        set(&mut wb, &paths::VERTEX_STORE_STATE, vertex_store_state)?;
        self.write(wb)
    }

    /// Save both states in one write batch. A commit goes through here, so that the raised committed view and
    /// the pruned vertex store become durable together, before anything is executed.
    pub fn save_consensus_state(
        &mut self,
        safety_state: &SafetyState,
        vertex_store_state: &VertexStoreState,
    ) -> Result<(), PersistenceError> {
        let mut wb = K::WriteBatch::new();
        set(&mut wb, &paths::SAFETY_STATE, safety_state)?;
        set(&mut wb, &paths::VERTEX_STORE_STATE, vertex_store_state)?;
        self.write(wb)
    }

    pub fn load_vertex_store_state(&self) -> Result<Option<VertexStoreState>, PersistenceError> {
        Ok(self.0.vertex_store_state()?)
    }

    /// Load both states, which are either both absent (a fresh replica) or both present.
    pub fn load_consensus_state(
        &self,
    ) -> Result<Option<(SafetyState, VertexStoreState)>, PersistenceError> {
        match (self.load_safety_state()?, self.load_vertex_store_state()?) {
            (Some(safety_state), Some(vertex_store_state)) => {
                Ok(Some((safety_state, vertex_store_state)))
            }
            (None, None) => Ok(None),
            (None, Some(_)) => Err(KVGetError::ValueExpectedButNotFound {
                key: Key::SafetyState,
            }
            .into()),
            (Some(_), None) => Err(KVGetError::ValueExpectedButNotFound {
                key: Key::VertexStoreState,
            }
            .into()),
        }
    }

    fn write(&mut self, wb: K::WriteBatch) -> Result<(), PersistenceError> {
        self.0.write(wb).map_err(PersistenceError::WriteError)
    }
}

fn set<W: WriteBatch, T: BorshSerialize>(
    wb: &mut W,
    path: &[u8],
    value: &T,
) -> Result<(), PersistenceError> {
    let bytes = value
        .try_to_vec()
        .map_err(PersistenceError::SerializeValueError)?;
    wb.set(path, &bytes);
    Ok(())
}

/// Failure to durably read or write consensus state. Always fatal to the replica, since continuing could
/// mean voting twice in the same view after a restart.
#[derive(Debug)]
pub enum PersistenceError {
    WriteError(io::Error),
    SerializeValueError(io::Error),
    ReadError(KVGetError),
}

impl From<KVGetError> for PersistenceError {
    fn from(value: KVGetError) -> Self {
        PersistenceError::ReadError(value)
    }
}
