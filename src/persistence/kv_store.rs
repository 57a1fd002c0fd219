/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable persistence of the consensus core's state.
//!
//! Library users provide the storage engine by implementing [`KVStore`]. The typed getters on [`KVGet`] are
//! provided and deserialize values from the [paths](super::paths) the consensus core writes to.

use std::io;

use borsh::BorshDeserialize;

use crate::{safety::SafetyState, vertex_store::VertexStoreState};

use super::paths;

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch;

    /// Atomically apply every insertion and deletion in `wb`. Must not return until the writes are durable.
    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), io::Error>;

    fn clear(&mut self) -> Result<(), io::Error>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn safety_state(&self) -> Result<Option<SafetyState>, KVGetError> {
        get_and_deserialize(self, &paths::SAFETY_STATE, Key::SafetyState)
    }

    fn vertex_store_state(&self) -> Result<Option<VertexStoreState>, KVGetError> {
        get_and_deserialize(self, &paths::VERTEX_STORE_STATE, Key::VertexStoreState)
    }
}

fn get_and_deserialize<K: KVGet + ?Sized, T: BorshDeserialize>(
    kv: &K,
    path: &[u8],
    key: Key,
) -> Result<Option<T>, KVGetError> {
    match kv.get(path) {
        Some(bytes) => T::deserialize(&mut bytes.as_slice())
            .map(Some)
            .map_err(|err| KVGetError::DeserializeValueError { key, source: err }),
        None => Ok(None),
    }
}

/// Error when trying to read a value corresponding to a given key from the [`KVStore`].
#[derive(Debug)]
pub enum KVGetError {
    /// A value was expected to be stored under `key`, but none was found.
    ValueExpectedButNotFound { key: Key },
    /// The bytes stored under `key` could not be deserialized into the expected type.
    DeserializeValueError { key: Key, source: io::Error },
}

/// The keys whose values can be read from the [`KVStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    SafetyState,
    VertexStoreState,
}
