/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence of the consensus core's crash-critical state.
//!
//! Two values survive restarts:
//! 1. The [`SafetyState`](crate::safety::SafetyState), saved by [`SafetyRules`](crate::safety::SafetyRules)
//!    before any vote leaves the replica, so a restarted replica never votes twice in a view.
//! 2. The [`VertexStoreState`](crate::vertex_store::VertexStoreState), saved after every commit.
//!
//! The storage engine itself is pluggable through the [`KVStore`] trait.

pub mod kv_store;

pub mod paths;

pub mod store;

pub use kv_store::{KVGet, KVGetError, KVStore, Key, WriteBatch};
pub use store::{PersistenceError, PersistentStore};
