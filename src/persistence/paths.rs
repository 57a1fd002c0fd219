/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Keys under which the consensus core's state is stored in the [`KVStore`](super::KVStore).
//!
//! Each value is the Borsh encoding of the named type.

/// [`SafetyState`](crate::safety::SafetyState)
pub const SAFETY_STATE: [u8; 1] = [0];

/// [`VertexStoreState`](crate::vertex_store::VertexStoreState)
pub const VERTEX_STORE_STATE: [u8; 1] = [1];
