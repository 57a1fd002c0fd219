/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{certificates::QuorumCertificate, vertex::Vertex};

/// The persisted form of a [`VertexStore`](super::VertexStore).
///
/// `vertices` holds every vertex in the store other than the root, in ascending order of view, so that
/// re-inserting them in order always finds each vertex's parent already present.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VertexStoreState {
    pub root: Vertex,
    pub vertices: Vec<Vertex>,
    pub highest_qc: QuorumCertificate,
}

impl VertexStoreState {
    /// The state of a store that holds nothing but the genesis vertex.
    pub fn genesis() -> VertexStoreState {
        VertexStoreState {
            root: Vertex::genesis(),
            vertices: Vec::new(),
            highest_qc: QuorumCertificate::genesis_qc(),
        }
    }
}
