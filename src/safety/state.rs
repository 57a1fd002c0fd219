/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{CryptoHash, View},
    certificates::QuorumCertificate,
    vertex::Vertex,
};

/// The persisted, per-replica state that vote-safety and commit decisions are made against.
///
/// `last_voted_view >= locked_view >= committed_view` holds at all times, and none of the three ever
/// decreases.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SafetyState {
    /// Highest view this replica has voted in (or will refuse to vote in).
    pub last_voted_view: View,
    /// View of the highest vertex that has been 2-chain confirmed.
    pub locked_view: View,
    /// Id of the vertex at `locked_view`.
    pub locked_vertex_id: CryptoHash,
    /// View of the highest committed vertex.
    pub committed_view: View,
    /// QC with the highest `voted_view` this replica has processed.
    pub highest_qc: QuorumCertificate,
}

impl SafetyState {
    /// The state of a replica that has seen nothing but genesis.
    pub fn genesis() -> SafetyState {
        SafetyState {
            last_voted_view: View::genesis(),
            locked_view: View::genesis(),
            locked_vertex_id: Vertex::genesis().id,
            committed_view: View::genesis(),
            highest_qc: QuorumCertificate::genesis_qc(),
        }
    }
}
