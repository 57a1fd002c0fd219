/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definition of the [`Vertex`] type, the unit of the replicated chain.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    basic::{Command, CryptoHash, View},
    certificates::QuorumCertificate,
    crypto_primitives::hash_of,
    validators::ValidatorSet,
};

/// A proposed unit of the chain: a view, a command payload, and a QC for its parent vertex.
///
/// A vertex's `id` is the SHA-256 hash of the Borsh encoding of `(view, command, qc)`. Construct vertices
/// with [`Vertex::new`] so that the id is always computed from the other fields.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Vertex {
    pub view: View,
    pub command: Command,
    pub qc: QuorumCertificate,
    pub id: CryptoHash,
}

impl Vertex {
    pub fn new(view: View, command: Command, qc: QuorumCertificate) -> Vertex {
        let id = Vertex::hash(view, &command, &qc);
        Vertex {
            view,
            command,
            qc,
            id,
        }
    }

    pub fn genesis() -> Vertex {
        Vertex::new(
            View::genesis(),
            Command::empty(),
            QuorumCertificate::pre_genesis_qc(),
        )
    }

    pub fn hash(view: View, command: &Command, qc: &QuorumCertificate) -> CryptoHash {
        hash_of(&(view, command.clone(), qc.clone()))
    }

    pub fn is_genesis(&self) -> bool {
        self.view.is_genesis()
    }

    pub fn parent_id(&self) -> CryptoHash {
        self.qc.voted_vertex_id
    }

    pub fn parent_view(&self) -> View {
        self.qc.voted_view
    }

    /// Checks whether:
    /// 1. The vertex's id is the hash of its contents,
    /// 2. Its view is above the view of its parent, and
    /// 3. Its QC is [correct](QuorumCertificate::is_correct).
    pub fn is_correct(&self, validator_set: &ValidatorSet) -> bool {
        if self.id != Vertex::hash(self.view, &self.command, &self.qc) {
            return false;
        }

        if self.is_genesis() {
            return *self == Vertex::genesis();
        }

        self.view > self.qc.voted_view && self.qc.is_correct(validator_set)
    }
}
