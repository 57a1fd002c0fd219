/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`QuorumCertificate`] type and the digest that votes and certificates are signed over.
//!
//! A QC proves that validators carrying a quorum of stake voted for `voted_vertex_id` at `voted_view`. Every
//! QC also names the voted vertex's parent, so a vertex's QC gives its holder two hops of ancestry
//! (parent and grandparent) without consulting the [vertex store](crate::vertex_store).

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    basic::{CryptoHash, SignatureSet, TotalPower, View},
    crypto_primitives::{hash_of, verify},
    validators::ValidatorSet,
    vertex::Vertex,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct QuorumCertificate {
    pub voted_view: View,
    pub voted_vertex_id: CryptoHash,
    pub parent_view: View,
    pub parent_vertex_id: CryptoHash,
    pub signatures: SignatureSet,
}

impl QuorumCertificate {
    /// The QC certifying the [genesis vertex](Vertex::genesis). It carries no signatures.
    pub fn genesis_qc() -> QuorumCertificate {
        let genesis_id = Vertex::genesis().id;
        QuorumCertificate {
            voted_view: View::genesis(),
            voted_vertex_id: genesis_id,
            parent_view: View::genesis(),
            parent_vertex_id: genesis_id,
            signatures: SignatureSet::init(),
        }
    }

    /// The QC embedded in the genesis vertex. It references the all-zero hash since genesis has no parent.
    pub(crate) fn pre_genesis_qc() -> QuorumCertificate {
        QuorumCertificate {
            voted_view: View::genesis(),
            voted_vertex_id: CryptoHash::zero(),
            parent_view: View::genesis(),
            parent_vertex_id: CryptoHash::zero(),
            signatures: SignatureSet::init(),
        }
    }

    pub fn is_genesis_qc(&self) -> bool {
        self.voted_view.is_genesis() && self.parent_view.is_genesis() && self.signatures.is_empty()
    }

    /// Whether the voted vertex's parent sits in the view directly before it.
    pub fn is_direct(&self) -> bool {
        self.parent_view.directly_precedes(self.voted_view)
    }

    /// The digest that every signature in this QC is over.
    pub fn vote_digest(&self) -> CryptoHash {
        vote_digest(
            self.voted_view,
            &self.voted_vertex_id,
            self.parent_view,
            &self.parent_vertex_id,
        )
    }

    /// Checks whether the QC is well-formed and its signatures carry a quorum of `validator_set`'s power.
    ///
    /// The genesis QC is accepted only if it is exactly [`QuorumCertificate::genesis_qc`].
    pub fn is_correct(&self, validator_set: &ValidatorSet) -> bool {
        if self.is_genesis_qc() {
            return *self == QuorumCertificate::genesis_qc();
        }

        if self.parent_view >= self.voted_view || self.signatures.len() != validator_set.len() {
            return false;
        }

        let quorum = match validator_set.quorum() {
            Ok(quorum) => quorum,
            Err(_) => return false,
        };

        let digest = self.vote_digest();
        let mut total_power = TotalPower::new(0);
        for (signature, (signer, power)) in self
            .signatures
            .iter()
            .zip(validator_set.validators_and_powers())
        {
            if let Some(signature) = signature {
                if !verify(&signer, &digest, signature) {
                    return false;
                }
                total_power += power;
            }
        }

        total_power >= quorum
    }
}

/// The digest that validators sign when voting for the vertex `vertex_id` (whose parent is
/// `parent_vertex_id`) at `view`.
pub fn vote_digest(
    view: View,
    vertex_id: &CryptoHash,
    parent_view: View,
    parent_vertex_id: &CryptoHash,
) -> CryptoHash {
    hash_of(&(view, *vertex_id, parent_view, *parent_vertex_id))
}
