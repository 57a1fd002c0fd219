/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types and traits that are used across multiple components of the consensus core.
//!
//! Types specific to a single component, e.g., [`SafetyState`](crate::safety::SafetyState), are defined
//! in the module of that component.

pub mod basic;

pub mod certificates;

pub mod crypto_primitives;

pub mod signed_messages;

pub mod validators;

pub mod vertex;

#[cfg(test)]
mod tests {
    use super::{
        basic::{Command, View},
        certificates::QuorumCertificate,
        validators::ValidatorSet,
        vertex::Vertex,
    };

    #[test]
    fn genesis_vertex_and_qc_are_correct() {
        let validator_set = ValidatorSet::new();
        let genesis = Vertex::genesis();
        let genesis_qc = QuorumCertificate::genesis_qc();

        assert!(genesis.is_correct(&validator_set));
        assert!(genesis_qc.is_correct(&validator_set));
        assert!(genesis_qc.is_genesis_qc());
        assert_eq!(genesis_qc.voted_vertex_id, genesis.id);
    }

    #[test]
    fn tampered_vertex_is_not_correct() {
        let validator_set = ValidatorSet::new();
        let mut vertex = Vertex::new(View::new(1), Command::new(vec![1, 2, 3]), QuorumCertificate::genesis_qc());
        assert!(vertex.is_correct(&validator_set));

        vertex.command = Command::new(vec![4, 5, 6]);
        assert!(!vertex.is_correct(&validator_set));
    }

    #[test]
    fn vertex_view_must_exceed_its_parents() {
        let validator_set = ValidatorSet::new();
        let vertex = Vertex::new(View::genesis(), Command::new(vec![7]), QuorumCertificate::genesis_qc());
        assert!(!vertex.is_correct(&validator_set));
    }
}
