/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Helps leaders incrementally form [`QuorumCertificate`]s by combining votes for the same view and vertex.

use std::collections::{HashMap, HashSet};

use crate::{
    messages::Vote,
    types::{
        basic::{CryptoHash, Power, SignatureSet, TotalPower, View},
        certificates::QuorumCertificate,
        crypto_primitives::VerifyingKey,
        signed_messages::SignedMessage,
        validators::{QuorumUnreachable, ValidatorSet},
    },
};

/// Accumulates votes keyed by `(view, vertex_id)` until they carry a quorum of the validator set's power.
///
/// At most one QC is formed per key. Once formed, later votes for the same key are ignored.
pub struct PendingVotes {
    validator_set: ValidatorSet,
    quorum: TotalPower,
    current_view: View,
    // Keyed by the vote digest, so that votes naming different parents for the same vertex never mix.
    accumulators: HashMap<CryptoHash, Accumulator>,
    // `(view, vertex_id)` pairs that already produced a QC.
    certified: HashSet<(View, CryptoHash)>,
    // The latest vote collected from each validator: its view, vertex id and digest.
    previous_votes: HashMap<VerifyingKey, (View, CryptoHash, CryptoHash)>,
}

struct Accumulator {
    view: View,
    parent_view: View,
    parent_vertex_id: CryptoHash,
    signatures: SignatureSet,
    power: TotalPower,
}

impl PendingVotes {
    pub fn new(validator_set: ValidatorSet) -> Result<PendingVotes, QuorumUnreachable> {
        let quorum = validator_set.quorum()?;
        Ok(PendingVotes {
            validator_set,
            quorum,
            current_view: View::genesis(),
            accumulators: HashMap::new(),
            certified: HashSet::new(),
            previous_votes: HashMap::new(),
        })
    }

    /// Add `vote` to its accumulator. Returns a QC if the vote completes a quorum.
    ///
    /// Votes for views below the current view and votes that were already counted return `Ok(None)`.
    ///
    /// # Precondition
    /// The vote's signature was checked with [`SignedMessage::is_correct`].
    pub fn add_vote(&mut self, vote: &Vote) -> Result<Option<QuorumCertificate>, InvalidVote> {
        if vote.view < self.current_view {
            return Ok(None);
        }

        let voter = vote.voter().map_err(|_| InvalidVote::MalformedVoter)?;
        let position = self
            .validator_set
            .position(&voter)
            .ok_or(InvalidVote::NotAValidator)?;
        let power = self
            .validator_set
            .power(&voter)
            .ok_or(InvalidVote::NotAValidator)?;
        let digest = vote.message_digest();

        // A validator votes at most once per view. A newer vote replaces its older one.
        match self.previous_votes.get(&voter) {
            Some((_, _, previous_digest)) if *previous_digest == digest => return Ok(None),
            Some((previous_view, _, _)) if *previous_view == vote.view => {
                log::warn!("Validator voted for two vertices in view {}", vote.view);
                return Err(InvalidVote::Equivocation { view: vote.view });
            }
            Some((previous_view, _, _)) if *previous_view > vote.view => return Ok(None),
            Some((_, _, previous_digest)) => {
                let previous_digest = *previous_digest;
                self.remove_vote(&previous_digest, position, power);
            }
            None => (),
        }
        self.previous_votes
            .insert(voter, (vote.view, vote.vertex_id, digest));

        if self.certified.contains(&(vote.view, vote.vertex_id)) {
            return Ok(None);
        }

        let accumulator = self.accumulators.entry(digest).or_insert_with(|| Accumulator {
            view: vote.view,
            parent_view: vote.parent_view,
            parent_vertex_id: vote.parent_vertex_id,
            signatures: SignatureSet::new(self.validator_set.len()),
            power: TotalPower::new(0),
        });

        if accumulator.signatures.get(position).is_none() {
            accumulator.signatures.set(position, Some(vote.signature));
            accumulator.power += power;
        }

        if accumulator.power >= self.quorum {
            if let Some(accumulator) = self.accumulators.remove(&digest) {
                self.certified.insert((vote.view, vote.vertex_id));
                return Ok(Some(QuorumCertificate {
                    voted_view: vote.view,
                    voted_vertex_id: vote.vertex_id,
                    parent_view: accumulator.parent_view,
                    parent_vertex_id: accumulator.parent_vertex_id,
                    signatures: accumulator.signatures,
                }));
            }
        }

        Ok(None)
    }

    /// Discard every accumulator for a view below `view`.
    pub fn update_view(&mut self, view: View) {
        if view <= self.current_view {
            return;
        }
        self.current_view = view;
        self.accumulators
            .retain(|_, accumulator| accumulator.view >= view);
        self.certified.retain(|(vote_view, _)| *vote_view >= view);
        self.previous_votes
            .retain(|_, (vote_view, _, _)| *vote_view >= view);
    }

    fn remove_vote(&mut self, digest: &CryptoHash, position: usize, power: Power) {
        let now_empty = match self.accumulators.get_mut(digest) {
            Some(accumulator) => {
                if accumulator.signatures.get(position).is_some() {
                    accumulator.signatures.set(position, None);
                    accumulator.power =
                        TotalPower::new(accumulator.power.int().saturating_sub(power.int() as u128));
                }
                accumulator.signatures.count() == 0
            }
            None => false,
        };
        if now_empty {
            self.accumulators.remove(digest);
        }
    }
}

/// Reasons why a vote cannot be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidVote {
    MalformedVoter,
    NotAValidator,
    /// The voter already voted for a different vertex in the same view.
    Equivocation { view: View },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        basic::Command,
        crypto_primitives::{Keypair, SigningKey},
        vertex::Vertex,
    };
    use rand_core::OsRng;

    fn keypairs_and_validator_set(n: usize) -> (Vec<Keypair>, ValidatorSet) {
        let mut csprg = OsRng {};
        let keypairs: Vec<Keypair> = (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
            .collect();
        let mut validator_set = ValidatorSet::new();
        for keypair in &keypairs {
            validator_set.put(&keypair.public(), Power::new(1));
        }
        (keypairs, validator_set)
    }

    fn vertex_at(view: u64, tag: u8) -> Vertex {
        Vertex::new(View::new(view), Command::new(vec![tag]), QuorumCertificate::genesis_qc())
    }

    #[test]
    fn forms_qc_on_quorum_only_once() {
        let (keypairs, validator_set) = keypairs_and_validator_set(4);
        let mut pending_votes = PendingVotes::new(validator_set.clone()).unwrap();
        let vertex = vertex_at(1, 0);

        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[0], &vertex)), Ok(None));
        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[1], &vertex)), Ok(None));
        let qc = pending_votes
            .add_vote(&Vote::new(&keypairs[2], &vertex))
            .unwrap()
            .expect("three of four votes form a quorum");
        assert_eq!(qc.voted_vertex_id, vertex.id);
        assert!(qc.is_correct(&validator_set));

        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[3], &vertex)), Ok(None));
    }

    #[test]
    fn duplicate_votes_are_idempotent() {
        let (keypairs, validator_set) = keypairs_and_validator_set(4);
        let mut pending_votes = PendingVotes::new(validator_set).unwrap();
        let vertex = vertex_at(1, 0);
        let vote = Vote::new(&keypairs[0], &vertex);

        for _ in 0..5 {
            assert_eq!(pending_votes.add_vote(&vote), Ok(None));
        }
        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[1], &vertex)), Ok(None));
    }

    #[test]
    fn rejects_non_validators_and_equivocation() {
        let (keypairs, validator_set) = keypairs_and_validator_set(4);
        let (outsiders, _) = keypairs_and_validator_set(1);
        let mut pending_votes = PendingVotes::new(validator_set).unwrap();

        assert_eq!(
            pending_votes.add_vote(&Vote::new(&outsiders[0], &vertex_at(1, 0))),
            Err(InvalidVote::NotAValidator)
        );

        pending_votes.add_vote(&Vote::new(&keypairs[0], &vertex_at(1, 0))).unwrap();
        assert_eq!(
            pending_votes.add_vote(&Vote::new(&keypairs[0], &vertex_at(1, 1))),
            Err(InvalidVote::Equivocation { view: View::new(1) })
        );
    }

    #[test]
    fn newer_vote_replaces_older_and_stale_votes_are_dropped() {
        let (keypairs, validator_set) = keypairs_and_validator_set(4);
        let mut pending_votes = PendingVotes::new(validator_set).unwrap();
        let old = vertex_at(1, 0);
        let new = vertex_at(2, 0);

        pending_votes.add_vote(&Vote::new(&keypairs[0], &old)).unwrap();
        pending_votes.add_vote(&Vote::new(&keypairs[1], &old)).unwrap();
        // keypairs[0] moves on, so its vote for `old` no longer counts.
        pending_votes.add_vote(&Vote::new(&keypairs[0], &new)).unwrap();
        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[2], &old)), Ok(None));

        pending_votes.update_view(View::new(2));
        assert_eq!(pending_votes.add_vote(&Vote::new(&keypairs[3], &old)), Ok(None));
    }
}
