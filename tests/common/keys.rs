use rand_core::OsRng;

use vertex_bft::{
    messages::Vote,
    pending_votes::PendingVotes,
    types::{
        basic::{Command, Power, View},
        certificates::QuorumCertificate,
        crypto_primitives::{Keypair, SigningKey},
        validators::ValidatorSet,
        vertex::Vertex,
    },
};

pub(crate) fn signing_keys(n: usize) -> Vec<SigningKey> {
    let mut csprg = OsRng {};
    (0..n).map(|_| SigningKey::generate(&mut csprg)).collect()
}

pub(crate) fn keypairs(signing_keys: &[SigningKey]) -> Vec<Keypair> {
    signing_keys.iter().cloned().map(Keypair::new).collect()
}

/// A validator set in which every key has a power of 1.
pub(crate) fn validator_set(keypairs: &[Keypair]) -> ValidatorSet {
    let mut validator_set = ValidatorSet::new();
    for keypair in keypairs {
        validator_set.put(&keypair.public(), Power::new(1));
    }
    validator_set
}

/// Certify `vertex` with votes from `voters`, which must carry a quorum of `validator_set`.
pub(crate) fn certify(
    vertex: &Vertex,
    voters: &[&Keypair],
    validator_set: &ValidatorSet,
) -> QuorumCertificate {
    let mut pending_votes = PendingVotes::new(validator_set.clone()).unwrap();
    for voter in voters {
        if let Some(qc) = pending_votes.add_vote(&Vote::new(voter, vertex)).unwrap() {
            return qc;
        }
    }
    panic!("voters do not carry a quorum")
}

/// A vertex at `view` extending the vertex certified by `qc`, carrying `view` as its command.
pub(crate) fn vertex(view: u64, qc: &QuorumCertificate) -> Vertex {
    Vertex::new(
        View::new(view),
        Command::new(view.to_le_bytes().to_vec()),
        qc.clone(),
    )
}
