//! Tests of the safety rules and the vertex store driven together, the way the reducer drives them, over a
//! forked vertex tree:
//!
//! ```text
//! genesis(0) ─┬─ A1 ── A4 ── A6 ── A7
//!             └─ B2 ── B3 ── B5 ── B8
//! ```

use vertex_bft::{
    persistence::PersistentStore,
    safety::{SafetyRules, SafetyState, SafetyViolation, VoteError},
    types::{
        basic::View,
        certificates::QuorumCertificate,
        crypto_primitives::Keypair,
        validators::ValidatorSet,
        vertex::Vertex,
    },
    vertex_store::VertexStore,
};

mod common;

use common::{
    app::LedgerLog,
    keys::{certify, keypairs, signing_keys, validator_set, vertex},
    mem_db::MemDB,
};

struct Fork {
    a1: Vertex,
    a4: Vertex,
    a6: Vertex,
    a7: Vertex,
    b2: Vertex,
    b3: Vertex,
    b5: Vertex,
    b8: Vertex,
    qc_a1: QuorumCertificate,
    qc_a4: QuorumCertificate,
    qc_a6: QuorumCertificate,
    qc_a7: QuorumCertificate,
    qc_b2: QuorumCertificate,
    qc_b3: QuorumCertificate,
    qc_b5: QuorumCertificate,
}

fn fork(keypairs: &[Keypair], validator_set: &ValidatorSet) -> Fork {
    let voters: Vec<&Keypair> = keypairs.iter().collect();
    let genesis_qc = QuorumCertificate::genesis_qc();

    let a1 = vertex(1, &genesis_qc);
    let qc_a1 = certify(&a1, &voters, validator_set);
    let a4 = vertex(4, &qc_a1);
    let qc_a4 = certify(&a4, &voters, validator_set);
    let a6 = vertex(6, &qc_a4);
    let qc_a6 = certify(&a6, &voters, validator_set);
    let a7 = vertex(7, &qc_a6);
    let qc_a7 = certify(&a7, &voters, validator_set);

    let b2 = vertex(2, &genesis_qc);
    let qc_b2 = certify(&b2, &voters, validator_set);
    let b3 = vertex(3, &qc_b2);
    let qc_b3 = certify(&b3, &voters, validator_set);
    let b5 = vertex(5, &qc_b3);
    let qc_b5 = certify(&b5, &voters, validator_set);
    let b8 = vertex(8, &qc_b5);

    Fork {
        a1,
        a4,
        a6,
        a7,
        b2,
        b3,
        b5,
        b8,
        qc_a1,
        qc_a4,
        qc_a6,
        qc_a7,
        qc_b2,
        qc_b3,
        qc_b5,
    }
}

// The parts of a replica that decide what is safe, wired the way the reducer wires them.
struct Harness {
    safety_rules: SafetyRules<MemDB>,
    vertex_store: VertexStore,
    ledger: LedgerLog,
}

impl Harness {
    fn new(me: Keypair, kv_store: MemDB) -> Harness {
        Harness {
            safety_rules: SafetyRules::load(me, PersistentStore::new(kv_store)).unwrap(),
            vertex_store: VertexStore::new(Vertex::genesis(), QuorumCertificate::genesis_qc()),
            ledger: LedgerLog::default(),
        }
    }

    fn insert(&mut self, vertex: &Vertex) {
        self.vertex_store.insert_vertex(vertex.clone()).unwrap();
    }

    // Process `qc`, committing whatever it makes committed. Returns the views committed.
    fn process_qc(&mut self, qc: &QuorumCertificate) -> Vec<View> {
        self.safety_rules.process(qc).unwrap();
        self.vertex_store.add_qc(qc);

        let certified = match self.vertex_store.get_vertex(&qc.voted_vertex_id) {
            Some(certified) => certified.clone(),
            None => return Vec::new(),
        };
        match self.safety_rules.committed_vertex(&certified) {
            Some((committed_view, committed)) => {
                let pending = self.vertex_store.commit(&committed).unwrap();
                self.safety_rules
                    .record_commit(committed_view, &self.vertex_store.state())
                    .unwrap();
                pending
                    .execute(&mut self.ledger)
                    .committed
                    .iter()
                    .map(|(vertex, _)| vertex.view)
                    .collect()
            }
            None => Vec::new(),
        }
    }

    fn state(&self) -> &SafetyState {
        self.safety_rules.state()
    }
}

#[test]
fn forked_tree_locks_and_commits_on_contiguous_chains() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let fork = fork(&keypairs, &validator_set);
    let mut replica = Harness::new(keypairs[0].clone(), MemDB::new());

    for vertex in [
        &fork.a1, &fork.b2, &fork.b3, &fork.a4, &fork.b5, &fork.a6, &fork.a7, &fork.b8,
    ] {
        replica.insert(vertex);
    }

    // Views 1 and 2 extend genesis directly, but genesis is already locked.
    assert!(replica.process_qc(&fork.qc_a1).is_empty());
    assert!(replica.process_qc(&fork.qc_b2).is_empty());
    assert_eq!(replica.state().locked_view, View::genesis());

    // B2 <- B3 is contiguous, so the QC for B3 locks on B2.
    assert!(replica.process_qc(&fork.qc_b3).is_empty());
    assert_eq!(replica.state().locked_view, View::new(2));
    assert_eq!(replica.state().locked_vertex_id, fork.b2.id);

    // A1 <- A4 and B3 <- B5 are not contiguous: no lock, no commit.
    assert!(replica.process_qc(&fork.qc_a4).is_empty());
    assert!(replica.process_qc(&fork.qc_b5).is_empty());
    assert_eq!(replica.state().locked_view, View::new(2));

    // A4 <- A6 is not contiguous either.
    assert!(replica.process_qc(&fork.qc_a6).is_empty());
    assert_eq!(replica.state().locked_view, View::new(2));
    assert_eq!(replica.state().committed_view, View::genesis());

    // A6 <- A7 is contiguous: the QC for A7 locks on A6 and commits A4, along with its parent A1.
    let committed = replica.process_qc(&fork.qc_a7);
    assert_eq!(committed, vec![View::new(1), View::new(4)]);
    assert_eq!(replica.state().locked_view, View::new(6));
    assert_eq!(replica.state().committed_view, View::new(4));
    assert_eq!(
        replica.ledger.executed(),
        vec![(View::new(1), fork.a1.id), (View::new(4), fork.a4.id)]
    );

    // The B branch was pruned along with everything else not descending from A4.
    assert_eq!(replica.vertex_store.root().id, fork.a4.id);
    for pruned in [&fork.b2, &fork.b3, &fork.b5, &fork.b8] {
        assert!(!replica.vertex_store.contains(&pruned.id));
    }

    // Voting for B8 would contradict the lock on A6.
    match replica.safety_rules.vote_for(&fork.b8) {
        Err(VoteError::SafetyViolation(SafetyViolation::ConflictsWithLock { locked_view, .. })) => {
            assert_eq!(locked_view, View::new(6))
        }
        other => panic!("expected a lock conflict, got {:?}", other.map(|vote| vote.view)),
    }

    // Processing the same QC again commits nothing new.
    assert!(replica.process_qc(&fork.qc_a7).is_empty());
}

#[test]
fn qc_for_the_fourth_contiguous_vertex_commits_the_second() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let voters: Vec<&Keypair> = keypairs.iter().collect();
    let mut replica = Harness::new(keypairs[0].clone(), MemDB::new());

    // A1 <- A2 <- A3 <- A4, all contiguous.
    let mut qc = QuorumCertificate::genesis_qc();
    let mut chain = Vec::new();
    for view in 1..=4 {
        let next = vertex(view, &qc);
        replica.insert(&next);
        qc = certify(&next, &voters, &validator_set);
        chain.push((next, qc.clone()));
    }

    assert!(replica.process_qc(&chain[0].1).is_empty());
    assert!(replica.process_qc(&chain[1].1).is_empty());
    assert_eq!(replica.process_qc(&chain[2].1), vec![View::new(1)]);
    assert_eq!(replica.process_qc(&chain[3].1), vec![View::new(2)]);
    assert_eq!(replica.state().committed_view, View::new(2));
    assert_eq!(replica.state().locked_view, View::new(3));
}

#[test]
fn never_votes_twice_in_a_view() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let fork = fork(&keypairs, &validator_set);
    let mut replica = Harness::new(keypairs[0].clone(), MemDB::new());

    let vote = replica.safety_rules.vote_for(&fork.b2).unwrap();
    assert_eq!(vote.view, View::new(2));
    assert_eq!(vote.vertex_id, fork.b2.id);

    // Neither the same vertex again, nor a lower view.
    assert!(matches!(
        replica.safety_rules.vote_for(&fork.b2),
        Err(VoteError::SafetyViolation(SafetyViolation::AlreadyVoted { .. }))
    ));
    assert!(matches!(
        replica.safety_rules.vote_for(&fork.a1),
        Err(VoteError::SafetyViolation(SafetyViolation::AlreadyVoted { .. }))
    ));

    assert!(replica.safety_rules.vote_for(&fork.b3).is_ok());
    assert_eq!(replica.state().last_voted_view, View::new(3));
}

#[test]
fn locked_view_never_decreases() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let fork = fork(&keypairs, &validator_set);
    let mut replica = Harness::new(keypairs[0].clone(), MemDB::new());
    for vertex in [&fork.a1, &fork.a4, &fork.a6, &fork.a7, &fork.b2, &fork.b3] {
        replica.insert(vertex);
    }

    let mut locked_views = Vec::new();
    for qc in [&fork.qc_a7, &fork.qc_b3, &fork.qc_a1, &fork.qc_b2] {
        replica.process_qc(qc);
        locked_views.push(replica.state().locked_view);
    }

    assert_eq!(locked_views, vec![View::new(6); 4]);
    assert!(replica.state().last_voted_view >= replica.state().locked_view);
    assert!(replica.state().locked_view >= replica.state().committed_view);
}

#[test]
fn abandoned_branch_cannot_be_voted_for() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let voters: Vec<&Keypair> = keypairs.iter().collect();
    let fork = fork(&keypairs, &validator_set);
    let mut replica = Harness::new(keypairs[0].clone(), MemDB::new());

    // B2 <- B3 forms a 2-chain, locking B2.
    replica.insert(&fork.b2);
    replica.insert(&fork.b3);
    replica.process_qc(&fork.qc_b3);

    // A vertex at view 4 extending A1 conflicts with the lock.
    let conflicting = vertex(4, &certify(&fork.a1, &voters, &validator_set));
    assert!(matches!(
        replica.safety_rules.vote_for(&conflicting),
        Err(VoteError::SafetyViolation(SafetyViolation::ConflictsWithLock { .. }))
    ));

    // A vertex extending the locked vertex itself is fine.
    let extending_lock = vertex(4, &fork.qc_b2);
    assert!(replica.safety_rules.vote_for(&extending_lock).is_ok());
}

#[test]
fn safety_state_survives_a_restart() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let fork = fork(&keypairs, &validator_set);
    let kv_store = MemDB::new();

    {
        let mut replica = Harness::new(keypairs[0].clone(), kv_store.clone());
        replica.insert(&fork.b2);
        replica.insert(&fork.b3);
        replica.process_qc(&fork.qc_b3);
        replica.safety_rules.vote_for(&fork.b5).unwrap();
    }

    let restarted = SafetyRules::load(keypairs[0].clone(), PersistentStore::new(kv_store)).unwrap();
    assert_eq!(restarted.state().last_voted_view, View::new(5));
    assert_eq!(restarted.state().locked_view, View::new(2));
    assert_eq!(restarted.highest_qc(), &fork.qc_b3);
}

#[test]
fn failed_write_withholds_the_vote() {
    let keypairs = keypairs(&signing_keys(4));
    let validator_set = validator_set(&keypairs);
    let fork = fork(&keypairs, &validator_set);
    let kv_store = MemDB::new();
    let mut replica = Harness::new(keypairs[0].clone(), kv_store.clone());

    kv_store.fail_writes();
    assert!(matches!(
        replica.safety_rules.vote_for(&fork.a1),
        Err(VoteError::PersistenceFailure(_))
    ));
    assert_eq!(replica.state().last_voted_view, View::genesis());
}
