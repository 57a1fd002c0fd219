/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pure functions that decide whether a vote is safe, what to lock on, and what to commit.
//!
//! # Locking
//!
//! Processing the QC for vertex `V` (whose parent is `V'`) locks on `V'` if `V'` is in the view directly
//! before `V`. The lock only ever moves to higher views.
//!
//! # Voting
//!
//! A replica may vote for vertex `B` only if:
//! 1. `B.view` is strictly above every view the replica has voted in, and
//! 2. `B.qc.parent_view >= locked_view`, or `B`'s parent is the locked vertex itself.
//!
//! The second rule is how a replica avoids contradicting a branch that a quorum may have locked on. Note
//! that if `B.qc.parent_view < locked_view`, the only way for `B`'s parent to extend the locked vertex is
//! to *be* the locked vertex, since `B`'s parent sits directly on top of `B.qc.parent_view`.
//!
//! # Committing
//!
//! When the QC for vertex `V` is processed, with `V.qc` certifying the parent `V'` and naming the
//! grandparent `V''`, the chain `V'' <- V' <- V <- QC` is a 3-chain. `V''` is committed if the link
//! `V' <- V` is contiguous (`V'.view + 1 == V.view`), i.e., if processing the same QC also locks `V'`.
//! Gaps left by views that ended in a timeout break contiguity.

use crate::types::{
    basic::{CryptoHash, View},
    certificates::QuorumCertificate,
    vertex::Vertex,
};

use super::{state::SafetyState, SafetyViolation};

/// The (view, id) that processing `qc` locks on, if `qc` completes a contiguous 2-chain and moves the lock
/// upwards.
pub(crate) fn lock_to_take(state: &SafetyState, qc: &QuorumCertificate) -> Option<(View, CryptoHash)> {
    if qc.is_direct() && qc.parent_view > state.locked_view {
        Some((qc.parent_view, qc.parent_vertex_id))
    } else {
        None
    }
}

/// Whether `qc` should replace the highest QC in `state`.
pub(crate) fn is_newer_qc(state: &SafetyState, qc: &QuorumCertificate) -> bool {
    qc.voted_view > state.highest_qc.voted_view
}

/// Check whether voting for `vertex` is safe given `state`.
pub(crate) fn safe_to_vote(state: &SafetyState, vertex: &Vertex) -> Result<(), SafetyViolation> {
    // 1. Never vote twice in a view, and never vote backwards.
    if vertex.view <= state.last_voted_view {
        return Err(SafetyViolation::AlreadyVoted {
            vertex_view: vertex.view,
            last_voted_view: state.last_voted_view,
        });
    }

    // 2. Respect the lock.
    if vertex.qc.parent_view < state.locked_view
        && vertex.qc.voted_vertex_id != state.locked_vertex_id
    {
        return Err(SafetyViolation::ConflictsWithLock {
            vertex_view: vertex.view,
            grandparent_view: vertex.qc.parent_view,
            locked_view: state.locked_view,
        });
    }

    Ok(())
}

/// The (view, id) of the vertex that becomes committed now that a QC for `certified` was processed, if any.
pub(crate) fn vertex_to_commit(state: &SafetyState, certified: &Vertex) -> Option<(View, CryptoHash)> {
    if certified.is_genesis() {
        return None;
    }

    let parent_view = certified.qc.voted_view;
    let grandparent_view = certified.qc.parent_view;
    if parent_view.directly_precedes(certified.view) && grandparent_view > state.committed_view {
        Some((grandparent_view, certified.qc.parent_vertex_id))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::{Command, SignatureSet};

    // A QC built without signatures. The functions in this module never check signatures.
    fn qc_for(vertex: &Vertex) -> QuorumCertificate {
        QuorumCertificate {
            voted_view: vertex.view,
            voted_vertex_id: vertex.id,
            parent_view: vertex.parent_view(),
            parent_vertex_id: vertex.parent_id(),
            signatures: SignatureSet::init(),
        }
    }

    fn child_of(parent: &Vertex, view: u64) -> Vertex {
        let qc = if parent.is_genesis() {
            QuorumCertificate::genesis_qc()
        } else {
            qc_for(parent)
        };
        Vertex::new(View::new(view), Command::new(view.to_le_bytes().to_vec()), qc)
    }

    #[test]
    fn lock_requires_contiguous_parent() {
        let genesis = Vertex::genesis();
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        let a4 = child_of(&a2, 4);
        let state = SafetyState::genesis();

        assert_eq!(lock_to_take(&state, &qc_for(&a2)), Some((View::new(1), a1.id)));
        assert_eq!(lock_to_take(&state, &qc_for(&a4)), None);
    }

    #[test]
    fn lock_never_moves_down() {
        let genesis = Vertex::genesis();
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        let mut state = SafetyState::genesis();
        state.locked_view = View::new(5);

        assert_eq!(lock_to_take(&state, &qc_for(&a2)), None);
    }

    #[test]
    fn vote_rejected_at_or_below_last_voted_view() {
        let genesis = Vertex::genesis();
        let a3 = child_of(&genesis, 3);
        let mut state = SafetyState::genesis();
        state.last_voted_view = View::new(3);

        assert!(matches!(
            safe_to_vote(&state, &a3),
            Err(SafetyViolation::AlreadyVoted { .. })
        ));
    }

    #[test]
    fn vote_allowed_on_the_locked_vertex_itself() {
        let genesis = Vertex::genesis();
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        let a5 = child_of(&a2, 5);
        let b3 = child_of(&genesis, 3);
        let b6 = child_of(&b3, 6);

        let mut state = SafetyState::genesis();
        state.last_voted_view = View::new(4);
        state.locked_view = View::new(2);
        state.locked_vertex_id = a2.id;

        // a5's parent is the locked vertex, even though its grandparent is below the lock.
        assert_eq!(safe_to_vote(&state, &a5), Ok(()));
        // b6's grandparent is genesis, below the lock, and its parent is not the locked vertex.
        assert!(matches!(
            safe_to_vote(&state, &b6),
            Err(SafetyViolation::ConflictsWithLock { .. })
        ));
    }

    #[test]
    fn commit_requires_contiguous_last_link() {
        let genesis = Vertex::genesis();
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        let a3 = child_of(&a2, 3);
        let a5 = child_of(&a3, 5);
        let state = SafetyState::genesis();

        assert_eq!(vertex_to_commit(&state, &a3), Some((View::new(1), a1.id)));
        assert_eq!(vertex_to_commit(&state, &a5), None);
    }

    #[test]
    fn commit_is_reported_once() {
        let genesis = Vertex::genesis();
        let a1 = child_of(&genesis, 1);
        let a2 = child_of(&a1, 2);
        let a3 = child_of(&a2, 3);
        let mut state = SafetyState::genesis();
        state.committed_view = View::new(1);

        assert_eq!(vertex_to_commit(&state, &a3), None);
    }
}
