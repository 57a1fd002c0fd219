/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The single-threaded event loop of the consensus core.
//!
//! Every inbound message and every timer expiry passes through the [`BFTEventProcessor`], one at a time, in
//! two stages:
//! 1. The **preprocessor** ([`BFTEventProcessor`] itself) decides *when* a message is processed. It drops
//!    messages for past views, buffers messages for future views until the replica gets there, and parks
//!    messages whose QCs reference vertices the replica does not have until
//!    [vertex sync](crate::vertex_store) fetches them.
//! 2. The **reducer** decides *what* a message does. It drives [`SafetyRules`](crate::safety::SafetyRules),
//!    the [`VertexStore`](crate::vertex_store::VertexStore), [`PendingVotes`](crate::pending_votes::PendingVotes)
//!    and the [`Pacemaker`](crate::pacemaker::Pacemaker), and sends proposals, votes, and new views.
//!
//! ## Errors
//!
//! Processing a message can fail with a [`ConsensusError`]. Only [fatal](ConsensusError::is_fatal) errors
//! stop the replica: everything else is the fault of a message (or its sender) and is dropped with a log.

use std::time::Duration;

use crate::{
    pacemaker::{PacemakerError, TimeoutPolicy},
    pending_votes::InvalidVote,
    persistence::PersistenceError,
    safety::{SafetyViolation, VoteError},
    types::{
        basic::{BufferSize, CryptoHash, View},
        crypto_primitives::VerifyingKey,
        validators::QuorumUnreachable,
    },
    vertex_store::VertexStoreError,
};

pub(crate) mod message_buffer;

pub mod preprocessor;

pub(crate) mod reducer;

pub use preprocessor::BFTEventProcessor;

/// Parameters of the event processor.
#[derive(Clone, Debug)]
pub struct EventProcessorConfiguration {
    /// Maximum number of vertices requested in one [`GetVerticesRequest`](crate::messages::GetVerticesRequest),
    /// and served in one response.
    pub sync_request_limit: u32,
    /// How long to wait for a response to a sync request before retrying with another peer.
    pub sync_response_timeout: Duration,
    /// How many times a sync is retried before the messages waiting on it are dropped.
    pub sync_max_retries: u32,
    /// Maximum number of future-view messages held at any moment.
    pub message_buffer_capacity: BufferSize,
    pub timeout_policy: TimeoutPolicy,
}

/// Everything that can go wrong while starting or running the event processor.
#[derive(Debug)]
pub enum ConsensusError {
    /// A vote or commit decision would break a safety invariant. The message is dropped and not retried.
    SafetyViolation(SafetyViolation),
    /// A message references a vertex that this replica does not have. A sync for it was started.
    MissingAncestor { vertex_id: CryptoHash },
    /// The message is malformed, badly signed, or otherwise unacceptable.
    InvalidMessage(InvalidMessage),
    /// Consensus state could not be saved or loaded.
    PersistenceFailure(PersistenceError),
    /// The validator set cannot form a quorum.
    QuorumUnreachable(QuorumUnreachable),
    /// The pacemaker's configuration is invalid.
    InvalidConfiguration(PacemakerError),
    /// The persisted vertex store state could not be rebuilt into a vertex store.
    CorruptState(VertexStoreError),
}

impl ConsensusError {
    /// Whether the error must halt the replica rather than be logged and dropped.
    pub fn is_fatal(&self) -> bool {
        match self {
            ConsensusError::SafetyViolation(_)
            | ConsensusError::MissingAncestor { .. }
            | ConsensusError::InvalidMessage(_) => false,
            ConsensusError::PersistenceFailure(_)
            | ConsensusError::QuorumUnreachable(_)
            | ConsensusError::InvalidConfiguration(_)
            | ConsensusError::CorruptState(_) => true,
        }
    }
}

impl From<SafetyViolation> for ConsensusError {
    fn from(value: SafetyViolation) -> Self {
        ConsensusError::SafetyViolation(value)
    }
}

impl From<InvalidMessage> for ConsensusError {
    fn from(value: InvalidMessage) -> Self {
        ConsensusError::InvalidMessage(value)
    }
}

impl From<PersistenceError> for ConsensusError {
    fn from(value: PersistenceError) -> Self {
        ConsensusError::PersistenceFailure(value)
    }
}

impl From<QuorumUnreachable> for ConsensusError {
    fn from(value: QuorumUnreachable) -> Self {
        ConsensusError::QuorumUnreachable(value)
    }
}

impl From<PacemakerError> for ConsensusError {
    fn from(value: PacemakerError) -> Self {
        ConsensusError::InvalidConfiguration(value)
    }
}

impl From<VoteError> for ConsensusError {
    fn from(value: VoteError) -> Self {
        match value {
            VoteError::SafetyViolation(violation) => ConsensusError::SafetyViolation(violation),
            VoteError::PersistenceFailure(err) => ConsensusError::PersistenceFailure(err),
        }
    }
}

impl From<VertexStoreError> for ConsensusError {
    fn from(value: VertexStoreError) -> Self {
        match value {
            VertexStoreError::MissingParent { parent } => {
                ConsensusError::MissingAncestor { vertex_id: parent }
            }
            VertexStoreError::MissingVertex { id } => ConsensusError::MissingAncestor { vertex_id: id },
            other => ConsensusError::InvalidMessage(InvalidMessage::RejectedVertex(other)),
        }
    }
}

/// Ways in which a message can be unacceptable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidMessage {
    /// The vertex's id does not match its contents, or its QC is not correct.
    IncorrectVertex { vertex_id: CryptoHash },
    /// The QC's signatures do not carry a quorum of valid signatures.
    IncorrectQC { voted_view: View },
    /// The proposal did not come from the leader of its view.
    WrongLeader { view: View, origin: VerifyingKey },
    /// The vote's signature does not verify against its voter.
    BadVoteSignature { view: View },
    InvalidVote(InvalidVote),
    /// The vertex store refused the vertex.
    RejectedVertex(VertexStoreError),
}

impl From<InvalidVote> for InvalidMessage {
    fn from(value: InvalidVote) -> Self {
        InvalidMessage::InvalidVote(value)
    }
}
