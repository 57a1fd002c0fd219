/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged by replicas.
//!
//! There are two families of messages:
//! 1. **Progress messages**: [`Proposal`], [`Vote`], and [`NewView`]. These are associated with a view and
//!    are subject to the view-aware buffering done by the
//!    [preprocessor](crate::event_processor::BFTEventProcessor).
//! 2. **Vertex sync messages**: [`GetVerticesRequest`], [`GetVerticesResponse`], and
//!    [`GetVerticesErrorResponse`]. These are not associated with a view and are processed on arrival.
//!
//! The sender of a message is the origin reported by the [network](crate::networking::Network), except for
//! votes, which name their voter and are signed by it.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{CryptoHash, SignatureBytes, View},
    certificates::{vote_digest, QuorumCertificate},
    crypto_primitives::{Keypair, SignatureError, VerifyingKey, VerifyingKeyBytes},
    signed_messages::SignedMessage,
    vertex::Vertex,
};

#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    Proposal(Proposal),
    Vote(Vote),
    NewView(NewView),
    GetVerticesRequest(GetVerticesRequest),
    GetVerticesResponse(GetVerticesResponse),
    GetVerticesErrorResponse(GetVerticesErrorResponse),
}

impl ConsensusMessage {
    /// The view the message is intended for, if it is a progress message.
    pub fn view(&self) -> Option<View> {
        match self {
            ConsensusMessage::Proposal(proposal) => Some(proposal.vertex.view),
            ConsensusMessage::Vote(vote) => Some(vote.view),
            ConsensusMessage::NewView(new_view) => Some(new_view.view),
            ConsensusMessage::GetVerticesRequest(_)
            | ConsensusMessage::GetVerticesResponse(_)
            | ConsensusMessage::GetVerticesErrorResponse(_) => None,
        }
    }
}

/// A leader's proposal of `vertex`, along with the highest QC the leader knows of.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub vertex: Vertex,
    pub high_qc: QuorumCertificate,
}

impl Into<ConsensusMessage> for Proposal {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::Proposal(self)
    }
}

/// One validator's signed endorsement of a vertex.
///
/// Besides the voted vertex, the vote names the vertex's parent so that the collector can assemble a
/// [`QuorumCertificate`] from votes alone.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub view: View,
    pub vertex_id: CryptoHash,
    pub parent_view: View,
    pub parent_vertex_id: CryptoHash,
    pub voter: VerifyingKeyBytes,
    pub signature: SignatureBytes,
}

impl Vote {
    /// Create a vote for `vertex`, signed by `keypair`.
    pub fn new(keypair: &Keypair, vertex: &Vertex) -> Vote {
        let digest = vote_digest(
            vertex.view,
            &vertex.id,
            vertex.parent_view(),
            &vertex.parent_id(),
        );
        Vote {
            view: vertex.view,
            vertex_id: vertex.id,
            parent_view: vertex.parent_view(),
            parent_vertex_id: vertex.parent_id(),
            voter: keypair.public().to_bytes(),
            signature: keypair.sign(&digest),
        }
    }

    pub fn voter(&self) -> Result<VerifyingKey, SignatureError> {
        VerifyingKey::from_bytes(&self.voter)
    }
}

impl SignedMessage for Vote {
    fn message_digest(&self) -> CryptoHash {
        vote_digest(
            self.view,
            &self.vertex_id,
            self.parent_view,
            &self.parent_vertex_id,
        )
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

impl Into<ConsensusMessage> for Vote {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::Vote(self)
    }
}

/// Sent to the leader of `view` by a replica that left the previous view on a timeout. Carries the
/// replica's highest QC so that the leader can extend it.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewView {
    pub view: View,
    pub high_qc: QuorumCertificate,
}

impl Into<ConsensusMessage> for NewView {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::NewView(self)
    }
}

/// Request for up to `count` vertices, starting from `vertex_id` and walking towards the root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesRequest {
    pub vertex_id: CryptoHash,
    pub count: u32,
}

impl Into<ConsensusMessage> for GetVerticesRequest {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::GetVerticesRequest(self)
    }
}

/// Vertices starting at `from_id`, ordered from the requested vertex towards the root.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesResponse {
    pub from_id: CryptoHash,
    pub vertices: Vec<Vertex>,
}

impl Into<ConsensusMessage> for GetVerticesResponse {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::GetVerticesResponse(self)
    }
}

/// Sent in place of a [`GetVerticesResponse`] when the requested vertex is unknown to the responder. Carries
/// the responder's highest QC so that the requester can learn about a newer branch.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct GetVerticesErrorResponse {
    pub high_qc: QuorumCertificate,
    pub request: GetVerticesRequest,
}

impl Into<ConsensusMessage> for GetVerticesErrorResponse {
    fn into(self) -> ConsensusMessage {
        ConsensusMessage::GetVerticesErrorResponse(self)
    }
}
