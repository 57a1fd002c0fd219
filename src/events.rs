/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events emitted by a replica, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published by the
//! algorithm thread into a channel and consumed by the [event bus](crate::event_bus) thread, which runs the
//! user's handlers and, if enabled, the [loggers](crate::logging).

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    app::ExecutionOutcome,
    messages::{NewView, Proposal, Vote},
    types::{
        basic::{CryptoHash, View},
        certificates::QuorumCertificate,
        crypto_primitives::VerifyingKey,
        vertex::Vertex,
    },
};

pub enum Event {
    // Events that change persistent state.
    InsertVertex(InsertVertexEvent),
    CommitVertex(CommitVertexEvent),
    PruneVertex(PruneVertexEvent),
    UpdateHighestQC(UpdateHighestQCEvent),
    UpdateLockedView(UpdateLockedViewEvent),
    // Events that involve broadcasting/sending a progress message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    NewView(NewViewEvent),
    // Events that involve receiving a progress message.
    ReceiveProposal(ReceiveProposalEvent),
    ReceiveVote(ReceiveVoteEvent),
    ReceiveNewView(ReceiveNewViewEvent),
    // View progression events.
    StartView(StartViewEvent),
    ViewTimeout(ViewTimeoutEvent),
    CollectQC(CollectQCEvent),
    // Vertex sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
}

impl Event {
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            // The event bus may already be shut down, in which case the event is dropped.
            let _ = event_publisher.send(self);
        }
    }
}

pub struct InsertVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: Vertex,
}

pub struct CommitVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: CryptoHash,
    pub view: View,
    pub outcome: ExecutionOutcome,
}

pub struct PruneVertexEvent {
    pub timestamp: SystemTime,
    pub vertex: CryptoHash,
}

pub struct UpdateHighestQCEvent {
    pub timestamp: SystemTime,
    pub highest_qc: QuorumCertificate,
}

pub struct UpdateLockedViewEvent {
    pub timestamp: SystemTime,
    pub locked_view: View,
    pub locked_vertex: CryptoHash,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub proposal: Proposal,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct NewViewEvent {
    pub timestamp: SystemTime,
    pub new_view: NewView,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub proposal: Proposal,
}

pub struct ReceiveVoteEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub vote: Vote,
}

pub struct ReceiveNewViewEvent {
    pub timestamp: SystemTime,
    pub origin: VerifyingKey,
    pub new_view: NewView,
}

pub struct StartViewEvent {
    pub timestamp: SystemTime,
    pub leader: VerifyingKey,
    pub view: View,
}

pub struct ViewTimeoutEvent {
    pub timestamp: SystemTime,
    pub view: View,
    pub timeout: Duration,
}

pub struct CollectQCEvent {
    pub timestamp: SystemTime,
    pub quorum_certificate: QuorumCertificate,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub target: CryptoHash,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub target: CryptoHash,
    pub vertices_synced: u64,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub vertex_id: CryptoHash,
    pub count: u32,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub vertices: u64,
    pub highest_qc: QuorumCertificate,
}
