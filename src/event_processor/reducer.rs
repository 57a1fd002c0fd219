/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reducer stage of the event processor.
//!
//! The reducer assumes that the [preprocessor](super::preprocessor) has already:
//! 1. Delivered the message in the view it is intended for, and
//! 2. Checked that every QC it hands over is correct and references a vertex that is either in the
//!    [`VertexStore`] or at or below its root.
//!
//! Under these assumptions, each method below runs one step of the protocol to completion.

use std::{
    collections::VecDeque,
    sync::mpsc::Sender,
    time::{Instant, SystemTime},
};

use crate::{
    app::{Mempool, StateComputer},
    events::*,
    messages::{
        ConsensusMessage, GetVerticesErrorResponse, GetVerticesRequest, GetVerticesResponse,
        NewView, Proposal, Vote,
    },
    networking::{Network, SenderHandle},
    pacemaker::{Pacemaker, PendingNewViews, ProposerElection, TimeoutPolicy},
    pending_votes::{InvalidVote, PendingVotes},
    persistence::{KVStore, PersistentStore},
    safety::{SafetyRules, SafetyState},
    types::{
        basic::{CryptoHash, View},
        certificates::QuorumCertificate,
        crypto_primitives::{Keypair, VerifyingKey},
        signed_messages::SignedMessage,
        validators::ValidatorSet,
        vertex::Vertex,
    },
    vertex_store::{VertexStore, VertexStoreState},
};

use super::{ConsensusError, InvalidMessage};

pub(crate) struct BFTEventReducer<K: KVStore, N: Network, S: StateComputer, M: Mempool> {
    me: Keypair,
    validator_set: ValidatorSet,
    safety_rules: SafetyRules<K>,
    vertex_store: VertexStore,
    pacemaker: Pacemaker,
    proposer_election: ProposerElection,
    pending_votes: PendingVotes,
    pending_new_views: PendingNewViews,
    sender: SenderHandle<N>,
    state_computer: S,
    mempool: M,
    store: PersistentStore<K>,
    sync_request_limit: u32,
    event_publisher: Option<Sender<Event>>,
    last_proposed_view: View,
    // Messages addressed to this replica itself, processed after the current message.
    local_messages: VecDeque<(VerifyingKey, ConsensusMessage)>,
}

impl<K: KVStore, N: Network, S: StateComputer, M: Mempool> BFTEventReducer<K, N, S, M> {
    /// Create a reducer from the consensus state saved in `kv_store`, or from genesis if there is none. The
    /// replica starts in the view after its highest QC.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        me: Keypair,
        validator_set: ValidatorSet,
        kv_store: K,
        network: N,
        state_computer: S,
        mempool: M,
        timeout_policy: TimeoutPolicy,
        sync_request_limit: u32,
        event_publisher: Option<Sender<Event>>,
        now: Instant,
    ) -> Result<Self, ConsensusError> {
        let proposer_election = ProposerElection::new(&validator_set)?;
        let pending_votes = PendingVotes::new(validator_set.clone())?;
        let pending_new_views = PendingNewViews::new(validator_set.clone())?;

        let mut store = PersistentStore::new(kv_store);
        let (safety_state, vertex_store_state) = match store.load_consensus_state()? {
            Some(states) => states,
            None => {
                let states = (SafetyState::genesis(), VertexStoreState::genesis());
                store.save_consensus_state(&states.0, &states.1)?;
                states
            }
        };

        let init_view = safety_state.highest_qc.voted_view.next();
        let pacemaker = Pacemaker::new(timeout_policy, init_view, safety_state.committed_view, now)?;
        let vertex_store =
            VertexStore::from_state(vertex_store_state).map_err(ConsensusError::CorruptState)?;
        let safety_rules = SafetyRules::new(me.clone(), safety_state, store.clone());

        Ok(Self {
            me,
            validator_set,
            safety_rules,
            vertex_store,
            pacemaker,
            proposer_election,
            pending_votes,
            pending_new_views,
            sender: SenderHandle::new(network),
            state_computer,
            mempool,
            store,
            sync_request_limit: sync_request_limit.max(1),
            event_publisher,
            last_proposed_view: View::genesis(),
            local_messages: VecDeque::new(),
        })
    }

    pub(crate) fn me(&self) -> VerifyingKey {
        self.me.public()
    }

    pub(crate) fn validator_set(&self) -> &ValidatorSet {
        &self.validator_set
    }

    pub(crate) fn vertex_store(&self) -> &VertexStore {
        &self.vertex_store
    }

    pub(crate) fn safety_state(&self) -> &SafetyState {
        self.safety_rules.state()
    }

    pub(crate) fn current_view(&self) -> View {
        self.pacemaker.current_view()
    }

    pub(crate) fn deadline(&self) -> Instant {
        self.pacemaker.deadline()
    }

    pub(crate) fn is_timed_out(&self, now: Instant) -> bool {
        self.pacemaker.is_timed_out(now)
    }

    pub(crate) fn leader(&self, view: View) -> VerifyingKey {
        self.proposer_election.leader(view)
    }

    pub(crate) fn send<T: Into<ConsensusMessage>>(&mut self, peer: VerifyingKey, msg: T) {
        self.sender.send(peer, msg)
    }

    pub(crate) fn publish(&self, event: Event) {
        event.publish(&self.event_publisher)
    }

    pub(crate) fn has_local_messages(&self) -> bool {
        !self.local_messages.is_empty()
    }

    pub(crate) fn take_local_messages(&mut self) -> VecDeque<(VerifyingKey, ConsensusMessage)> {
        std::mem::take(&mut self.local_messages)
    }

    /// Enter the initial view.
    pub(crate) fn start(&mut self, now: Instant) -> Result<(), ConsensusError> {
        let view = self.pacemaker.current_view();
        log::debug!("Starting in view {}", view);
        self.on_view_change(view, now)
    }

    /// Process a correct QC whose vertex is known (or already committed): update the highest QC and lock,
    /// commit if the QC completes a 3-chain, and advance the view.
    pub(crate) fn process_qc(
        &mut self,
        qc: &QuorumCertificate,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let before = self.safety_rules.state().clone();
        self.safety_rules.process(qc)?;
        self.publish_safety_updates(&before);

        if self.vertex_store.add_qc(qc) {
            self.store
                .save_vertex_store_state(&self.vertex_store.state())?;
        }

        if let Some(certified) = self.vertex_store.get_vertex(&qc.voted_vertex_id).cloned() {
            if let Some((committed_view, committed)) =
                self.safety_rules.committed_vertex(&certified)
            {
                self.commit(committed_view, &committed)?;
            }
        }

        if let Some(new_view) = self.pacemaker.process_qc(qc, now) {
            self.on_view_change(new_view, now)?;
        }

        Ok(())
    }

    /// Insert the proposed vertex and vote for it if doing so is safe. The vote goes to the leader of the
    /// next view, who is the one that collects it.
    pub(crate) fn process_proposal(
        &mut self,
        origin: VerifyingKey,
        proposal: Proposal,
    ) -> Result<(), ConsensusError> {
        let view = proposal.vertex.view;
        if origin != self.me.public() {
            self.publish(Event::ReceiveProposal(ReceiveProposalEvent {
                timestamp: SystemTime::now(),
                origin,
                proposal: proposal.clone(),
            }));
        }

        if origin != self.leader(view) {
            return Err(InvalidMessage::WrongLeader { view, origin }.into());
        }

        let vertex = proposal.vertex;
        self.insert_vertex(vertex.clone())?;

        let vote = self.safety_rules.vote_for(&vertex)?;
        self.publish(Event::Vote(VoteEvent {
            timestamp: SystemTime::now(),
            vote: vote.clone(),
        }));

        let next_leader = self.leader(view.next());
        if next_leader == self.me.public() {
            self.local_messages
                .push_back((next_leader, vote.into()));
        } else {
            self.sender.send(next_leader, vote);
        }

        log::debug!("Voted for {} in view {}", vertex.id, view);
        Ok(())
    }

    /// Collect a vote on behalf of the leader of the view after the vote's. Returns the QC if the vote
    /// completes one.
    pub(crate) fn collect_vote(
        &mut self,
        origin: VerifyingKey,
        vote: Vote,
    ) -> Result<Option<QuorumCertificate>, ConsensusError> {
        if self.leader(vote.view.next()) != self.me.public() {
            log::debug!("Ignoring vote for view {}: not the next leader", vote.view);
            return Ok(None);
        }

        let voter = vote
            .voter()
            .map_err(|_| InvalidMessage::InvalidVote(InvalidVote::MalformedVoter))?;
        self.publish(Event::ReceiveVote(ReceiveVoteEvent {
            timestamp: SystemTime::now(),
            origin,
            vote: vote.clone(),
        }));

        if !vote.is_correct(&voter) {
            return Err(InvalidMessage::BadVoteSignature { view: vote.view }.into());
        }

        match self
            .pending_votes
            .add_vote(&vote)
            .map_err(InvalidMessage::from)?
        {
            Some(qc) => {
                self.publish(Event::CollectQC(CollectQCEvent {
                    timestamp: SystemTime::now(),
                    quorum_certificate: qc.clone(),
                }));
                Ok(Some(qc))
            }
            None => Ok(None),
        }
    }

    /// Collect a new view on behalf of the leader of its view, and propose once a quorum has timed out.
    pub(crate) fn process_new_view(
        &mut self,
        origin: VerifyingKey,
        new_view: NewView,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let view = new_view.view;
        self.publish(Event::ReceiveNewView(ReceiveNewViewEvent {
            timestamp: SystemTime::now(),
            origin,
            new_view,
        }));

        if self.leader(view) != self.me.public() {
            return Ok(());
        }

        if self.pending_new_views.collect(view, &origin) {
            log::debug!("Collected a quorum of new views for view {}", view);
            self.propose(view, now)?;
        }
        Ok(())
    }

    /// Leave the current view without a QC and send a new view to the leader of the next view.
    pub(crate) fn process_local_timeout(&mut self, now: Instant) -> Result<(), ConsensusError> {
        let view = self.pacemaker.current_view();
        let timeout = self.pacemaker.timeout(view);
        let new_view = match self.pacemaker.process_local_timeout(view, now) {
            Some(new_view) => new_view,
            None => return Ok(()),
        };

        self.publish(Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view,
            timeout,
        }));
        self.on_view_change(new_view, now)?;

        let new_view_msg = NewView {
            view: new_view,
            high_qc: self.safety_rules.highest_qc().clone(),
        };
        self.publish(Event::NewView(NewViewEvent {
            timestamp: SystemTime::now(),
            new_view: new_view_msg.clone(),
        }));

        let leader = self.leader(new_view);
        if leader == self.me.public() {
            self.local_messages
                .push_back((leader, new_view_msg.into()));
        } else {
            self.sender.send(leader, new_view_msg);
        }
        Ok(())
    }

    /// Serve up to `sync_request_limit` vertices starting from the requested one, or an error response
    /// carrying this replica's highest QC if the vertex is unknown.
    pub(crate) fn serve_get_vertices(&mut self, origin: VerifyingKey, request: GetVerticesRequest) {
        self.publish(Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
            timestamp: SystemTime::now(),
            peer: origin,
            vertex_id: request.vertex_id,
            count: request.count,
        }));

        let count = request.count.min(self.sync_request_limit) as usize;
        let high_qc = self.safety_rules.highest_qc().clone();
        let served = match self.vertex_store.get_vertices(&request.vertex_id, count) {
            Some(vertices) => {
                let served = vertices.len() as u64;
                self.sender.send(
                    origin,
                    GetVerticesResponse {
                        from_id: request.vertex_id,
                        vertices,
                    },
                );
                served
            }
            None => {
                self.sender.send(
                    origin,
                    GetVerticesErrorResponse {
                        high_qc: high_qc.clone(),
                        request,
                    },
                );
                0
            }
        };

        self.publish(Event::SendSyncResponse(SendSyncResponseEvent {
            timestamp: SystemTime::now(),
            peer: origin,
            vertices: served,
            highest_qc: high_qc,
        }));
    }

    /// Insert a correct vertex into the vertex store and persist the store. Returns whether the vertex was
    /// new.
    pub(crate) fn insert_vertex(&mut self, vertex: Vertex) -> Result<bool, ConsensusError> {
        let inserted = self.vertex_store.insert_vertex(vertex.clone())?;
        if inserted {
            self.store
                .save_vertex_store_state(&self.vertex_store.state())?;
            self.publish(Event::InsertVertex(InsertVertexEvent {
                timestamp: SystemTime::now(),
                vertex,
            }));
        }
        Ok(inserted)
    }

    fn on_view_change(&mut self, view: View, now: Instant) -> Result<(), ConsensusError> {
        self.pending_votes.update_view(view);
        self.pending_new_views.update_view(view);
        self.publish(Event::StartView(StartViewEvent {
            timestamp: SystemTime::now(),
            leader: self.leader(view),
            view,
        }));

        // Entered on a QC for the previous view: the leader can extend it right away.
        if self.vertex_store.highest_qc().voted_view.next() == view {
            self.propose(view, now)?;
        }
        Ok(())
    }

    // Propose a vertex extending the highest QC in the vertex store, at most once per view, and process it
    // locally like any other proposal.
    fn propose(&mut self, view: View, now: Instant) -> Result<(), ConsensusError> {
        if self.leader(view) != self.me.public()
            || view <= self.last_proposed_view
            || view != self.pacemaker.current_view()
        {
            return Ok(());
        }

        let parent_qc = self.vertex_store.highest_qc().clone();
        if !self.vertex_store.contains(&parent_qc.voted_vertex_id) {
            log::warn!(
                "Cannot propose in view {}: the vertex of the highest QC ({}) was pruned",
                view,
                parent_qc.voted_vertex_id
            );
            return Ok(());
        }

        self.last_proposed_view = view;
        let vertex = Vertex::new(view, self.mempool.get_next_commands(), parent_qc);
        let proposal = Proposal {
            vertex,
            high_qc: self.safety_rules.highest_qc().clone(),
        };

        self.sender.broadcast(proposal.clone());
        self.publish(Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            proposal: proposal.clone(),
        }));

        match self.process_proposal(self.me.public(), proposal) {
            Err(err) if !err.is_fatal() => {
                log::warn!("Could not process own proposal for view {}: {:?}", view, err);
                Ok(())
            }
            result => result,
        }
    }

    // Prune, save the pruned store together with the committed view, and only then execute.
    fn commit(
        &mut self,
        committed_view: View,
        vertex_id: &CryptoHash,
    ) -> Result<(), ConsensusError> {
        let pending = self.vertex_store.commit(vertex_id)?;
        self.safety_rules
            .record_commit(committed_view, &self.vertex_store.state())?;
        let outcome = pending.execute(&mut self.state_computer);

        for (vertex, execution_outcome) in &outcome.committed {
            self.mempool.remove_committed(&vertex.command);
            log::debug!("Committed {} at view {}", vertex.id, vertex.view);
            self.publish(Event::CommitVertex(CommitVertexEvent {
                timestamp: SystemTime::now(),
                vertex: vertex.id,
                view: vertex.view,
                outcome: *execution_outcome,
            }));
        }
        if let Some((highest_committed, _)) = outcome.committed.last() {
            self.pacemaker
                .update_highest_committed_view(highest_committed.view);
        }

        for pruned in outcome.pruned {
            self.publish(Event::PruneVertex(PruneVertexEvent {
                timestamp: SystemTime::now(),
                vertex: pruned,
            }));
        }
        Ok(())
    }

    fn publish_safety_updates(&self, before: &SafetyState) {
        let after = self.safety_rules.state();
        if after.highest_qc != before.highest_qc {
            self.publish(Event::UpdateHighestQC(UpdateHighestQCEvent {
                timestamp: SystemTime::now(),
                highest_qc: after.highest_qc.clone(),
            }));
        }
        if after.locked_view != before.locked_view {
            self.publish(Event::UpdateLockedView(UpdateLockedViewEvent {
                timestamp: SystemTime::now(),
                locked_view: after.locked_view,
                locked_vertex: after.locked_vertex_id,
            }));
        }
    }
}
