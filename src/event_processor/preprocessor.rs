/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The preprocessor stage of the event processor, and the processor's public interface.
//!
//! ## View-aware delivery
//!
//! Progress messages ([`Proposal`], [`Vote`], and [`NewView`]) are delivered to the reducer only in the
//! view they are intended for:
//! 1. Messages for views below the current view are dropped.
//! 2. Messages for the current view are delivered right away.
//! 3. Messages for future views are buffered and delivered once the replica enters their view. If the buffer
//!    is full, messages for the highest views are removed first.
//!
//! The QCs carried by proposals and new views are processed *before* the view check, since a QC for the
//! current view or a later one is exactly what moves the replica forward.
//!
//! ## Missing vertices
//!
//! A QC whose vertex is above the vertex store's root but not in the store cannot be processed. The message
//! carrying it (or the QC itself, if it was formed locally from votes) is *parked* under the missing vertex,
//! and a [vertex sync](crate::vertex_store::sync) is started against the message's sender. Parked messages
//! are processed again once their vertex is in the store, whether it arrived through the sync or any other
//! way, and are dropped if the sync gives up.

use std::{
    collections::HashMap,
    sync::mpsc::Sender,
    time::{Instant, SystemTime},
};

use crate::{
    app::{Mempool, StateComputer},
    events::{EndSyncEvent, Event, StartSyncEvent},
    messages::{ConsensusMessage, GetVerticesErrorResponse, GetVerticesResponse, NewView, Proposal, Vote},
    networking::Network,
    persistence::KVStore,
    safety::SafetyState,
    types::{
        basic::{CryptoHash, View},
        certificates::QuorumCertificate,
        crypto_primitives::{Keypair, VerifyingKey},
        validators::ValidatorSet,
    },
    vertex_store::{
        sync::{SyncProgress, SyncRetry, VertexSync},
        VertexStore,
    },
};

use super::{
    message_buffer::MessageBuffer, reducer::BFTEventReducer, ConsensusError,
    EventProcessorConfiguration, InvalidMessage,
};

/// A message or locally formed QC waiting for a missing vertex.
enum Parked {
    Message {
        origin: VerifyingKey,
        msg: ConsensusMessage,
    },
    Certificate {
        origin: VerifyingKey,
        qc: QuorumCertificate,
    },
}

/// The event loop of a replica's consensus core.
///
/// The processor does not own a thread or a clock: the caller feeds it messages with
/// [`process_message`](Self::process_message), calls [`tick`](Self::tick) to let it act on timeouts, and
/// uses [`next_deadline`](Self::next_deadline) to know when the next tick is due.
pub struct BFTEventProcessor<K: KVStore, N: Network, S: StateComputer, M: Mempool> {
    reducer: BFTEventReducer<K, N, S, M>,
    buffer: MessageBuffer,
    sync: VertexSync,
    parked: HashMap<CryptoHash, Vec<Parked>>,
    parked_capacity: usize,
}

impl<K: KVStore, N: Network, S: StateComputer, M: Mempool> BFTEventProcessor<K, N, S, M> {
    /// Create a processor from the consensus state saved in `kv_store`, or from genesis if there is none.
    ///
    /// Fails if `validator_set` cannot form a quorum, the timeout policy is invalid, or the saved state cannot
    /// be read.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        me: Keypair,
        validator_set: ValidatorSet,
        kv_store: K,
        network: N,
        state_computer: S,
        mempool: M,
        configuration: EventProcessorConfiguration,
        event_publisher: Option<Sender<Event>>,
        now: Instant,
    ) -> Result<Self, ConsensusError> {
        let reducer = BFTEventReducer::new(
            me,
            validator_set,
            kv_store,
            network,
            state_computer,
            mempool,
            configuration.timeout_policy,
            configuration.sync_request_limit,
            event_publisher,
            now,
        )?;

        Ok(Self {
            reducer,
            buffer: MessageBuffer::new(configuration.message_buffer_capacity),
            sync: VertexSync::new(
                configuration.sync_request_limit,
                configuration.sync_response_timeout,
                configuration.sync_max_retries,
            ),
            parked: HashMap::new(),
            parked_capacity: configuration.message_buffer_capacity.int(),
        })
    }

    /// Enter the initial view, proposing in it if this replica is its leader.
    pub fn start(&mut self, now: Instant) -> Result<(), ConsensusError> {
        self.reducer.start(now)?;
        self.settle(now)?;
        self.process_local_messages(now)
    }

    /// Process a message received from `origin`.
    ///
    /// Errors that are not [fatal](ConsensusError::is_fatal) describe why the message was dropped (or, for
    /// [`ConsensusError::MissingAncestor`], parked). The processor can keep going after them.
    pub fn process_message(
        &mut self,
        origin: VerifyingKey,
        msg: ConsensusMessage,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let result = self.dispatch(origin, msg, now);
        if let Err(err) = &result {
            if err.is_fatal() {
                return result;
            }
        }
        self.settle(now)?;
        result
    }

    /// Process the messages this replica sent to itself while processing earlier messages, such as its own
    /// vote when it is the next leader. Messages produced by this call are left for the next call.
    pub fn process_local_messages(&mut self, now: Instant) -> Result<(), ConsensusError> {
        let me = self.reducer.me();
        for (_, msg) in self.reducer.take_local_messages() {
            recover(self.process_message(me, msg, now))?;
        }
        Ok(())
    }

    pub fn has_local_messages(&self) -> bool {
        self.reducer.has_local_messages()
    }

    /// Act on every deadline that passed by `now`: the view timeout and sync response timeouts.
    pub fn tick(&mut self, now: Instant) -> Result<(), ConsensusError> {
        if self.reducer.is_timed_out(now) {
            self.reducer.process_local_timeout(now)?;
        }
        for target in self.sync.expired(now) {
            self.retry_sync(target, now);
        }
        self.settle(now)
    }

    /// The earliest instant at which [`tick`](Self::tick) has something to do.
    pub fn next_deadline(&self) -> Instant {
        match self.sync.next_deadline() {
            Some(sync_deadline) => sync_deadline.min(self.reducer.deadline()),
            None => self.reducer.deadline(),
        }
    }

    pub fn current_view(&self) -> View {
        self.reducer.current_view()
    }

    pub fn safety_state(&self) -> &SafetyState {
        self.reducer.safety_state()
    }

    pub fn vertex_store(&self) -> &VertexStore {
        self.reducer.vertex_store()
    }

    /// Whether a sync for `vertex_id` is in progress.
    pub fn is_syncing(&self, vertex_id: &CryptoHash) -> bool {
        self.sync.is_syncing(vertex_id)
    }

    /// Number of future-view messages waiting in the buffer.
    pub fn buffered_messages(&self) -> usize {
        self.buffer.len()
    }

    fn dispatch(
        &mut self,
        origin: VerifyingKey,
        msg: ConsensusMessage,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        match msg {
            ConsensusMessage::Proposal(proposal) => self.on_proposal(origin, proposal, now),
            ConsensusMessage::Vote(vote) => self.deliver(vote.view, origin, vote.into(), now),
            ConsensusMessage::NewView(new_view) => self.on_new_view(origin, new_view, now),
            ConsensusMessage::GetVerticesRequest(request) => {
                self.reducer.serve_get_vertices(origin, request);
                Ok(())
            }
            ConsensusMessage::GetVerticesResponse(response) => {
                self.on_sync_response(origin, response, now)
            }
            ConsensusMessage::GetVerticesErrorResponse(response) => {
                self.on_sync_error_response(origin, response, now)
            }
        }
    }

    fn on_proposal(
        &mut self,
        origin: VerifyingKey,
        proposal: Proposal,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        // Own proposals are processed when they are made.
        if origin == self.reducer.me() {
            return Ok(());
        }

        let view = proposal.vertex.view;
        if view < self.reducer.current_view() {
            log::debug!("Dropping proposal for past view {}", view);
            return Ok(());
        }

        let validator_set = self.reducer.validator_set();
        if !proposal.vertex.is_correct(validator_set) {
            return Err(InvalidMessage::IncorrectVertex {
                vertex_id: proposal.vertex.id,
            }
            .into());
        }
        if !proposal.high_qc.is_correct(validator_set) {
            return Err(InvalidMessage::IncorrectQC {
                voted_view: proposal.high_qc.voted_view,
            }
            .into());
        }

        let qcs = [proposal.vertex.qc.clone(), proposal.high_qc.clone()];
        if let Some(missing) = self.first_missing(&qcs) {
            return self.park(missing, origin, Parked::Message { origin, msg: proposal.into() }, now);
        }
        for qc in &qcs {
            self.reducer.process_qc(qc, now)?;
        }

        self.deliver(view, origin, proposal.into(), now)
    }

    fn on_new_view(
        &mut self,
        origin: VerifyingKey,
        new_view: NewView,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let view = new_view.view;
        if view < self.reducer.current_view() {
            log::debug!("Dropping new view for past view {}", view);
            return Ok(());
        }

        if !new_view.high_qc.is_correct(self.reducer.validator_set()) {
            return Err(InvalidMessage::IncorrectQC {
                voted_view: new_view.high_qc.voted_view,
            }
            .into());
        }

        if let Some(missing) = self.first_missing(std::slice::from_ref(&new_view.high_qc)) {
            return self.park(missing, origin, Parked::Message { origin, msg: new_view.into() }, now);
        }
        self.reducer.process_qc(&new_view.high_qc, now)?;

        self.deliver(view, origin, new_view.into(), now)
    }

    // Hand a progress message to the reducer if it is for the current view, or buffer it if it is for a
    // future one.
    fn deliver(
        &mut self,
        view: View,
        origin: VerifyingKey,
        msg: ConsensusMessage,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let cur_view = self.reducer.current_view();
        if view < cur_view {
            log::debug!("Dropping message for past view {} (current view: {})", view, cur_view);
            return Ok(());
        }
        if view > cur_view {
            if !self.buffer.insert(view, origin, msg) {
                log::debug!("Message buffer is full, dropping message for view {}", view);
            }
            return Ok(());
        }

        match msg {
            ConsensusMessage::Proposal(proposal) => self.reducer.process_proposal(origin, proposal),
            ConsensusMessage::Vote(vote) => self.collect_vote(origin, vote, now),
            ConsensusMessage::NewView(new_view) => {
                self.reducer.process_new_view(origin, new_view, now)
            }
            ConsensusMessage::GetVerticesRequest(_)
            | ConsensusMessage::GetVerticesResponse(_)
            | ConsensusMessage::GetVerticesErrorResponse(_) => Ok(()),
        }
    }

    fn collect_vote(
        &mut self,
        origin: VerifyingKey,
        vote: Vote,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        match self.reducer.collect_vote(origin, vote)? {
            Some(qc) => self.handle_qc(origin, qc, now),
            None => Ok(()),
        }
    }

    fn handle_qc(
        &mut self,
        origin: VerifyingKey,
        qc: QuorumCertificate,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        if let Some(missing) = self.first_missing(std::slice::from_ref(&qc)) {
            return self.park(missing, origin, Parked::Certificate { origin, qc }, now);
        }
        self.reducer.process_qc(&qc, now)
    }

    // The id of the first vertex referenced by `qcs` that is above the root but not in the vertex store.
    fn first_missing(&self, qcs: &[QuorumCertificate]) -> Option<CryptoHash> {
        let vertex_store = self.reducer.vertex_store();
        let root_view = vertex_store.root().view;
        qcs.iter()
            .find(|qc| qc.voted_view > root_view && !vertex_store.contains(&qc.voted_vertex_id))
            .map(|qc| qc.voted_vertex_id)
    }

    fn park(
        &mut self,
        target: CryptoHash,
        origin: VerifyingKey,
        parked: Parked,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let me = self.reducer.me();
        let peer = if origin == me {
            match self.reducer.validator_set().random_except(&[me]) {
                Some(peer) => peer,
                None => return Err(ConsensusError::MissingAncestor { vertex_id: target }),
            }
        } else {
            origin
        };

        if self.parked.values().map(Vec::len).sum::<usize>() < self.parked_capacity {
            self.parked.entry(target).or_default().push(parked);
        } else {
            log::debug!("Too many messages waiting for sync, dropping one waiting for {}", target);
        }

        if let Some(request) = self.sync.start(target, peer, now) {
            self.reducer.publish(Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                peer,
                target,
            }));
            self.reducer.send(peer, request);
        }

        Err(ConsensusError::MissingAncestor { vertex_id: target })
    }

    fn on_sync_response(
        &mut self,
        origin: VerifyingKey,
        response: GetVerticesResponse,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        let vertex_store = self.reducer.vertex_store();
        let progress = self.sync.on_response(
            response,
            &origin,
            self.reducer.validator_set(),
            vertex_store.root().view,
            |id| vertex_store.contains(id),
            now,
        );

        match progress {
            SyncProgress::Complete { target, vertices } => {
                let vertices_synced = vertices.len() as u64;
                for vertex in vertices {
                    if let Err(err) = self.reducer.insert_vertex(vertex) {
                        if !err.is_fatal() {
                            log::warn!("Synced vertex for {} was rejected: {:?}", target, err);
                            self.parked.remove(&target);
                        }
                        return Err(err);
                    }
                }
                self.reducer.publish(Event::EndSync(EndSyncEvent {
                    timestamp: SystemTime::now(),
                    target,
                    vertices_synced,
                }));
                Ok(())
            }
            SyncProgress::Continue { peer, request } => {
                self.reducer.send(peer, request);
                Ok(())
            }
            SyncProgress::Unsolicited => {
                log::debug!("Ignoring unsolicited sync response");
                Ok(())
            }
            SyncProgress::Invalid { target } => {
                self.retry_sync(target, now);
                Ok(())
            }
        }
    }

    fn on_sync_error_response(
        &mut self,
        origin: VerifyingKey,
        response: GetVerticesErrorResponse,
        now: Instant,
    ) -> Result<(), ConsensusError> {
        if let Some(target) = self
            .sync
            .on_error_response(&response.request.vertex_id, &origin)
        {
            self.retry_sync(target, now);
        }

        // The responder may know of a newer branch than this replica does.
        let high_qc = response.high_qc;
        if high_qc.voted_view <= self.reducer.safety_state().highest_qc.voted_view {
            return Ok(());
        }
        if !high_qc.is_correct(self.reducer.validator_set()) {
            return Err(InvalidMessage::IncorrectQC {
                voted_view: high_qc.voted_view,
            }
            .into());
        }
        self.handle_qc(origin, high_qc, now)
    }

    fn retry_sync(&mut self, target: CryptoHash, now: Instant) {
        let me = self.reducer.me();
        match self
            .sync
            .retry(&target, self.reducer.validator_set(), &me, now)
        {
            SyncRetry::Retry { peer, request } => {
                log::debug!("Retrying sync for {} with another peer", target);
                self.reducer.publish(Event::StartSync(StartSyncEvent {
                    timestamp: SystemTime::now(),
                    peer,
                    target,
                }));
                self.reducer.send(peer, request);
            }
            SyncRetry::GaveUp { target } => {
                let dropped = self.parked.remove(&target).map_or(0, |parked| parked.len());
                log::warn!(
                    "Gave up syncing {}, dropping {} waiting messages",
                    target,
                    dropped
                );
            }
        }
    }

    // Process everything that became processable: parked messages whose vertex is now known, and buffered
    // messages for the current view. Repeats until nothing changes, since each step can unblock others.
    fn settle(&mut self, now: Instant) -> Result<(), ConsensusError> {
        loop {
            let mut progressed = false;

            let arrived: Vec<CryptoHash> = self
                .sync
                .targets()
                .into_iter()
                .chain(self.parked.keys().copied())
                .filter(|target| self.reducer.vertex_store().contains(target))
                .collect();
            for target in arrived {
                self.sync.cancel(&target);
                for parked in self.parked.remove(&target).unwrap_or_default() {
                    progressed = true;
                    let result = match parked {
                        Parked::Message { origin, msg } => self.dispatch(origin, msg, now),
                        Parked::Certificate { origin, qc } => self.handle_qc(origin, qc, now),
                    };
                    recover(result)?;
                }
            }

            self.buffer
                .remove_expired_msgs(self.reducer.current_view());
            while let Some((origin, msg)) = self.buffer.pop(self.reducer.current_view()) {
                progressed = true;
                recover(self.dispatch(origin, msg, now))?;
            }

            if !progressed {
                return Ok(());
            }
        }
    }
}

// Log a non-fatal error and carry on. Fatal errors are passed through.
fn recover(result: Result<(), ConsensusError>) -> Result<(), ConsensusError> {
    match result {
        Err(err) if !err.is_fatal() => {
            log::debug!("Dropped message: {:?}", err);
            Ok(())
        }
        result => result,
    }
}
