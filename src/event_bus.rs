/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the algorithm thread and runs
//! the handlers registered for them.
//!
//! Handlers come from two sources: the closures passed to the `on_*` setters of
//! [`ReplicaSpec`](crate::replica::ReplicaSpec), and, if `log_events` is set in the replica's
//! [`Configuration`](crate::replica::Configuration), the default [loggers](crate::logging). The bus is only
//! started if at least one handler is registered.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

// How long the bus waits on the event channel before checking for shutdown again.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) insert_vertex_handlers: Vec<HandlerPtr<InsertVertexEvent>>,
    pub(crate) commit_vertex_handlers: Vec<HandlerPtr<CommitVertexEvent>>,
    pub(crate) prune_vertex_handlers: Vec<HandlerPtr<PruneVertexEvent>>,
    pub(crate) update_highest_qc_handlers: Vec<HandlerPtr<UpdateHighestQCEvent>>,
    pub(crate) update_locked_view_handlers: Vec<HandlerPtr<UpdateLockedViewEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) new_view_handlers: Vec<HandlerPtr<NewViewEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) receive_vote_handlers: Vec<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) receive_new_view_handlers: Vec<HandlerPtr<ReceiveNewViewEvent>>,
    pub(crate) start_view_handlers: Vec<HandlerPtr<StartViewEvent>>,
    pub(crate) view_timeout_handlers: Vec<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) collect_qc_handlers: Vec<HandlerPtr<CollectQCEvent>>,
    pub(crate) start_sync_handlers: Vec<HandlerPtr<StartSyncEvent>>,
    pub(crate) end_sync_handlers: Vec<HandlerPtr<EndSyncEvent>>,
    pub(crate) receive_sync_request_handlers: Vec<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) send_sync_response_handlers: Vec<HandlerPtr<SendSyncResponseEvent>>,
}

/// The user-defined handlers, one optional closure per event type, as collected by
/// [`ReplicaSpec`](crate::replica::ReplicaSpec).
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_insert_vertex: Option<HandlerPtr<InsertVertexEvent>>,
    pub(crate) on_commit_vertex: Option<HandlerPtr<CommitVertexEvent>>,
    pub(crate) on_prune_vertex: Option<HandlerPtr<PruneVertexEvent>>,
    pub(crate) on_update_highest_qc: Option<HandlerPtr<UpdateHighestQCEvent>>,
    pub(crate) on_update_locked_view: Option<HandlerPtr<UpdateLockedViewEvent>>,
    pub(crate) on_propose: Option<HandlerPtr<ProposeEvent>>,
    pub(crate) on_vote: Option<HandlerPtr<VoteEvent>>,
    pub(crate) on_new_view: Option<HandlerPtr<NewViewEvent>>,
    pub(crate) on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    pub(crate) on_receive_new_view: Option<HandlerPtr<ReceiveNewViewEvent>>,
    pub(crate) on_start_view: Option<HandlerPtr<StartViewEvent>>,
    pub(crate) on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    pub(crate) on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    pub(crate) on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    pub(crate) on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    pub(crate) on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    pub(crate) on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
}

// Registers the default logger (if logging is enabled) followed by the user's handler (if any).
fn handlers_for<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> EventHandlers {
        EventHandlers {
            insert_vertex_handlers: handlers_for(log_events, user_handlers.on_insert_vertex),
            commit_vertex_handlers: handlers_for(log_events, user_handlers.on_commit_vertex),
            prune_vertex_handlers: handlers_for(log_events, user_handlers.on_prune_vertex),
            update_highest_qc_handlers: handlers_for(log_events, user_handlers.on_update_highest_qc),
            update_locked_view_handlers: handlers_for(log_events, user_handlers.on_update_locked_view),
            propose_handlers: handlers_for(log_events, user_handlers.on_propose),
            vote_handlers: handlers_for(log_events, user_handlers.on_vote),
            new_view_handlers: handlers_for(log_events, user_handlers.on_new_view),
            receive_proposal_handlers: handlers_for(log_events, user_handlers.on_receive_proposal),
            receive_vote_handlers: handlers_for(log_events, user_handlers.on_receive_vote),
            receive_new_view_handlers: handlers_for(log_events, user_handlers.on_receive_new_view),
            start_view_handlers: handlers_for(log_events, user_handlers.on_start_view),
            view_timeout_handlers: handlers_for(log_events, user_handlers.on_view_timeout),
            collect_qc_handlers: handlers_for(log_events, user_handlers.on_collect_qc),
            start_sync_handlers: handlers_for(log_events, user_handlers.on_start_sync),
            end_sync_handlers: handlers_for(log_events, user_handlers.on_end_sync),
            receive_sync_request_handlers: handlers_for(log_events, user_handlers.on_receive_sync_request),
            send_sync_response_handlers: handlers_for(log_events, user_handlers.on_send_sync_response),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.insert_vertex_handlers.is_empty()
            && self.commit_vertex_handlers.is_empty()
            && self.prune_vertex_handlers.is_empty()
            && self.update_highest_qc_handlers.is_empty()
            && self.update_locked_view_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.new_view_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.receive_vote_handlers.is_empty()
            && self.receive_new_view_handlers.is_empty()
            && self.start_view_handlers.is_empty()
            && self.view_timeout_handlers.is_empty()
            && self.collect_qc_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        fn fire<T>(handlers: &[HandlerPtr<T>], event: &T) {
            handlers.iter().for_each(|handler| handler(event))
        }

        match event {
            Event::InsertVertex(event) => fire(&self.insert_vertex_handlers, &event),
            Event::CommitVertex(event) => fire(&self.commit_vertex_handlers, &event),
            Event::PruneVertex(event) => fire(&self.prune_vertex_handlers, &event),
            Event::UpdateHighestQC(event) => fire(&self.update_highest_qc_handlers, &event),
            Event::UpdateLockedView(event) => fire(&self.update_locked_view_handlers, &event),
            Event::Propose(event) => fire(&self.propose_handlers, &event),
            Event::Vote(event) => fire(&self.vote_handlers, &event),
            Event::NewView(event) => fire(&self.new_view_handlers, &event),
            Event::ReceiveProposal(event) => fire(&self.receive_proposal_handlers, &event),
            Event::ReceiveVote(event) => fire(&self.receive_vote_handlers, &event),
            Event::ReceiveNewView(event) => fire(&self.receive_new_view_handlers, &event),
            Event::StartView(event) => fire(&self.start_view_handlers, &event),
            Event::ViewTimeout(event) => fire(&self.view_timeout_handlers, &event),
            Event::CollectQC(event) => fire(&self.collect_qc_handlers, &event),
            Event::StartSync(event) => fire(&self.start_sync_handlers, &event),
            Event::EndSync(event) => fire(&self.end_sync_handlers, &event),
            Event::ReceiveSyncRequest(event) => fire(&self.receive_sync_request_handlers, &event),
            Event::SendSyncResponse(event) => fire(&self.send_sync_response_handlers, &event),
        }
    }
}

/// Spawn the event bus thread. The thread runs until it receives a shutdown signal, firing handlers for
/// events in the order they were published.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The algorithm thread has stopped. Wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(EVENT_POLL_INTERVAL),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{mpsc, Arc, Mutex},
        time::SystemTime,
    };

    use super::*;
    use crate::types::basic::{CryptoHash, View};

    #[test]
    fn no_handlers_means_empty() {
        assert!(EventHandlers::new(false, UserHandlers::default()).is_empty());
        assert!(!EventHandlers::new(true, UserHandlers::default()).is_empty());
    }

    #[test]
    fn user_handler_receives_published_events() {
        let pruned = Arc::new(Mutex::new(Vec::new()));
        let pruned_clone = pruned.clone();
        let user_handlers = UserHandlers {
            on_prune_vertex: Some(Box::new(move |event: &PruneVertexEvent| {
                pruned_clone.lock().unwrap().push(event.vertex)
            })),
            ..Default::default()
        };
        let handlers = EventHandlers::new(false, user_handlers);
        assert!(!handlers.is_empty());

        let (publisher, subscriber) = mpsc::channel();
        let (shutdown, shutdown_receiver) = mpsc::channel();
        let event_bus = start_event_bus(handlers, subscriber, shutdown_receiver);

        let publisher = Some(publisher);
        Event::PruneVertex(PruneVertexEvent {
            timestamp: SystemTime::now(),
            vertex: CryptoHash::new([7u8; 32]),
        })
        .publish(&publisher);
        // Events without a registered handler are dropped.
        Event::ViewTimeout(ViewTimeoutEvent {
            timestamp: SystemTime::now(),
            view: View::new(1),
            timeout: Duration::from_secs(1),
        })
        .publish(&publisher);

        while pruned.lock().unwrap().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        shutdown.send(()).unwrap();
        event_bus.join().unwrap();

        assert_eq!(*pruned.lock().unwrap(), vec![CryptoHash::new([7u8; 32])]);
    }
}
