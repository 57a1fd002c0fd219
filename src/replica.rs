/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica is one member of a fixed [validator set](crate::types::validators::ValidatorSet), identified by
//! its Ed25519 public key. Starting a replica spawns three threads:
//! 1. The **poller**, which pulls messages from the [`Network`] and forwards them to the algorithm thread.
//! 2. The **algorithm thread**, which runs the [event processor](crate::event_processor).
//! 3. The **event bus**, which runs the handlers registered for [events](crate::events). It is only spawned
//!    if at least one handler is registered, or event logging is enabled.
//!
//! The threads stop when the returned [`Replica`] is dropped.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .network(network)
//!     .kv_store(kv_store)
//!     .state_computer(state_computer)
//!     .mempool(mempool)
//!     .validator_set(validator_set)
//!     .configuration(configuration)
//!     .on_commit_vertex(commit_handler)
//!     .build()
//!     .start()?;
//! ```
//!
//! The [configuration](Configuration) is built the same way:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(signing_key)
//!     .sync_request_limit(16)
//!     .sync_response_timeout(Duration::from_secs(2))
//!     .sync_max_retries(5)
//!     .message_buffer_capacity(BufferSize::new(1024))
//!     .timeout_policy(TimeoutPolicy::Exponential { base: Duration::from_secs(1), rate: 2.0, max_exponent: 6 })
//!     .log_events(true)
//!     .build()
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
    time::{Duration, Instant},
};

use typed_builder::TypedBuilder;

use crate::{
    algorithm::Algorithm,
    app::{Mempool, StateComputer},
    event_bus::*,
    event_processor::{BFTEventProcessor, ConsensusError, EventProcessorConfiguration},
    events::*,
    networking::{start_polling, Network},
    pacemaker::TimeoutPolicy,
    persistence::KVStore,
    types::{
        basic::BufferSize,
        crypto_primitives::{Keypair, SigningKey},
        validators::ValidatorSet,
    },
};

/// The user-defined parameters of a replica.
///
/// ## Sync
///
/// When the replica learns of a QC for a vertex it does not have, it asks the QC's sender for the vertex and
/// up to `sync_request_limit - 1` of its ancestors. If no useful response arrives within
/// `sync_response_timeout`, the request is sent to another validator, up to `sync_max_retries` times.
///
/// ## Log Events
///
/// The replica logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
/// onto a terminal or to a file, set up a logging implementation.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.sync_request_limit(...)`
    - `.sync_response_timeout(...)`
    - `.sync_max_retries(...)`
    - `.message_buffer_capacity(...)`
    - `.timeout_policy(...)`
    - `.log_events(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the replica's signing key, used to sign votes. Required."))]
    pub me: SigningKey,
    #[builder(setter(
        doc = "Set the maximum number of vertices requested from, or served to, a peer in one sync message. Required."
    ))]
    pub sync_request_limit: u32,
    #[builder(setter(doc = "Set how long to wait for a sync response before asking another peer. Required."))]
    pub sync_response_timeout: Duration,
    #[builder(setter(doc = "Set how many times a sync is retried before giving up. Required."))]
    pub sync_max_retries: u32,
    #[builder(setter(
        doc = "Set the maximum number of messages for future views held by the replica at any moment. Required."
    ))]
    pub message_buffer_capacity: BufferSize,
    #[builder(setter(doc = "Set how long each view lasts before timing out. Required."))]
    pub timeout_policy: TimeoutPolicy,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

impl From<Configuration> for (Keypair, EventProcessorConfiguration) {
    fn from(configuration: Configuration) -> Self {
        (
            Keypair::new(configuration.me),
            EventProcessorConfiguration {
                sync_request_limit: configuration.sync_request_limit,
                sync_response_timeout: configuration.sync_response_timeout,
                sync_max_retries: configuration.sync_max_retries,
                message_buffer_capacity: configuration.message_buffer_capacity,
                timeout_policy: configuration.timeout_policy,
            },
        )
    }
}

/// Stores all parameters and trait implementations required to run a [`Replica`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.network(...)`
    - `.kv_store(...)`
    - `.state_computer(...)`
    - `.mempool(...)`
    - `.validator_set(...)`
    - `.configuration(...)`

    Optional:
    - `.on_insert_vertex(...)`
    - `.on_commit_vertex(...)`
    - `.on_prune_vertex(...)`
    - `.on_update_highest_qc(...)`
    - `.on_update_locked_view(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_new_view(...)`
    - `.on_receive_proposal(...)`
    - `.on_receive_vote(...)`
    - `.on_receive_new_view(...)`
    - `.on_start_view(...)`
    - `.on_view_timeout(...)`
    - `.on_collect_qc(...)`
    - `.on_start_sync(...)`
    - `.on_end_sync(...)`
    - `.on_receive_sync_request(...)`
    - `.on_send_sync_response(...)`
"))]
pub struct ReplicaSpec<K: KVStore, N: Network + 'static, S: StateComputer, M: Mempool> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. Required."))]
    network: N,
    #[builder(setter(doc = "Set the key-value store in which consensus state is persisted. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the execution engine that committed vertices are applied to. Required."))]
    state_computer: S,
    #[builder(setter(doc = "Set the source of commands proposed by this replica. Required."))]
    mempool: M,
    #[builder(setter(doc = "Set the validators and their voting power. Required."))]
    validator_set: ValidatorSet,
    #[builder(setter(doc = "Set the [configuration](Configuration) of the replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&InsertVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<InsertVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex is inserted into the vertex store. Optional."))]
    on_insert_vertex: Option<HandlerPtr<InsertVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex is committed and executed. Optional."))]
    on_commit_vertex: Option<HandlerPtr<CommitVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PruneVertexEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PruneVertexEvent>),
    doc = "Register a handler closure to be invoked after a vertex on an abandoned branch is removed from the vertex store. Optional."))]
    on_prune_vertex: Option<HandlerPtr<PruneVertexEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateHighestQCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateHighestQCEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its highest QC. Optional."))]
    on_update_highest_qc: Option<HandlerPtr<UpdateHighestQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&UpdateLockedViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<UpdateLockedViewEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its locked view. Optional."))]
    on_update_locked_view: Option<HandlerPtr<UpdateLockedViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the replica broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a new view message to the next leader. Optional."))]
    on_new_view: Option<HandlerPtr<NewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveVoteEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a vote. Optional."))]
    on_receive_vote: Option<HandlerPtr<ReceiveVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveNewViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveNewViewEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a new view message. Optional."))]
    on_receive_new_view: Option<HandlerPtr<ReceiveNewViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartViewEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartViewEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new view. Optional."))]
    on_start_view: Option<HandlerPtr<StartViewEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ViewTimeoutEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ViewTimeoutEvent>),
    doc = "Register a handler closure to be invoked after the replica's view times out. Optional."))]
    on_view_timeout: Option<HandlerPtr<ViewTimeoutEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CollectQCEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CollectQCEvent>),
    doc = "Register a handler closure to be invoked after the replica forms a QC from collected votes. Optional."))]
    on_collect_qc: Option<HandlerPtr<CollectQCEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica asks a peer for missing vertices. Optional."))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EndSyncEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EndSyncEvent>),
    doc = "Register a handler closure to be invoked after the replica has fetched every vertex it was missing for a sync. Optional."))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>),
    doc = "Register a handler closure to be invoked after the replica receives a sync request from a peer. Optional."))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>),
    doc = "Register a handler closure to be invoked after the replica sends a sync response to a peer. Optional."))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
}

impl<K: KVStore, N: Network + 'static, S: StateComputer, M: Mempool> ReplicaSpec<K, N, S, M> {
    /// Start all threads and channels associated with running a replica, and return the handles to them in a
    /// [`Replica`].
    ///
    /// Fails without spawning anything if the consensus state in the key-value store cannot be loaded, the
    /// validator set cannot form a quorum, or the timeout policy is invalid.
    pub fn start(mut self) -> Result<Replica, ConsensusError> {
        self.network.init_validator_set(self.validator_set.clone());

        let log_events = self.configuration.log_events;
        let (keypair, processor_config): (Keypair, EventProcessorConfiguration) =
            self.configuration.into();

        let event_handlers = EventHandlers::new(
            log_events,
            UserHandlers {
                on_insert_vertex: self.on_insert_vertex,
                on_commit_vertex: self.on_commit_vertex,
                on_prune_vertex: self.on_prune_vertex,
                on_update_highest_qc: self.on_update_highest_qc,
                on_update_locked_view: self.on_update_locked_view,
                on_propose: self.on_propose,
                on_vote: self.on_vote,
                on_new_view: self.on_new_view,
                on_receive_proposal: self.on_receive_proposal,
                on_receive_vote: self.on_receive_vote,
                on_receive_new_view: self.on_receive_new_view,
                on_start_view: self.on_start_view,
                on_view_timeout: self.on_view_timeout,
                on_collect_qc: self.on_collect_qc,
                on_start_sync: self.on_start_sync,
                on_end_sync: self.on_end_sync,
                on_receive_sync_request: self.on_receive_sync_request,
                on_send_sync_response: self.on_send_sync_response,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let processor = BFTEventProcessor::new(
            keypair,
            self.validator_set,
            self.kv_store,
            self.network.clone(),
            self.state_computer,
            self.mempool,
            processor_config,
            event_publisher,
            Instant::now(),
        )?;

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, messages) = start_polling(self.network, poller_shutdown_receiver);

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = Algorithm::new(processor, messages, algorithm_shutdown_receiver).start();

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Replica {
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Replica {
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Drop for Replica {
    fn drop(&mut self) {
        // The algorithm thread receives messages from the poller, so the poller is stopped last. A send fails
        // only if the thread already exited, which is fine.
        if let Some(shutdown) = &self.event_bus_shutdown {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.algorithm_shutdown.send(());
        if let Some(algorithm) = self.algorithm.take() {
            let _ = algorithm.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
