/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The safety and liveness core of a HotStuff-family BFT consensus engine.
//!
//! Replicas agree, view by view, on a tree of [vertices](types::vertex::Vertex), each carrying an opaque
//! command and a [quorum certificate](types::certificates::QuorumCertificate) for its parent. The tree is
//! pruned to a single chain as vertices are committed by the 3-chain rule.
//!
//! To run a replica, implement [`Network`](networking::Network), [`KVStore`](persistence::KVStore),
//! [`StateComputer`](app::StateComputer), and [`Mempool`](app::Mempool), then build and start a
//! [`ReplicaSpec`](replica::ReplicaSpec). To drive consensus from your own event loop instead, use the
//! [`BFTEventProcessor`](event_processor::BFTEventProcessor) directly.

pub mod app;

pub(crate) mod algorithm;

pub(crate) mod event_bus;

pub mod event_processor;

pub mod events;

pub(crate) mod logging;

pub mod messages;

pub mod networking;

pub mod pacemaker;

pub mod pending_votes;

pub mod persistence;

pub mod replica;

pub mod safety;

pub mod types;

pub mod vertex_store;
