/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the poller thread that
//! feeds received messages to the algorithm thread.
//!
//! Peers are identified by their [`VerifyingKey`]. The consensus core does not care how messages travel, only
//! that [`Network::recv`] reports the true origin of every message.

use std::{
    sync::mpsc::{self, Receiver, TryRecvError},
    thread::{self, JoinHandle},
};

use crate::{
    messages::ConsensusMessage,
    types::{crypto_primitives::VerifyingKey, validators::ValidatorSet},
};

pub trait Network: Clone + Send {
    /// Informs the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: ConsensusMessage);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: ConsensusMessage);

    /// Receive a message from any peer. Returns immediately with a `None` if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, ConsensusMessage)>;
}

/// Spawn the poller thread, which polls the [`Network`] for messages and forwards them, in arrival order,
/// into the returned receiver.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (JoinHandle<()>, Receiver<(VerifyingKey, ConsensusMessage)>) {
    let (to_algorithm, from_poller) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, msg)) = network.recv() {
            // The algorithm thread may already have halted, in which case messages are dropped.
            let _ = to_algorithm.send((origin, msg));
        } else {
            thread::yield_now()
        }
    });

    (poller_thread, from_poller)
}

/// Sending end of the [`Network`], as used by the algorithm thread.
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<M: Into<ConsensusMessage>>(&mut self, peer: VerifyingKey, msg: M) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<M: Into<ConsensusMessage>>(&mut self, msg: M) {
        self.network.broadcast(msg.into())
    }
}
