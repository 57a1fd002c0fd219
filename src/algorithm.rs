/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The algorithm thread, which owns the replica's [`BFTEventProcessor`] and drives it.
//!
//! The thread loops until it is told to shut down:
//! 1. If the replica sent messages to itself, process them first.
//! 2. Otherwise, wait for a message from the poller until the processor's next deadline, and process it.
//! 3. Let the processor act on every deadline that passed.
//!
//! Errors that are not [fatal](crate::event_processor::ConsensusError::is_fatal) are logged and forgotten.
//! A fatal error halts the thread: the replica stops taking part in consensus, but the rest of the process
//! keeps running until the [`Replica`](crate::replica::Replica) is dropped.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    app::{Mempool, StateComputer},
    event_processor::{BFTEventProcessor, ConsensusError},
    messages::ConsensusMessage,
    networking::Network,
    persistence::KVStore,
    types::crypto_primitives::VerifyingKey,
};

// Upper bound on how long the thread blocks on the message channel, so that shutdown signals are noticed.
const MAX_WAIT: Duration = Duration::from_millis(50);

pub(crate) struct Algorithm<K: KVStore, N: Network, S: StateComputer, M: Mempool> {
    processor: BFTEventProcessor<K, N, S, M>,
    messages: Receiver<(VerifyingKey, ConsensusMessage)>,
    shutdown_signal: Receiver<()>,
}

impl<K, N, S, M> Algorithm<K, N, S, M>
where
    K: KVStore,
    N: Network + 'static,
    S: StateComputer,
    M: Mempool,
{
    pub(crate) fn new(
        processor: BFTEventProcessor<K, N, S, M>,
        messages: Receiver<(VerifyingKey, ConsensusMessage)>,
        shutdown_signal: Receiver<()>,
    ) -> Self {
        Self {
            processor,
            messages,
            shutdown_signal,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Err(err) = self.processor.start(Instant::now()) {
                if err.is_fatal() {
                    log::error!("Replica failed to start: {:?}", err);
                    return;
                }
                log::debug!("{:?}", err);
            }

            loop {
                match self.shutdown_signal.try_recv() {
                    Ok(()) | Err(TryRecvError::Disconnected) => return,
                    Err(TryRecvError::Empty) => (),
                }

                if let Err(err) = self.step() {
                    log::error!(
                        "Replica halted in view {}: {:?}",
                        self.processor.current_view(),
                        err
                    );
                    return;
                }
            }
        })
    }

    // Run one iteration of the loop. Returns only fatal errors.
    fn step(&mut self) -> Result<(), ConsensusError> {
        if self.processor.has_local_messages() {
            self.processor.process_local_messages(Instant::now())?;
        } else {
            let now = Instant::now();
            let wait = self
                .processor
                .next_deadline()
                .saturating_duration_since(now)
                .min(MAX_WAIT);
            match self.messages.recv_timeout(wait) {
                Ok((origin, msg)) => {
                    handle_error(self.processor.process_message(origin, msg, Instant::now()))?
                }
                Err(RecvTimeoutError::Timeout) => (),
                // The poller has stopped, so the replica is shutting down.
                Err(RecvTimeoutError::Disconnected) => thread::sleep(MAX_WAIT),
            }
        }

        handle_error(self.processor.tick(Instant::now()))
    }
}

fn handle_error(result: Result<(), ConsensusError>) -> Result<(), ConsensusError> {
    match result {
        Err(err) if !err.is_fatal() => {
            log::debug!("{:?}", err);
            Ok(())
        }
        result => result,
    }
}
