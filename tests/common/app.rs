use std::sync::{Arc, Mutex};

use vertex_bft::{
    app::{ExecutionOutcome, Mempool, StateComputer},
    types::{
        basic::{Command, CryptoHash, View},
        vertex::Vertex,
    },
};

/// A state computer that records the vertices it executes. Clones share the same log.
#[derive(Clone, Default)]
pub(crate) struct LedgerLog(Arc<Mutex<Vec<(View, CryptoHash)>>>);

impl LedgerLog {
    pub(crate) fn executed(&self) -> Vec<(View, CryptoHash)> {
        self.0.lock().unwrap().clone()
    }
}

impl StateComputer for LedgerLog {
    fn execute(&mut self, vertex: &Vertex) -> ExecutionOutcome {
        self.0.lock().unwrap().push((vertex.view, vertex.id));
        ExecutionOutcome::Accepted
    }
}

/// A mempool that hands out an ever-increasing counter as the command, and remembers which commands were
/// committed.
#[derive(Clone, Default)]
pub(crate) struct CounterMempool {
    next: u64,
    committed: Arc<Mutex<Vec<Command>>>,
}

impl CounterMempool {
    pub(crate) fn committed(&self) -> Vec<Command> {
        self.committed.lock().unwrap().clone()
    }
}

impl Mempool for CounterMempool {
    fn get_next_commands(&mut self) -> Command {
        self.next += 1;
        Command::new(self.next.to_le_bytes().to_vec())
    }

    fn remove_committed(&mut self, command: &Command) {
        self.committed.lock().unwrap().push(command.clone());
    }
}
