//! A simple, volatile, in-memory implementation of [`KVStore`].

use std::{
    collections::{HashMap, HashSet},
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use vertex_bft::persistence::{KVGet, KVStore, WriteBatch};

type Trigger = Box<dyn Fn() -> bool + Send>;

/// An in-memory implementation of [`KVStore`]. Clones share the same map, so a clone kept by a test sees
/// everything the replica writes.
#[derive(Clone)]
pub(crate) struct MemDB {
    map: Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    fail_when: Arc<Mutex<Option<Trigger>>>,
}

impl MemDB {
    pub(crate) fn new() -> MemDB {
        MemDB {
            map: Arc::new(Mutex::new(HashMap::new())),
            fail_writes: Arc::new(AtomicBool::new(false)),
            fail_when: Arc::new(Mutex::new(None)),
        }
    }

    /// Make every subsequent write fail, as a full or broken disk would.
    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every write fail from the first one at which `trigger` returns true, as a crash at that point would.
    pub(crate) fn fail_writes_when(&self, trigger: impl Fn() -> bool + Send + 'static) {
        *self.fail_when.lock().unwrap() = Some(Box::new(trigger));
    }

    /// Let writes succeed again, as after a restart.
    pub(crate) fn restore_writes(&self) {
        *self.fail_when.lock().unwrap() = None;
        self.fail_writes.store(false, Ordering::SeqCst);
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;

    fn write(&mut self, wb: Self::WriteBatch) -> Result<(), io::Error> {
        let tripped = self
            .fail_when
            .lock()
            .unwrap()
            .as_ref()
            .map_or(false, |trigger| trigger());
        if tripped {
            self.fail_writes.store(true, Ordering::SeqCst);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "disk unavailable"));
        }

        let mut map = self.map.lock().unwrap();
        for (key, value) in wb.insertions {
            map.insert(key, value);
        }
        for key in wb.deletions {
            map.remove(&key);
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<(), io::Error> {
        self.map.lock().unwrap().clear();
        Ok(())
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.map.lock().unwrap().get(key).cloned()
    }
}

pub(crate) struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}
