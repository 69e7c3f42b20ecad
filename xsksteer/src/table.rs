//! In-process queue-to-socket table.
//!
//! Readers load an immutable snapshot through [`ArcSwap`] and never block.
//! Writers serialize on a mutex, copy the current snapshot, apply their change
//! and publish the new snapshot in one pointer swap, so a reader sees either
//! the table before or after a registration, never a partial entry.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use thiserror::Error;
use xsksteer_common::{Endpoint, QueueEndpointTable, QueueIndex};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("cannot register queue {queue}: table is full ({capacity} entries)")]
    CapacityExceeded { queue: QueueIndex, capacity: u32 },
}

#[derive(Debug)]
pub struct SnapshotTable {
    capacity: u32,
    entries: ArcSwap<BTreeMap<QueueIndex, Endpoint>>,
    writer: Mutex<()>,
}

impl SnapshotTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            entries: ArcSwap::from_pointee(BTreeMap::new()),
            writer: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Registers `endpoint` for `queue`, returning the endpoint it replaced.
    ///
    /// Replacing an existing queue always succeeds. Adding a new queue fails
    /// once the table holds `capacity` distinct queues; the table is left
    /// untouched in that case.
    pub fn register(
        &self,
        queue: QueueIndex,
        endpoint: Endpoint,
    ) -> Result<Option<Endpoint>, TableError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.entries.load();

        if !current.contains_key(&queue) && current.len() >= self.capacity as usize {
            return Err(TableError::CapacityExceeded {
                queue,
                capacity: self.capacity,
            });
        }

        let mut next = BTreeMap::clone(&current);
        let previous = next.insert(queue, endpoint);
        self.entries.store(Arc::new(next));

        Ok(previous)
    }

    /// Removes the entry for `queue`, returning the endpoint that was registered.
    pub fn unregister(&self, queue: QueueIndex) -> Option<Endpoint> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.entries.load();
        if !current.contains_key(&queue) {
            return None;
        }

        let mut next = BTreeMap::clone(&current);
        let removed = next.remove(&queue);
        self.entries.store(Arc::new(next));

        removed
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }

    /// Consistent view of every registration at the time of the call.
    pub fn snapshot(&self) -> Arc<BTreeMap<QueueIndex, Endpoint>> {
        self.entries.load_full()
    }
}

impl QueueEndpointTable for SnapshotTable {
    fn get(&self, queue: QueueIndex) -> Option<Endpoint> {
        self.entries.load().get(&queue).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use xsksteer_common::{
        Action, DEFAULT_CAPACITY, FrameMeta, NullSink, Redirector, TraceRecord, TraceSink, decide,
        xdp_action,
    };

    use super::*;

    struct AlwaysRedirect;

    impl Redirector for AlwaysRedirect {
        fn redirect(&self, _queue: QueueIndex) -> u32 {
            xdp_action::XDP_REDIRECT
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl TraceSink for Collect {
        fn emit(&self, record: &TraceRecord) {
            self.0.lock().unwrap().push(record.to_string());
        }
    }

    #[test]
    fn redirects_registered_queue_and_passes_others() {
        let table = SnapshotTable::new(DEFAULT_CAPACITY);
        table.register(2, 7).unwrap();
        let sink = Collect::default();

        let hit = decide(&FrameMeta::new(2), &table, &AlwaysRedirect, &sink);
        let miss = decide(&FrameMeta::new(5), &table, &AlwaysRedirect, &sink);

        assert_eq!(hit.action, Action::Redirect(7));
        assert_eq!(miss.action, Action::Pass);
        assert_eq!(
            *sink.0.lock().unwrap(),
            [
                "XDP_REDIRECT queue=2, ret=4, val=7",
                "XDP_PASS queue=5 val=NULL"
            ]
        );
    }

    #[test]
    fn rejects_registration_beyond_capacity() {
        let table = SnapshotTable::new(64);
        for queue in 0..64 {
            assert_eq!(table.register(queue, 1000 + queue), Ok(None));
        }

        assert_eq!(
            table.register(64, 9999),
            Err(TableError::CapacityExceeded {
                queue: 64,
                capacity: 64
            })
        );
        assert_eq!(table.len(), 64);

        for queue in 0..64 {
            let decision = decide(&FrameMeta::new(queue), &table, &AlwaysRedirect, &NullSink);
            assert_eq!(decision.action, Action::Redirect(1000 + queue));
        }
        assert_eq!(table.get(64), None);
    }

    #[test]
    fn replacing_an_entry_at_capacity_is_allowed() {
        let table = SnapshotTable::new(2);
        table.register(0, 10).unwrap();
        table.register(1, 11).unwrap();

        assert_eq!(table.register(1, 21), Ok(Some(11)));
        assert_eq!(table.get(1), Some(21));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn unregister_frees_a_slot() {
        let table = SnapshotTable::new(1);
        table.register(3, 30).unwrap();
        assert!(table.register(4, 40).is_err());

        assert_eq!(table.unregister(3), Some(30));
        assert_eq!(table.unregister(3), None);
        assert!(table.is_empty());
        assert_eq!(table.register(4, 40), Ok(None));
    }

    #[test]
    fn snapshot_is_not_affected_by_later_writes() {
        let table = SnapshotTable::new(8);
        table.register(1, 100).unwrap();
        let before = table.snapshot();

        table.register(1, 200).unwrap();
        table.register(2, 300).unwrap();

        assert_eq!(before.get(&1), Some(&100));
        assert_eq!(before.len(), 1);
        assert_eq!(table.snapshot().len(), 2);
    }

    #[test]
    fn concurrent_readers_only_see_registered_values() {
        const QUEUES: u32 = 4;
        const VALID: [Endpoint; 2] = [0x1111_1111, 0x2222_2222];

        let table = Arc::new(SnapshotTable::new(QUEUES));
        let stop = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..QUEUES)
            .map(|queue| {
                let table = Arc::clone(&table);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut observed = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let decision =
                            decide(&FrameMeta::new(queue), &*table, &AlwaysRedirect, &NullSink);
                        match decision.action {
                            Action::Redirect(endpoint) => {
                                assert!(VALID.contains(&endpoint), "torn value {endpoint:#x}");
                                observed += 1;
                            }
                            Action::Pass => {}
                        }
                    }
                    observed
                })
            })
            .collect();

        for round in 0..2_000u32 {
            let endpoint = VALID[(round % 2) as usize];
            for queue in 0..QUEUES {
                if round % 7 == 0 {
                    table.unregister(queue);
                } else {
                    table.register(queue, endpoint).unwrap();
                }
            }
        }
        stop.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().expect("reader panicked");
        }
        assert!(table.len() <= QUEUES as usize);
    }
}
