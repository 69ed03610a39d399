//! Handle registry
//!
//! Maps each heap proxy to its native handle through a reclamation record.
//! Records hold only a weak reference to the proxy, so tracking never keeps
//! a proxy alive. One registry belongs to one engine instance.

use crate::handle::{Liveness, NativeHandle, Proxy, RecordId};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Bookkeeping entry linking a proxy's liveness to the handle it represents.
pub(crate) struct ReclamationRecord {
    referent: Weak<Liveness>,
    handle: Option<NativeHandle>,
    enqueued: bool,
}

impl ReclamationRecord {
    fn new(referent: Weak<Liveness>, handle: NativeHandle) -> Self {
        Self {
            referent,
            handle: Some(handle),
            enqueued: false,
        }
    }

    pub(crate) fn is_reachable(&self) -> bool {
        self.referent.strong_count() > 0
    }

    /// Take the handle out of the record. The record is dead afterwards.
    pub(crate) fn invalidate(&mut self) -> NativeHandle {
        match self.handle.take() {
            Some(handle) => handle,
            None => panic!("reclamation record released twice"),
        }
    }
}

/// Tracking set plus completion queue. Lock order is always
/// `records` shard before `completed`.
pub(crate) struct Tracking {
    records: DashMap<RecordId, ReclamationRecord>,
    completed: Mutex<VecDeque<RecordId>>,
}

impl Tracking {
    fn new() -> Self {
        Self {
            records: DashMap::new(),
            completed: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a record whose proxy is gone. At most once per record.
    pub(crate) fn enqueue(&self, id: RecordId) {
        if let Some(mut record) = self.records.get_mut(&id) {
            if !record.enqueued {
                record.enqueued = true;
                self.completed.lock().push_back(id);
            }
        }
    }

    /// Look for unreachable records the liveness drop has not queued yet.
    /// Returns `(probed, enqueued)`.
    pub(crate) fn probe(&self) -> (usize, usize) {
        let mut probed = 0;
        let mut enqueued = 0;
        for mut entry in self.records.iter_mut() {
            probed += 1;
            let id = *entry.key();
            let record = entry.value_mut();
            if !record.enqueued && !record.is_reachable() {
                record.enqueued = true;
                self.completed.lock().push_back(id);
                enqueued += 1;
            }
        }
        (probed, enqueued)
    }

    pub(crate) fn take_completed(&self) -> Vec<RecordId> {
        self.completed.lock().drain(..).collect()
    }

    pub(crate) fn remove(&self, id: RecordId) -> Option<ReclamationRecord> {
        self.records.remove(&id).map(|(_, record)| record)
    }
}

/// Produces proxies for fresh native handles and tracks the heap ones.
pub struct HandleRegistry {
    tracking: Arc<Tracking>,
    next_record: AtomicU64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            tracking: Arc::new(Tracking::new()),
            next_record: AtomicU64::new(1),
        }
    }

    /// Wrap `handle` in a proxy.
    ///
    /// Non-heap handles are value-like: the proxy carries no record and the
    /// handle is never released through this registry.
    pub fn register(&self, handle: NativeHandle, is_heap_value: bool) -> Proxy {
        if !is_heap_value {
            return Proxy::immediate(handle);
        }

        let id = RecordId::new(self.next_record.fetch_add(1, Ordering::Relaxed));
        let liveness = Arc::new(Liveness::new(id, Arc::downgrade(&self.tracking)));
        self.tracking
            .records
            .insert(id, ReclamationRecord::new(Arc::downgrade(&liveness), handle));

        tracing::trace!(record = %id, handle = %handle, "registered heap proxy");
        Proxy::tracked(handle, liveness)
    }

    /// Number of records not yet released.
    pub fn tracked_count(&self) -> usize {
        self.tracking.records.len()
    }

    /// Number of records waiting in the completion queue.
    pub fn queued_count(&self) -> usize {
        self.tracking.completed.lock().len()
    }

    pub fn is_tracked(&self, id: RecordId) -> bool {
        self.tracking.records.contains_key(&id)
    }

    pub(crate) fn tracking(&self) -> &Tracking {
        &self.tracking
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_heap_handles_are_not_tracked() {
        let registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle(1), false);
        assert!(!proxy.is_heap_value());
        assert_eq!(registry.tracked_count(), 0);
        drop(proxy);
        assert_eq!(registry.queued_count(), 0);
    }

    #[test]
    fn heap_handles_get_a_record() {
        let registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle(2), true);
        let record = proxy.record().unwrap();
        assert!(registry.is_tracked(record));
        assert_eq!(registry.tracked_count(), 1);
    }

    #[test]
    fn record_is_queued_only_after_last_clone_drops() {
        let registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle(3), true);
        let clone = proxy.clone();

        drop(proxy);
        assert_eq!(registry.queued_count(), 0);

        drop(clone);
        assert_eq!(registry.queued_count(), 1);
        assert_eq!(registry.tracked_count(), 1);
    }

    #[test]
    fn probe_does_not_queue_a_record_twice() {
        let registry = HandleRegistry::new();
        drop(registry.register(NativeHandle(4), true));
        assert_eq!(registry.queued_count(), 1);

        let (probed, enqueued) = registry.tracking().probe();
        assert_eq!(probed, 1);
        assert_eq!(enqueued, 0);
        assert_eq!(registry.queued_count(), 1);
    }

    #[test]
    fn weak_count_sweep_finds_records_the_drop_missed() {
        use crate::engine::NativeRelease;
        use crate::sweep::{ReclamationSweeper, SweepStats};
        use std::cell::RefCell;

        struct Released(RefCell<Vec<NativeHandle>>);

        impl NativeRelease for Released {
            fn release_native_handle(&self, handle: NativeHandle) {
                self.0.borrow_mut().push(handle);
            }
        }

        let registry = HandleRegistry::new();
        // A liveness token with no tracking link never queues its record.
        let id = RecordId::new(99);
        let liveness = Arc::new(Liveness::new(id, Weak::new()));
        registry
            .tracking
            .records
            .insert(id, ReclamationRecord::new(Arc::downgrade(&liveness), NativeHandle(7)));
        drop(liveness);
        assert_eq!(registry.queued_count(), 0);
        assert_eq!(registry.tracked_count(), 1);

        let release = Released(RefCell::new(Vec::new()));
        let sweeper = ReclamationSweeper::default();
        let stats = sweeper.sweep(&registry, &release);
        assert_eq!(stats.probed, 1);
        assert_eq!(stats.enqueued, 1);
        assert_eq!(stats.released, 1);
        assert_eq!(*release.0.borrow(), vec![NativeHandle(7)]);
        assert_eq!(registry.tracked_count(), 0);

        assert_eq!(sweeper.sweep(&registry, &release), SweepStats::default());
        assert_eq!(release.0.borrow().len(), 1);
    }

    #[test]
    fn proxies_outliving_their_registry_drop_quietly() {
        let registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle(5), true);
        drop(registry);
        drop(proxy);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn invalidating_a_dead_record_panics() {
        let registry = HandleRegistry::new();
        let proxy = registry.register(NativeHandle(6), true);
        let id = proxy.record().unwrap();
        drop(proxy);
        let mut record = registry.tracking().remove(id).unwrap();
        record.invalidate();
        record.invalidate();
    }
}
