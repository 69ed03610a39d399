//! Native handles and the managed proxies that represent them
//!
//! A [`Proxy`] is what binding code hands to the application. Heap proxies
//! share one liveness token between all their clones; when the last clone is
//! dropped the token queues its reclamation record so the next sweep can
//! release the handle.

use crate::registry::Tracking;
use std::fmt;
use std::sync::{Arc, Weak};

/// Opaque identifier for unmanaged engine-side state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NativeHandle(pub u64);

impl NativeHandle {
    #[inline]
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Key of a reclamation record inside one registry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(u64);

impl RecordId {
    pub(crate) fn new(index: u64) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared by every clone of one heap proxy. Its drop is the reachability
/// signal for the record it belongs to.
pub(crate) struct Liveness {
    record: RecordId,
    tracking: Weak<Tracking>,
}

impl Liveness {
    pub(crate) fn new(record: RecordId, tracking: Weak<Tracking>) -> Self {
        Self { record, tracking }
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        // Registry already torn down: nothing left to release into.
        if let Some(tracking) = self.tracking.upgrade() {
            tracking.enqueue(self.record);
        }
    }
}

/// Script-visible stand-in for a native handle.
///
/// Cloning a proxy does not duplicate the handle; all clones refer to the
/// same record and the handle becomes reclaimable only once every clone is
/// gone.
#[derive(Clone)]
pub struct Proxy {
    handle: NativeHandle,
    liveness: Option<Arc<Liveness>>,
}

impl Proxy {
    pub(crate) fn tracked(handle: NativeHandle, liveness: Arc<Liveness>) -> Self {
        Self {
            handle,
            liveness: Some(liveness),
        }
    }

    /// Proxy for a value-like (non-heap) handle. Never tracked, never released.
    pub fn immediate(handle: NativeHandle) -> Self {
        Self {
            handle,
            liveness: None,
        }
    }

    pub fn handle(&self) -> NativeHandle {
        self.handle
    }

    pub fn is_heap_value(&self) -> bool {
        self.liveness.is_some()
    }

    /// Record tracking this proxy, if it is a heap value.
    pub fn record(&self) -> Option<RecordId> {
        self.liveness.as_ref().map(|liveness| liveness.record)
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("handle", &self.handle)
            .field("record", &self.record())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_proxy_carries_no_record() {
        let proxy = Proxy::immediate(NativeHandle(7));
        assert!(!proxy.is_heap_value());
        assert_eq!(proxy.record(), None);
        assert_eq!(proxy.handle().raw(), 7);
    }

    #[test]
    fn handle_displays_as_hex() {
        assert_eq!(NativeHandle(255).to_string(), "0xff");
    }
}
