//! Reclamation sweeper
//!
//! Releases the native handles of proxies that have become unreachable.
//! Sweeping is never implicit; the embedder runs it at a convenient point on
//! the script thread. Skipping it leaks handles but never corrupts state.

use crate::engine::NativeRelease;
use crate::registry::HandleRegistry;
use serde::{Deserialize, Serialize};

/// How the sweeper learns that a proxy is gone.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityProbe {
    /// Inspect every record's weak reference before draining the queue.
    #[default]
    WeakCount,
    /// Trust only what the liveness drop queued. Can lag, never double-frees.
    QueueOnly,
}

/// Result of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Records inspected by the probe.
    pub probed: usize,
    /// Records the probe queued itself.
    pub enqueued: usize,
    /// Handles released.
    pub released: usize,
}

pub struct ReclamationSweeper {
    probe: ReachabilityProbe,
}

impl ReclamationSweeper {
    pub fn new(probe: ReachabilityProbe) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> ReachabilityProbe {
        self.probe
    }

    /// Release every handle whose proxy is confirmed gone.
    pub fn sweep<R>(&self, registry: &HandleRegistry, release: &R) -> SweepStats
    where
        R: NativeRelease + ?Sized,
    {
        let tracking = registry.tracking();
        let mut stats = SweepStats::default();

        if self.probe == ReachabilityProbe::WeakCount {
            let (probed, enqueued) = tracking.probe();
            stats.probed = probed;
            stats.enqueued = enqueued;
        }

        for id in tracking.take_completed() {
            let Some(mut record) = tracking.remove(id) else {
                continue;
            };
            let handle = record.invalidate();
            release.release_native_handle(handle);
            stats.released += 1;
            tracing::debug!(record = %id, handle = %handle, "released native handle");
        }

        if stats.released > 0 {
            tracing::debug!(
                released = stats.released,
                remaining = registry.tracked_count(),
                "reclamation sweep finished"
            );
        }
        stats
    }
}

impl Default for ReclamationSweeper {
    fn default() -> Self {
        Self::new(ReachabilityProbe::default())
    }
}
