//! Ferry Metrics - counters and timings for the bridge
//!
//! Provides zero-cost abstractions for metrics collection that completely
//! vanish in production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use ferry_metrics::{Counter, SystemProfiler};
//!
//! let mut counter = Counter::new();
//! counter.increment("tasks.submitted", 1);
//!
//! let mut profiler = SystemProfiler::new();
//! profiler.time_system("pump", || { /* drain */ });
//! ```
//!
//! Without the `metrics` feature every call compiles to nothing and reads
//! return zero.

#[cfg(feature = "metrics")]
mod counter;
#[cfg(feature = "metrics")]
mod system_profiler;

#[cfg(feature = "metrics")]
pub use counter::Counter;
#[cfg(feature = "metrics")]
pub use system_profiler::SystemProfiler;

/// True when the crate was built with the `metrics` feature.
pub const ENABLED: bool = cfg!(feature = "metrics");

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &'static str, _value: u64) {}
    pub fn get(&self, _name: &str) -> u64 { 0 }
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> { Vec::new() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Debug, Default)]
pub struct SystemProfiler;

#[cfg(not(feature = "metrics"))]
impl SystemProfiler {
    pub fn new() -> Self { Self }
    pub fn time_system<F, R>(&mut self, _name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        f()
    }
    pub fn get_timing(&self, _name: &str) -> std::time::Duration { std::time::Duration::ZERO }
    pub fn calls(&self, _name: &str) -> u64 { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_is_available_with_or_without_metrics() {
        let mut counter = Counter::new();
        counter.increment("events", 2);
        let mut profiler = SystemProfiler::new();
        let value = profiler.time_system("work", || 21 * 2);
        assert_eq!(value, 42);

        if ENABLED {
            assert_eq!(counter.get("events"), 2);
            assert_eq!(profiler.calls("work"), 1);
        } else {
            assert_eq!(counter.get("events"), 0);
            assert_eq!(profiler.calls("work"), 0);
        }
    }
}
