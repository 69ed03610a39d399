//! Profiler for timing named scopes

use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct Timing {
    total: Duration,
    calls: u64,
}

#[derive(Debug, Default)]
pub struct SystemProfiler {
    timings: HashMap<&'static str, Timing>,
}

impl SystemProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_system<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        let timing = self.timings.entry(name).or_default();
        timing.total += start.elapsed();
        timing.calls += 1;
        result
    }

    pub fn get_timing(&self, name: &str) -> Duration {
        self.timings
            .get(name)
            .map(|timing| timing.total)
            .unwrap_or(Duration::ZERO)
    }

    pub fn calls(&self, name: &str) -> u64 {
        self.timings.get(name).map(|timing| timing.calls).unwrap_or(0)
    }
}
