//! Optional timing collaborator.
//!
//! Components receive a `&dyn Profiler` explicitly; nothing here is global.
//! [`NoopProfiler`] is the default, [`StageTimer`] accumulates wall-clock time
//! per pipeline stage and is safe to share across rayon workers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Profiler: Sync {
    fn record(&self, stage: &'static str, elapsed: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProfiler;

impl Profiler for NoopProfiler {
    fn record(&self, _stage: &'static str, _elapsed: Duration) {}
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageStats {
    pub calls: usize,
    pub total_seconds: f64,
}

#[derive(Debug, Default)]
pub struct StageTimer {
    stages: Mutex<BTreeMap<&'static str, StageStats>>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the accumulated statistics, keyed by stage name.
    pub fn summary(&self) -> BTreeMap<&'static str, StageStats> {
        match self.stages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Profiler for StageTimer {
    fn record(&self, stage: &'static str, elapsed: Duration) {
        let mut guard = match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = guard.entry(stage).or_default();
        entry.calls += 1;
        entry.total_seconds += elapsed.as_secs_f64();
    }
}

/// Runs `f` and reports its duration under `stage`.
pub fn timed<R>(profiler: &dyn Profiler, stage: &'static str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    profiler.record(stage, start.elapsed());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_counts_calls_per_stage() {
        let timer = StageTimer::new();
        let value = timed(&timer, "fit", || 3);
        timed(&timer, "fit", || ());
        timed(&timer, "walk", || ());
        assert_eq!(value, 3);

        let summary = timer.summary();
        assert_eq!(summary["fit"].calls, 2);
        assert_eq!(summary["walk"].calls, 1);
        assert!(summary["fit"].total_seconds >= 0.0);
    }

    #[test]
    fn noop_profiler_passes_through() {
        assert_eq!(timed(&NoopProfiler, "anything", || "ok"), "ok");
    }
}
