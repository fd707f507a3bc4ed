//! Ping/pong latency sinks.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Receives round-trip latency samples measured by the read worker.
pub trait LatencySink: Send + Sync {
    fn record(&self, latency: Duration);

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub min: Option<Duration>,
    pub max: Option<Duration>,
    pub mean: Option<Duration>,
    pub last: Option<Duration>,
}

#[derive(Debug, Default)]
struct Stats {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
    last: Option<Duration>,
}

/// Keeps running latency statistics.
#[derive(Debug, Default)]
pub struct LatencyTimer {
    stats: Mutex<Stats>,
}

impl LatencyTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LatencySink for LatencyTimer {
    fn record(&self, latency: Duration) {
        let mut stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        stats.count += 1;
        stats.total = stats.total.saturating_add(latency);
        stats.min = Some(stats.min.map_or(latency, |min| min.min(latency)));
        stats.max = Some(stats.max.map_or(latency, |max| max.max(latency)));
        stats.last = Some(latency);
    }

    fn snapshot(&self) -> LatencySnapshot {
        let stats = match self.stats.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mean = (stats.count > 0).then(|| {
            let nanos = stats.total.as_nanos() / u128::from(stats.count);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        });
        LatencySnapshot {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean,
            last: stats.last,
        }
    }
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLatency;

impl LatencySink for NoopLatency {
    fn record(&self, _latency: Duration) {}
}

pub(crate) fn default_sink(skip_metrics: bool) -> Arc<dyn LatencySink> {
    if skip_metrics {
        Arc::new(NoopLatency)
    } else {
        Arc::new(LatencyTimer::new())
    }
}
