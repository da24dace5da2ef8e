use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::metric::{count_index, time_index, CountMetric, TimeMetric};

/// Where a member reports what it did.
///
/// Implementations must be cheap and non-blocking: the protocol calls them
/// from inside its event handlers.
pub trait StatisticsSink: Send + Sync {
    /// Increment `metric` by one.
    fn record_count(&self, metric: CountMetric);

    /// Increment `metric` by `n`.
    fn record_count_by(&self, metric: CountMetric, n: u64) {
        for _ in 0..n {
            self.record_count(metric);
        }
    }

    /// Record the current time for `metric`. Only the first call counts.
    fn record_timestamp(&self, metric: TimeMetric);
}

/// Sink that drops everything, for tests and embedded use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl StatisticsSink for NoopSink {
    fn record_count(&self, _metric: CountMetric) {}

    fn record_timestamp(&self, _metric: TimeMetric) {}
}

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// Relaxed ordering: values are statistics, not synchronization points.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

/// In-process recorder for one member.
///
/// Owned by the bootstrap and shared with the protocol through an
/// `Arc<dyn StatisticsSink>`.
pub struct StatisticsRecorder {
    counts: [Counter; CountMetric::ALL.len()],
    times: [OnceLock<u64>; TimeMetric::ALL.len()],
}

impl StatisticsRecorder {
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| Counter::new()),
            times: std::array::from_fn(|_| OnceLock::new()),
        }
    }

    pub fn count(&self, metric: CountMetric) -> u64 {
        self.counts[count_index(metric)].get()
    }

    pub fn timestamp(&self, metric: TimeMetric) -> Option<u64> {
        self.times[time_index(metric)].get().copied()
    }

    /// Record `metric` at an explicit time. Ignored if already set.
    pub fn record_timestamp_at(&self, metric: TimeMetric, unix_ns: u64) {
        let _ = self.times[time_index(metric)].set(unix_ns);
    }

    /// Freeze the current values.
    pub fn snapshot(&self) -> Snapshot {
        let counts = CountMetric::ALL
            .iter()
            .map(|m| (*m, self.count(*m)))
            .collect();
        let times = TimeMetric::ALL
            .iter()
            .filter_map(|m| self.timestamp(*m).map(|t| (*m, t)))
            .collect();
        Snapshot { counts, times }
    }
}

impl Default for StatisticsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StatisticsRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsRecorder")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl StatisticsSink for StatisticsRecorder {
    fn record_count(&self, metric: CountMetric) {
        self.counts[count_index(metric)].inc();
    }

    fn record_count_by(&self, metric: CountMetric, n: u64) {
        self.counts[count_index(metric)].inc_by(n);
    }

    fn record_timestamp(&self, metric: TimeMetric) {
        self.record_timestamp_at(metric, crate::now_ns());
    }
}

/// Frozen statistics of one member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub counts: BTreeMap<CountMetric, u64>,
    pub times: BTreeMap<TimeMetric, u64>,
}

impl Snapshot {
    pub fn count(&self, metric: CountMetric) -> u64 {
        self.counts.get(&metric).copied().unwrap_or(0)
    }

    pub fn timestamp(&self, metric: TimeMetric) -> Option<u64> {
        self.times.get(&metric).copied()
    }
}
