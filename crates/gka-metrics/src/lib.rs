//! Statistics for group key agreement runs.
//!
//! A member records how many messages of each type it sent, how many
//! Diffie-Hellman operations it performed and when agreement started and
//! ended. The recorder is constructed by the process bootstrap and injected
//! into the protocol as a [`StatisticsSink`]; at shutdown it is turned into a
//! [`Snapshot`] which can be merged into an [`Aggregate`] keyed by the
//! expected member count.

mod aggregate;
mod metric;
mod recorder;

pub use aggregate::Aggregate;
pub use metric::{CountMetric, TimeMetric};
pub use recorder::{Counter, NoopSink, Snapshot, StatisticsRecorder, StatisticsSink};

/// Current wall-clock time as Unix nanoseconds.
pub fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
