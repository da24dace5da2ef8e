use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::metric::{CountMetric, TimeMetric};
use crate::recorder::Snapshot;

/// Statistics of several members of the same run, keyed by the expected
/// member count of that run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub member_count: u16,
    /// Number of snapshots absorbed so far.
    pub contributors: u64,
    pub counts: BTreeMap<CountMetric, u64>,
    pub times: BTreeMap<TimeMetric, u64>,
}

impl Aggregate {
    pub fn new(member_count: u16) -> Self {
        Self {
            member_count,
            contributors: 0,
            counts: BTreeMap::new(),
            times: BTreeMap::new(),
        }
    }

    /// Merge one member's snapshot.
    ///
    /// Counters are summed. Start markers keep the earliest value and end
    /// markers the latest, so the aggregate spans the whole run.
    pub fn absorb(&mut self, snapshot: &Snapshot) {
        self.contributors += 1;
        for (metric, value) in &snapshot.counts {
            *self.counts.entry(*metric).or_insert(0) += value;
        }
        for (metric, value) in &snapshot.times {
            self.times
                .entry(*metric)
                .and_modify(|current| {
                    *current = if metric.is_start() {
                        (*current).min(*value)
                    } else {
                        (*current).max(*value)
                    }
                })
                .or_insert(*value);
        }
    }

    /// Whether every expected member has contributed.
    pub fn is_complete(&self) -> bool {
        self.contributors >= u64::from(self.member_count)
    }

    /// Header line plus one value line, columns in metric declaration order.
    /// Missing timestamps are written as empty cells.
    pub fn to_csv(&self) -> String {
        let header: Vec<&str> = CountMetric::ALL
            .iter()
            .map(|m| m.name())
            .chain(TimeMetric::ALL.iter().map(|m| m.name()))
            .collect();

        let mut values: Vec<String> = CountMetric::ALL
            .iter()
            .map(|m| self.counts.get(m).copied().unwrap_or(0).to_string())
            .collect();
        values.extend(
            TimeMetric::ALL
                .iter()
                .map(|m| self.times.get(m).map(u64::to_string).unwrap_or_default()),
        );

        let mut out = String::new();
        let _ = writeln!(out, "{}", header.join(","));
        let _ = writeln!(out, "{}", values.join(","));
        out
    }
}
