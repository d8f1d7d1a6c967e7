//! Final status report for one execution run.
//!
//! The report is pure data: operation summaries bucketed by terminal
//! status, per-operation timing, and an optional lane timeline for
//! diagnostic display. Rendering (columns, colors) belongs to whatever
//! front end consumes this.

use crate::operation::model::{OperationGraph, OperationStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// One operation's terminal state, as recorded in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSummary {
    pub key: String,
    pub project: String,
    pub phase: String,
    pub status: OperationStatus,
    pub is_synthetic: bool,
    pub is_cache_write_allowed: bool,
    pub critical_path_length: Option<u32>,
    /// Error text for failures, captured from the runner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Offset from run start when the runner was invoked.
    #[serde(with = "opt_duration_serde")]
    pub started: Option<Duration>,
    /// Offset from run start when the terminal status was recorded.
    #[serde(with = "opt_duration_serde")]
    pub finished: Option<Duration>,
    /// Worker lane the operation ran on. `None` for blocked operations,
    /// which never ran.
    pub lane: Option<usize>,
}

impl OperationSummary {
    /// Wall-clock duration of the runner invocation, once finished.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started, self.finished) {
            (Some(s), Some(f)) => Some(f.saturating_sub(s)),
            _ => None,
        }
    }
}

/// Status breakdown for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Worker lanes the run was driven with.
    pub lanes: usize,
    /// Operation summaries bucketed by terminal status. Within a bucket,
    /// summaries are ordered by key.
    pub buckets: BTreeMap<OperationStatus, Vec<OperationSummary>>,
}

impl ExecutionReport {
    /// Report for a run with nothing to do.
    pub fn empty(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration: Duration::ZERO,
            lanes: 0,
            buckets: BTreeMap::new(),
        }
    }

    /// Snapshot a finished operation graph into buckets.
    pub fn from_graph(
        graph: &OperationGraph,
        started_at: DateTime<Utc>,
        duration: Duration,
        lanes: usize,
    ) -> Self {
        let mut buckets: BTreeMap<OperationStatus, Vec<OperationSummary>> = BTreeMap::new();
        for op in graph.iter() {
            buckets.entry(op.status).or_default().push(OperationSummary {
                key: op.key.clone(),
                project: op.project_name.clone(),
                phase: op.phase.clone(),
                status: op.status,
                is_synthetic: op.is_synthetic,
                is_cache_write_allowed: op.is_cache_write_allowed,
                critical_path_length: op.critical_path_length,
                error: op.error.clone(),
                started: op.timing.started,
                finished: op.timing.finished,
                lane: op.timing.lane,
            });
        }
        for bucket in buckets.values_mut() {
            bucket.sort_by(|a, b| a.key.cmp(&b.key));
        }
        Self {
            started_at,
            duration,
            lanes,
            buckets,
        }
    }

    /// Total number of operations across all buckets.
    pub fn total(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    /// Number of operations that ended in the given status.
    pub fn count(&self, status: OperationStatus) -> usize {
        self.buckets.get(&status).map_or(0, Vec::len)
    }

    /// Summaries for one status bucket, empty if none.
    pub fn bucket(&self, status: OperationStatus) -> &[OperationSummary] {
        self.buckets.get(&status).map_or(&[], Vec::as_slice)
    }

    /// Keys of every operation in one status bucket.
    pub fn keys_with(&self, status: OperationStatus) -> Vec<&str> {
        self.bucket(status).iter().map(|s| s.key.as_str()).collect()
    }

    /// Lane-occupancy timeline of every operation that actually ran,
    /// ordered by start offset.
    pub fn timeline(&self) -> Timeline {
        let mut entries: Vec<TimelineEntry> = self
            .buckets
            .values()
            .flatten()
            .filter_map(|s| {
                let started = s.started?;
                Some(TimelineEntry {
                    key: s.key.clone(),
                    lane: s.lane.unwrap_or(0),
                    status: s.status,
                    started,
                    finished: s.finished,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.started.cmp(&b.started).then_with(|| a.key.cmp(&b.key)));
        Timeline {
            lanes: self.lanes,
            entries,
        }
    }
}

/// Start/end offsets per operation plus lane occupancy, for diagnostic
/// chart rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timeline {
    pub lanes: usize,
    pub entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub key: String,
    pub lane: usize,
    pub status: OperationStatus,
    #[serde(with = "duration_serde")]
    pub started: Duration,
    #[serde(with = "opt_duration_serde")]
    pub finished: Option<Duration>,
}

/// Serde helpers mapping `Duration` to integer milliseconds.
pub(crate) mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub(crate) mod opt_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
