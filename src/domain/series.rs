// Time-series domain models
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Synthesized label holding the canonical series name.
pub const NAME_LABEL: &str = "__name__";
/// Synthesized label holding the query text that produced the series.
pub const QUERY_LABEL: &str = "query";

pub const DEFAULT_RANGE_MINUTES: i64 = 30;
pub const DEFAULT_STEP_SECS: i64 = 15;
/// 90 days.
pub const MAX_RANGE_MINUTES: i64 = 90 * 24 * 60;
/// 1 day.
pub const MAX_STEP_SECS: i64 = 24 * 60 * 60;

/// The (id, query) pair handed to the fetch coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryRef {
    pub id: String,
    pub query: String,
}

impl QueryRef {
    pub fn new(id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }
}

/// Relative range as requested by a viewer ("last N minutes").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeSpec {
    pub minutes: i64,
    pub step_secs: i64,
}

impl RangeSpec {
    /// Out-of-range values are clamped so the window always resolves.
    pub fn new(minutes: i64, step_secs: i64) -> Self {
        Self {
            minutes: minutes.clamp(1, MAX_RANGE_MINUTES),
            step_secs: step_secs.clamp(1, MAX_STEP_SECS),
        }
    }

    /// Resolve against `end`, normally the dispatch instant.
    pub fn resolve(&self, end: DateTime<Utc>) -> TimeWindow {
        TimeWindow {
            start: end - Duration::minutes(self.minutes.clamp(1, MAX_RANGE_MINUTES)),
            end,
            step: Duration::seconds(self.step_secs.clamp(1, MAX_STEP_SECS)),
        }
    }
}

impl Default for RangeSpec {
    fn default() -> Self {
        Self::new(DEFAULT_RANGE_MINUTES, DEFAULT_STEP_SECS)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub step: Duration,
}

impl TimeWindow {
    /// Step in the backend's duration syntax, e.g. `15s`.
    pub fn step_param(&self) -> String {
        format!("{}s", self.step.num_seconds())
    }
}

/// One labelled series produced by a fetch cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedSeries {
    pub labels: BTreeMap<String, String>,
    pub timestamps: Vec<i64>,
    pub values: Vec<Option<f64>>,
    pub query_id: String,
}

impl FetchedSeries {
    pub fn name(&self) -> Option<&str> {
        self.labels.get(NAME_LABEL).map(String::as_str)
    }
}
