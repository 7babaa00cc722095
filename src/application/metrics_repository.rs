// Repository trait for metrics backend access
use crate::domain::series::TimeWindow;
use async_trait::async_trait;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Unix seconds.
    pub time: i64,
    pub value: Option<f64>,
}

/// One series as returned by the backend, before naming and tagging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSeries {
    pub labels: BTreeMap<String, String>,
    pub samples: Vec<RawSample>,
}

#[async_trait]
pub trait MetricsRepository: Send + Sync {
    /// Evaluate `query` over `window`; zero or more series
    async fn query_range(&self, query: &str, window: &TimeWindow) -> anyhow::Result<Vec<RawSeries>>;

    /// Host details for a monitored instance (OS, type, addresses, ...)
    async fn instance_details(&self, instance_id: &str) -> anyhow::Result<serde_json::Value>;
}
