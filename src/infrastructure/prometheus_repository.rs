// Prometheus range-query repository implementation
use crate::application::metrics_repository::{MetricsRepository, RawSample, RawSeries};
use crate::domain::series::TimeWindow;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PrometheusRepository {
    endpoint: String,
    range_path: String,
    instance_details_path: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeResponse {
    query_result: QueryResult,
}

#[derive(Debug, Default, Deserialize)]
struct QueryResult {
    #[serde(default)]
    result: Vec<ResultSeries>,
}

#[derive(Debug, Deserialize)]
struct ResultSeries {
    #[serde(default)]
    metric: MetricLabels,
    #[serde(default)]
    values: Vec<ResultSample>,
}

#[derive(Debug, Default, Deserialize)]
struct MetricLabels {
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ResultSample {
    time: Value,
    #[serde(default)]
    value: Value,
}

impl PrometheusRepository {
    pub fn new(
        endpoint: &str,
        range_path: &str,
        instance_details_path: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            range_path: range_path.to_string(),
            instance_details_path: instance_details_path.to_string(),
            client,
        })
    }

    fn build_range_url(&self, query: &str, window: &TimeWindow) -> String {
        format!(
            "{}{}?query={}&start={}&end={}&step={}",
            self.endpoint,
            self.range_path,
            urlencoding::encode(query),
            urlencoding::encode(&window.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            urlencoding::encode(&window.end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            window.step_param(),
        )
    }

    fn build_details_url(&self, instance_id: &str) -> String {
        format!(
            "{}{}?instanceId={}",
            self.endpoint,
            self.instance_details_path,
            urlencoding::encode(instance_id)
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .context("Failed to send request to metrics backend")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metrics backend request failed with status {}: {}", status, body);
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse metrics backend response")
    }
}

#[async_trait]
impl MetricsRepository for PrometheusRepository {
    async fn query_range(&self, query: &str, window: &TimeWindow) -> Result<Vec<RawSeries>> {
        let url = self.build_range_url(query, window);
        tracing::debug!("Executing range query: {}", query);

        let response: RangeResponse = self.get_json(&url).await?;
        Ok(response
            .query_result
            .result
            .into_iter()
            .map(|series| RawSeries {
                labels: series.metric.labels,
                samples: series.values.iter().filter_map(parse_sample).collect(),
            })
            .collect())
    }

    async fn instance_details(&self, instance_id: &str) -> Result<Value> {
        let url = self.build_details_url(instance_id);
        self.get_json(&url).await
    }
}

/// Samples without a readable timestamp are dropped; unreadable values are kept as gaps.
fn parse_sample(sample: &ResultSample) -> Option<RawSample> {
    Some(RawSample {
        time: parse_time(&sample.time)?,
        value: parse_value(&sample.value),
    })
}

fn parse_time(time: &Value) -> Option<i64> {
    match time {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.timestamp())
            .ok()
            .or_else(|| s.parse::<f64>().ok().map(|secs| secs as i64)),
        Value::Number(n) => n.as_f64().map(|secs| secs as i64),
        _ => None,
    }
}

fn parse_value(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::RangeSpec;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn repository() -> PrometheusRepository {
        PrometheusRepository::new(
            "http://localhost:9090/",
            "/api/metrics/range",
            "/control-node/instance/details",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_build_range_url() {
        let end = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let window = RangeSpec::default().resolve(end);
        let url = repository().build_range_url(r#"up{job="api"}"#, &window);

        assert_eq!(
            url,
            "http://localhost:9090/api/metrics/range?query=up%7Bjob%3D%22api%22%7D\
             &start=2024-05-01T11%3A30%3A00Z&end=2024-05-01T12%3A00%3A00Z&step=15s"
        );
    }

    #[test]
    fn test_build_details_url() {
        assert_eq!(
            repository().build_details_url("i-1 2"),
            "http://localhost:9090/control-node/instance/details?instanceId=i-1%202"
        );
    }

    #[test]
    fn test_parse_range_payload() {
        let payload = json!({
            "queryResult": {
                "result": [{
                    "metric": { "labels": { "job": "api" } },
                    "values": [
                        { "time": "2024-05-01T12:00:00Z", "value": "1.5" },
                        { "time": 1714564815, "value": 2 },
                        { "time": "2024-05-01T12:00:30Z", "value": "NaN" },
                        { "time": "2024-05-01T12:00:45Z", "value": null },
                        { "time": "garbage", "value": "3" }
                    ]
                }]
            }
        });

        let response: RangeResponse = serde_json::from_value(payload).unwrap();
        let series = &response.query_result.result[0];
        let samples: Vec<_> = series.values.iter().filter_map(parse_sample).collect();

        assert_eq!(series.metric.labels["job"], "api");
        assert_eq!(
            samples,
            vec![
                RawSample { time: 1714564800, value: Some(1.5) },
                RawSample { time: 1714564815, value: Some(2.0) },
                RawSample { time: 1714564830, value: None },
                RawSample { time: 1714564845, value: None },
            ]
        );
    }

    #[test]
    fn test_series_without_labels() {
        let payload = json!({ "queryResult": { "result": [{ "values": [] }] } });
        let response: RangeResponse = serde_json::from_value(payload).unwrap();
        assert!(response.query_result.result[0].metric.labels.is_empty());
    }
}
