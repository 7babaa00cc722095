// Series namer - canonical, label-qualified names for fetched series
use crate::domain::series::NAME_LABEL;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static WRAPPED_METRIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rate|increase|irate|sum|avg|count)\(([A-Za-z0-9_:]+)").expect("valid regex")
});
static LEADING_METRIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_:]+)").expect("valid regex"));

const PART_SEPARATOR: &str = "__";

/// Best-effort metric identifier for `query`:
/// `rate(my_metric{a="b"}[5m])` -> `my_metric`, `my_metric{a="b"}` -> `my_metric`,
/// anything else -> the query itself.
pub fn base_metric_name(query: &str) -> &str {
    WRAPPED_METRIC
        .captures(query)
        .or_else(|| LEADING_METRIC.captures(query))
        .and_then(|c| c.get(1))
        .map_or(query, |m| m.as_str())
}

/// Name unique per label combination: the base metric followed by every
/// `key_value` pair except the synthesized name label. Labels are taken in
/// map order, so the result is stable for a given input.
pub fn extract_series_name(query: &str, labels: &BTreeMap<String, String>) -> String {
    let mut parts = vec![base_metric_name(query).to_string()];
    parts.extend(
        labels
            .iter()
            .filter(|(key, _)| key.as_str() != NAME_LABEL)
            .map(|(key, value)| format!("{}_{}", key, value)),
    );
    parts.join(PART_SEPARATOR)
}
