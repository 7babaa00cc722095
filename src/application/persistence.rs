// Persistence gateway - throttled snapshots, restore, and JSON import/export
use crate::domain::panel::{DashboardSnapshot, Panel, PanelFile, Query, SeriesAlias, DEFAULT_RESOLUTION};
use crate::error::{PersistenceResult, ValidationError};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Raw storage for the serialized dashboard snapshot.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// `None` when nothing has been stored yet
    async fn read(&self) -> PersistenceResult<Option<String>>;

    async fn write(&self, contents: String) -> PersistenceResult<()>;
}

#[derive(Clone)]
pub struct PersistenceGateway {
    storage: Arc<dyn SnapshotStorage>,
}

impl PersistenceGateway {
    pub fn new(storage: Arc<dyn SnapshotStorage>) -> Self {
        Self { storage }
    }

    /// Write `snapshot`. Failures are logged, never returned.
    pub async fn save(&self, snapshot: &DashboardSnapshot) {
        if let Err(e) = self.try_save(snapshot).await {
            tracing::warn!("Failed to save dashboard snapshot: {}", e);
        }
    }

    async fn try_save(&self, snapshot: &DashboardSnapshot) -> PersistenceResult<()> {
        let contents = serde_json::to_string(snapshot)?;
        self.storage.write(contents).await
    }

    /// The stored snapshot, or `None` when absent or unreadable.
    pub async fn load(&self) -> Option<DashboardSnapshot> {
        let contents = match self.storage.read().await {
            Ok(Some(contents)) => contents,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("Failed to read dashboard snapshot: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<DashboardSnapshot>(&contents) {
            Ok(mut snapshot) => {
                snapshot.normalize();
                Some(snapshot)
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable dashboard snapshot: {}", e);
                None
            }
        }
    }

    /// Persist every snapshot published on `updates`, at most once per
    /// `interval`. The first change is written immediately; changes arriving
    /// while throttled collapse into one write of the latest value. The task
    /// ends after the final pending snapshot once the sender is dropped.
    pub fn spawn_autosave(
        &self,
        mut updates: watch::Receiver<DashboardSnapshot>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let gateway = self.clone();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let snapshot = updates.borrow_and_update().clone();
                gateway.save(&snapshot).await;
                tokio::time::sleep(interval).await;
            }
            tracing::info!("Dashboard autosave stopped");
        })
    }
}

/// Pretty JSON panel file; the panel's own id is not exported.
pub fn export_panel(panel: &Panel) -> PersistenceResult<String> {
    Ok(serde_json::to_string_pretty(&PanelFile::from(panel))?)
}

/// Download name derived from a panel title: whitespace runs become `_`,
/// an empty title falls back to `fallback_stem`.
pub fn file_name(title: &str, fallback_stem: &str, suffix: &str) -> String {
    let stem = WHITESPACE_RUN.replace_all(title, "_");
    if stem.is_empty() {
        format!("{}{}", fallback_stem, suffix)
    } else {
        format!("{}{}", stem, suffix)
    }
}

pub fn export_file_name(title: &str) -> String {
    file_name(title, "panel", "-config.json")
}

pub fn csv_file_name(title: &str) -> String {
    file_name(title, "chart-data", ".csv")
}

/// Validate a panel file. Every query gets a fresh id; optional fields are defaulted.
pub fn import_panel(json: &str) -> Result<PanelFile, ValidationError> {
    let value: Value = serde_json::from_str(json).map_err(|e| ValidationError::Json(e.to_string()))?;

    let title = value
        .get("title")
        .and_then(Value::as_str)
        .ok_or(ValidationError::Missing {
            field: "title",
            expected: "string",
        })?;
    let queries = value
        .get("queries")
        .and_then(Value::as_array)
        .ok_or(ValidationError::Missing {
            field: "queries",
            expected: "array",
        })?;

    let queries = queries
        .iter()
        .enumerate()
        .map(|(index, query)| import_query(index, query))
        .collect::<Result<Vec<_>, _>>()?;

    let description = optional_str(&value, "description", "description")?;

    Ok(PanelFile {
        title: title.to_string(),
        queries,
        description: description.map(str::to_string),
    })
}

fn import_query(index: usize, value: &Value) -> Result<Query, ValidationError> {
    let field = |name: &str| format!("queries[{}].{}", index, name);
    let object = value.as_object().ok_or_else(|| ValidationError::Field {
        field: format!("queries[{}]", index),
        reason: "expected an object".to_string(),
    })?;

    let text = optional_str(value, "query", &field("query"))?.unwrap_or_default();
    let units = optional_str(value, "units", &field("units"))?.unwrap_or_default();
    let resolution = match object.get("resolution") {
        None | Some(Value::Null) => DEFAULT_RESOLUTION,
        Some(v) => v
            .as_f64()
            .map(|r| r.clamp(0.0, f64::from(u8::MAX)) as u8)
            .ok_or_else(|| ValidationError::Field {
                field: field("resolution"),
                reason: "expected a number".to_string(),
            })?,
    };

    let mut query = Query::new(text, units, resolution);
    query.series = import_series(object, &field("series"))?;
    Ok(query)
}

fn import_series(query: &Map<String, Value>, field: &str) -> Result<Vec<SeriesAlias>, ValidationError> {
    let entries = match query.get("series") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(ValidationError::Field {
                field: field.to_string(),
                reason: "expected an array".to_string(),
            });
        }
    };

    let mut seen = HashSet::new();
    let mut aliases = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        let entry_field = format!("{}[{}]", field, index);
        let name = optional_str(entry, "series_name", &entry_field)?.unwrap_or_default();
        let rename = optional_str(entry, "series_rename", &entry_field)?.unwrap_or(name);
        if seen.insert(name.to_string()) {
            aliases.push(SeriesAlias::renamed(name, rename));
        }
    }
    Ok(aliases)
}

fn optional_str<'a>(value: &'a Value, key: &str, field: &str) -> Result<Option<&'a str>, ValidationError> {
    match value.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(ValidationError::Field {
            field: field.to_string(),
            reason: format!("expected '{}' to be a string", key),
        }),
    }
}

/// Pretty JSON of the whole dashboard.
pub fn export_dashboard(snapshot: &DashboardSnapshot) -> PersistenceResult<String> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn import_dashboard(json: &str) -> Result<DashboardSnapshot, ValidationError> {
    let value: Value = serde_json::from_str(json).map_err(|e| ValidationError::Json(e.to_string()))?;
    if !value.get("panels").is_some_and(Value::is_array) {
        return Err(ValidationError::Missing {
            field: "panels",
            expected: "array",
        });
    }
    let mut snapshot: DashboardSnapshot =
        serde_json::from_value(value).map_err(|e| ValidationError::Json(e.to_string()))?;
    snapshot.normalize();
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::panel::default_panels;
    use crate::infrastructure::snapshot_storage::InMemorySnapshotStorage;

    fn titled(title: &str) -> DashboardSnapshot {
        DashboardSnapshot::new(vec![Panel::new(title, Vec::new())])
    }

    fn written_titles(storage: &InMemorySnapshotStorage) -> Vec<String> {
        storage
            .writes()
            .iter()
            .map(|w| serde_json::from_str::<DashboardSnapshot>(w).unwrap().panels[0].title.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let gateway = PersistenceGateway::new(storage.clone());
        let snapshot = DashboardSnapshot::new(default_panels());

        gateway.save(&snapshot).await;
        assert_eq!(gateway.load().await, Some(snapshot));
    }

    #[tokio::test]
    async fn test_load_absent_or_corrupt_is_none() {
        let gateway = PersistenceGateway::new(Arc::new(InMemorySnapshotStorage::new()));
        assert!(gateway.load().await.is_none());

        let gateway = PersistenceGateway::new(Arc::new(InMemorySnapshotStorage::with_contents("{not json")));
        assert!(gateway.load().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_is_throttled_with_trailing_write() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let gateway = PersistenceGateway::new(storage.clone());
        let (tx, rx) = watch::channel(DashboardSnapshot::default());
        let handle = gateway.spawn_autosave(rx, Duration::from_secs(1));

        tx.send(titled("s1")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(written_titles(&storage), vec!["s1"]);

        tx.send(titled("s2")).unwrap();
        tx.send(titled("s3")).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(written_titles(&storage), vec!["s1"]);

        drop(tx);
        handle.await.unwrap();
        assert_eq!(written_titles(&storage), vec!["s1", "s3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_autosave_without_changes_writes_nothing() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let gateway = PersistenceGateway::new(storage.clone());
        let (tx, rx) = watch::channel(DashboardSnapshot::default());
        let handle = gateway.spawn_autosave(rx, Duration::from_secs(1));

        drop(tx);
        handle.await.unwrap();
        assert!(storage.writes().is_empty());
    }

    #[test]
    fn test_export_file_name() {
        assert_eq!(export_file_name("CPU  Usage\tPanel"), "CPU_Usage_Panel-config.json");
        assert_eq!(export_file_name(""), "panel-config.json");
        assert_eq!(csv_file_name("Node Load"), "Node_Load.csv");
        assert_eq!(csv_file_name(""), "chart-data.csv");
    }

    #[test]
    fn test_export_omits_panel_id() {
        let panel = Panel::new("Load", vec![Query::new("node_load1", "", 2)]);
        let json: Value = serde_json::from_str(&export_panel(&panel).unwrap()).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["title"], "Load");
        assert_eq!(json["queries"][0]["query"], "node_load1");
    }

    #[test]
    fn test_export_then_import_keeps_content_with_fresh_ids() {
        let mut query = Query::new("rate(x[5m])", "req/s", 1);
        query.series = vec![SeriesAlias::renamed("x__job_a", "Job A"), SeriesAlias::new("x__job_b")];
        let mut panel = Panel::new("Traffic", vec![query]);
        panel.description = Some("requests".to_string());

        let imported = import_panel(&export_panel(&panel).unwrap()).unwrap();
        let original = &panel.queries[0];
        let restored = &imported.queries[0];

        assert_eq!(imported.title, "Traffic");
        assert_eq!(imported.description.as_deref(), Some("requests"));
        assert_eq!(restored.query, original.query);
        assert_eq!(restored.units, original.units);
        assert_eq!(restored.resolution, original.resolution);
        assert_eq!(restored.series, original.series);
        assert_ne!(restored.id, original.id);
    }

    #[test]
    fn test_import_defaults_and_dedupes() {
        let file = import_panel(
            r#"{"title": "T", "queries": [
                {"query": "up", "series": [
                    {"series_name": "a"},
                    {"series_name": "a", "series_rename": "dup"}
                ]},
                {"resolution": 9}
            ]}"#,
        )
        .unwrap();

        assert_eq!(file.queries[0].units, "");
        assert_eq!(file.queries[0].resolution, DEFAULT_RESOLUTION);
        assert_eq!(file.queries[0].series, vec![SeriesAlias::new("a")]);
        assert_eq!(file.queries[1].query, "");
        assert_eq!(file.queries[1].resolution, 3);
        assert_ne!(file.queries[0].id, file.queries[1].id);
    }

    #[test]
    fn test_import_rejects_missing_fields() {
        let err = import_panel(r#"{"title": "T"}"#).unwrap_err();
        assert!(err.to_string().contains("'queries'"));

        let err = import_panel(r#"{"title": 4, "queries": []}"#).unwrap_err();
        assert!(err.to_string().contains("'title'"));

        assert!(matches!(import_panel("nope"), Err(ValidationError::Json(_))));
        assert!(matches!(
            import_panel(r#"{"title": "T", "queries": [{"units": 5}]}"#),
            Err(ValidationError::Field { .. })
        ));
    }

    #[test]
    fn test_dashboard_round_trip() {
        let snapshot = DashboardSnapshot::new(default_panels());
        let restored = import_dashboard(&export_dashboard(&snapshot).unwrap()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_dashboard_import_normalizes_panels() {
        let restored = import_dashboard(
            r#"{"panels": [
                {"id": "p", "title": "A", "queries": [
                    {"id": "q", "query": "up", "resolution": 200, "series": [
                        {"series_name": "up__job_a", "series_rename": "A"},
                        {"series_name": "up__job_a", "series_rename": "B"}
                    ]},
                    {"id": "q", "query": "up"}
                ]},
                {"id": "p", "title": "B"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(restored.panels[0].id, "p");
        assert_ne!(restored.panels[1].id, "p");
        let queries = &restored.panels[0].queries;
        assert_ne!(queries[0].id, queries[1].id);
        assert_eq!(queries[0].resolution, 3);
        assert_eq!(queries[0].series, vec![SeriesAlias::renamed("up__job_a", "A")]);
    }

    #[tokio::test]
    async fn test_load_normalizes_stored_snapshot() {
        let gateway = PersistenceGateway::new(Arc::new(InMemorySnapshotStorage::with_contents(
            r#"{"panels": [{"title": "A"}, {"title": "B"}]}"#,
        )));
        let snapshot = gateway.load().await.unwrap();
        assert!(snapshot.panels.iter().all(|p| !p.id.is_empty()));
        assert_ne!(snapshot.panels[0].id, snapshot.panels[1].id);
    }

    #[test]
    fn test_dashboard_import_requires_panels_array() {
        let err = import_dashboard(r#"{"panels": {}}"#).unwrap_err();
        assert!(err.to_string().contains("'panels'"));
        assert!(import_dashboard(r#"{"instanceDetails": {}}"#).is_err());
    }
}
