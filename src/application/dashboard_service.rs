// Dashboard service - use cases over the panel store, fetch coordinators and persistence
use crate::application::fetch_coordinator::{FetchRequest, RangeFetchCoordinator};
use crate::application::metrics_repository::MetricsRepository;
use crate::application::panel_store::{panel_from_templates, PanelStore};
use crate::application::persistence::{self, PersistenceGateway};
use crate::application::query_rewriter::QueryRewriter;
use crate::application::series_aligner::{chart_model, to_csv, ChartModel, Tooltip};
use crate::domain::panel::{DashboardSnapshot, Panel, PanelContext};
use crate::domain::series::{QueryRef, RangeSpec};
use crate::domain::template::template_by_id;
use crate::error::DashboardError;
use crate::infrastructure::promql;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::watch;

/// What a chart viewer asks for.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChartRequest {
    pub instance_id: Option<String>,
    pub minutes: Option<i64>,
    #[serde(default)]
    pub refresh: u64,
}

/// Partial edit of one query; absent fields are left as they are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueryUpdate {
    pub query: Option<String>,
    pub units: Option<String>,
    pub resolution: Option<u8>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResponse {
    #[serde(flatten)]
    pub chart: ChartModel,
    pub loading: bool,
    pub error: Option<String>,
    pub failed_queries: Vec<String>,
}

pub struct DashboardService {
    store: RwLock<PanelStore>,
    updates: watch::Sender<DashboardSnapshot>,
    coordinators: Mutex<HashMap<String, Arc<RangeFetchCoordinator>>>,
    repository: Arc<dyn MetricsRepository>,
    rewriter: QueryRewriter,
    no_instance_sentinel: String,
    default_range: RangeSpec,
}

impl DashboardService {
    pub fn new(
        repository: Arc<dyn MetricsRepository>,
        default_panels: Vec<Panel>,
        no_instance_sentinel: &str,
        default_range: RangeSpec,
    ) -> Self {
        let store = PanelStore::new(default_panels);
        let (updates, _) = watch::channel(store.snapshot());
        Self {
            store: RwLock::new(store),
            updates,
            coordinators: Mutex::new(HashMap::new()),
            repository,
            rewriter: QueryRewriter::new(no_instance_sentinel),
            no_instance_sentinel: no_instance_sentinel.to_string(),
            default_range,
        }
    }

    /// Snapshots published after every state change.
    pub fn subscribe(&self) -> watch::Receiver<DashboardSnapshot> {
        self.updates.subscribe()
    }

    /// Replace the built-in panels with the persisted snapshot, if there is one.
    pub async fn restore(&self, gateway: &PersistenceGateway) {
        match gateway.load().await {
            Some(snapshot) => {
                let panels = snapshot.panels.len();
                self.write_store().set_dashboard_state(snapshot);
                tracing::info!("Restored {} panels from snapshot", panels);
            }
            None => tracing::info!("No saved dashboard, starting with default panels"),
        }
    }

    fn read_store(&self) -> std::sync::RwLockReadGuard<'_, PanelStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> std::sync::RwLockWriteGuard<'_, PanelStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a store mutation and publish a snapshot if it changed anything.
    fn mutate<T>(&self, op: impl FnOnce(&mut PanelStore) -> (T, bool)) -> T {
        let mut store = self.write_store();
        let (result, changed) = op(&mut store);
        if changed {
            self.updates.send_replace(store.snapshot());
        }
        result
    }

    fn coordinator(&self, panel_id: &str) -> Arc<RangeFetchCoordinator> {
        let mut coordinators = self.coordinators.lock().unwrap_or_else(PoisonError::into_inner);
        coordinators
            .entry(panel_id.to_string())
            .or_insert_with(|| Arc::new(RangeFetchCoordinator::new(self.repository.clone())))
            .clone()
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        self.read_store().snapshot()
    }

    pub fn visible_panels(&self, context: &PanelContext) -> Vec<Panel> {
        self.read_store()
            .visible_panels(context)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn panel(&self, panel_id: &str) -> Result<Panel, DashboardError> {
        self.read_store()
            .select_panel(panel_id)
            .cloned()
            .ok_or_else(|| DashboardError::PanelNotFound(panel_id.to_string()))
    }

    fn ensure_query(&self, panel_id: &str, query_id: &str) -> Result<(), DashboardError> {
        let panel = self.panel(panel_id)?;
        match panel.query(query_id) {
            Some(_) => Ok(()),
            None => Err(DashboardError::QueryNotFound {
                panel_id: panel_id.to_string(),
                query_id: query_id.to_string(),
            }),
        }
    }

    /// Returns the panel as stored, with ids and resolutions normalized.
    pub fn add_panel(&self, panel: Option<Panel>) -> Panel {
        self.mutate(|store| (store.add_panel(panel), true))
    }

    /// Merge the given templates into one new panel for `context`.
    pub fn add_panel_from_templates(
        &self,
        template_ids: &[String],
        context: &PanelContext,
    ) -> Result<Panel, DashboardError> {
        let templates = template_ids
            .iter()
            .map(|id| template_by_id(id).ok_or_else(|| DashboardError::UnknownTemplate(id.clone())))
            .collect::<Result<Vec<_>, _>>()?;

        let os = self.read_store().instance_os(context, &self.no_instance_sentinel);
        let panel = panel_from_templates(&templates, context, os.as_deref(), &self.no_instance_sentinel);
        Ok(self.add_panel(Some(panel)))
    }

    pub fn update_panel_title(&self, panel_id: &str, title: &str) -> Result<Panel, DashboardError> {
        self.panel(panel_id)?;
        self.mutate(|store| ((), store.update_panel_title(panel_id, title)));
        self.panel(panel_id)
    }

    pub fn delete_panel(&self, panel_id: &str) -> Result<(), DashboardError> {
        if !self.mutate(|store| {
            let deleted = store.delete_panel(panel_id);
            (deleted, deleted)
        }) {
            return Err(DashboardError::PanelNotFound(panel_id.to_string()));
        }
        self.coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(panel_id);
        Ok(())
    }

    pub fn add_query(&self, panel_id: &str) -> Result<Panel, DashboardError> {
        self.mutate(|store| {
            let added = store.add_query(panel_id);
            let changed = added.is_some();
            (added, changed)
        })
        .ok_or_else(|| DashboardError::PanelNotFound(panel_id.to_string()))?;
        self.panel(panel_id)
    }

    pub fn update_query(
        &self,
        panel_id: &str,
        query_id: &str,
        update: &QueryUpdate,
    ) -> Result<Panel, DashboardError> {
        self.ensure_query(panel_id, query_id)?;
        self.mutate(|store| {
            let mut changed = false;
            if let Some(text) = &update.query {
                // Unparseable text is still stored so the editor can finish it.
                if !text.trim().is_empty() {
                    if let Err(e) = promql::validate(text) {
                        tracing::warn!("Query {} in panel {} does not parse: {}", query_id, panel_id, e);
                    }
                }
                changed |= store.update_query(panel_id, query_id, text);
            }
            if let Some(units) = &update.units {
                changed |= store.update_query_units(panel_id, query_id, units);
            }
            if let Some(resolution) = update.resolution {
                changed |= store.update_query_resolution(panel_id, query_id, resolution);
            }
            ((), changed)
        });
        self.panel(panel_id)
    }

    pub fn remove_query(&self, panel_id: &str, query_id: &str) -> Result<Panel, DashboardError> {
        self.ensure_query(panel_id, query_id)?;
        self.mutate(|store| ((), store.remove_query(panel_id, query_id)));
        self.panel(panel_id)
    }

    pub fn update_series_rename(
        &self,
        panel_id: &str,
        query_id: &str,
        series_name: &str,
        rename: &str,
    ) -> Result<Panel, DashboardError> {
        self.ensure_query(panel_id, query_id)?;
        self.mutate(|store| ((), store.update_series_rename(panel_id, query_id, series_name, rename)));
        self.panel(panel_id)
    }

    /// Fetch (or reuse) the panel's data, fold observed series back into its
    /// aliases, and build the chart.
    pub async fn chart(&self, panel_id: &str, request: &ChartRequest) -> Result<ChartResponse, DashboardError> {
        let panel = self.panel(panel_id)?;
        let refs: Vec<QueryRef> = panel
            .queries
            .iter()
            .filter(|q| !q.is_blank())
            .map(|q| QueryRef::new(q.id.clone(), q.query.clone()))
            .collect();
        let queries = self.rewriter.scope_queries(&refs, request.instance_id.as_deref());
        let range = RangeSpec::new(
            request.minutes.unwrap_or(self.default_range.minutes),
            self.default_range.step_secs,
        );

        let state = self
            .coordinator(panel_id)
            .poll(&FetchRequest::new(queries, range, request.refresh))
            .await;

        if state.error.is_none() {
            if let Some(data) = &state.data {
                self.mutate(|store| ((), store.reconcile(panel_id, data)));
            }
        }

        let panel = self.panel(panel_id)?;
        let series = state.data.as_deref().map(Vec::as_slice).unwrap_or_default();
        Ok(ChartResponse {
            chart: chart_model(series, &panel.queries),
            loading: state.loading,
            error: state.error,
            failed_queries: state.failed_queries,
        })
    }

    /// `(file name, CSV)` of the most recent fetch for the panel.
    pub fn csv(&self, panel_id: &str) -> Result<(String, String), DashboardError> {
        let panel = self.panel(panel_id)?;
        let state = self.coordinator(panel_id).state();
        let series = state.data.as_deref().map(Vec::as_slice).unwrap_or_default();
        Ok((persistence::csv_file_name(&panel.title), to_csv(series, &panel.queries)))
    }

    /// Hover readout at sample `index` of the most recent fetch.
    pub fn tooltip(&self, panel_id: &str, index: usize) -> Result<Option<Tooltip>, DashboardError> {
        let panel = self.panel(panel_id)?;
        let state = self.coordinator(panel_id).state();
        let series = state.data.as_deref().map(Vec::as_slice).unwrap_or_default();
        Ok(chart_model(series, &panel.queries).tooltip_at(index))
    }

    /// `(file name, JSON)` for a panel export.
    pub fn export_panel(&self, panel_id: &str) -> Result<(String, String), DashboardError> {
        let panel = self.panel(panel_id)?;
        let json = persistence::export_panel(&panel)?;
        Ok((persistence::export_file_name(&panel.title), json))
    }

    pub fn import_panel(&self, json: &str) -> Result<Panel, DashboardError> {
        let file = persistence::import_panel(json)?;
        let mut panel = Panel::new(file.title, file.queries);
        panel.description = file.description;
        Ok(self.add_panel(Some(panel)))
    }

    pub fn import_into_panel(&self, panel_id: &str, json: &str) -> Result<Panel, DashboardError> {
        self.panel(panel_id)?;
        let file = persistence::import_panel(json)?;
        self.mutate(|store| ((), store.update_panel_from_file(panel_id, file)));
        self.panel(panel_id)
    }

    pub fn export_dashboard(&self) -> Result<String, DashboardError> {
        Ok(persistence::export_dashboard(&self.snapshot())?)
    }

    pub fn import_dashboard(&self, json: &str) -> Result<DashboardSnapshot, DashboardError> {
        let snapshot = persistence::import_dashboard(json)?;
        self.mutate(|store| ((), store.set_dashboard_state(snapshot)));
        self.coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(self.snapshot())
    }

    /// Look up an instance's host details and remember them for template scoping.
    pub async fn refresh_instance_details(
        &self,
        compound_product_id: &str,
        provisioned_id: &str,
        instance_id: &str,
    ) -> Result<Value, DashboardError> {
        let details = self
            .repository
            .instance_details(instance_id)
            .await
            .map_err(|e| DashboardError::Backend(format!("{:#}", e)))?;

        self.mutate(|store| {
            let changed =
                store.set_instance_details(compound_product_id, provisioned_id, instance_id, details.clone());
            ((), changed)
        });
        Ok(details)
    }
}
