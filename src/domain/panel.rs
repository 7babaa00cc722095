// Panel domain model
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

pub const DEFAULT_RESOLUTION: u8 = 2;
pub const MAX_RESOLUTION: u8 = 3;
pub const NEW_PANEL_TITLE: &str = "New Panel";

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_resolution() -> u8 {
    DEFAULT_RESOLUTION
}

/// Replace `id` with a fresh one if it is empty or already taken.
fn claim_unique_id(id: &mut String, taken: &mut HashSet<String>) {
    if id.is_empty() || taken.contains(id.as_str()) {
        *id = new_id();
    }
    taken.insert(id.clone());
}

/// User-editable display label for one canonical series name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesAlias {
    #[serde(default)]
    pub series_name: String,
    #[serde(default)]
    pub series_rename: String,
}

impl SeriesAlias {
    pub fn new(series_name: impl Into<String>) -> Self {
        let series_name = series_name.into();
        Self {
            series_rename: series_name.clone(),
            series_name,
        }
    }

    pub fn renamed(series_name: impl Into<String>, series_rename: impl Into<String>) -> Self {
        Self {
            series_name: series_name.into(),
            series_rename: series_rename.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub series: Vec<SeriesAlias>,
    #[serde(default)]
    pub units: String,
    #[serde(default = "default_resolution")]
    pub resolution: u8,
}

impl Query {
    pub fn new(query: impl Into<String>, units: impl Into<String>, resolution: u8) -> Self {
        Self {
            id: new_id(),
            query: query.into(),
            series: Vec::new(),
            units: units.into(),
            resolution: resolution.min(MAX_RESOLUTION),
        }
    }

    pub fn empty() -> Self {
        Self::new("", "", DEFAULT_RESOLUTION)
    }

    /// Blank queries render nothing and never reach the backend.
    pub fn is_blank(&self) -> bool {
        self.query.trim().is_empty()
    }

    /// Clamp the resolution and keep only the first alias per series name.
    pub fn normalize(&mut self) {
        self.resolution = self.resolution.min(MAX_RESOLUTION);
        let mut seen = HashSet::new();
        self.series.retain(|alias| seen.insert(alias.series_name.clone()));
    }

    /// Alias used as the legend label for `series_name`. An alias with an
    /// empty name acts as a placeholder matching any series.
    pub fn alias_for(&self, series_name: &str) -> Option<&SeriesAlias> {
        self.series
            .iter()
            .find(|s| s.series_name == series_name || s.series_name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Panel {
    #[serde(default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub queries: Vec<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operating_system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compound_product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl Panel {
    pub fn new(title: impl Into<String>, queries: Vec<Query>) -> Self {
        Self {
            id: new_id(),
            title: title.into(),
            queries,
            description: None,
            operating_system: None,
            compound_product_id: None,
            instance_id: None,
        }
    }

    /// A fresh panel holding one empty query.
    pub fn blank() -> Self {
        Self::new(NEW_PANEL_TITLE, vec![Query::empty()])
    }

    /// Query ids are unique and non-empty within a panel after this.
    pub fn normalize(&mut self) {
        let mut taken = HashSet::new();
        for query in &mut self.queries {
            claim_unique_id(&mut query.id, &mut taken);
            query.normalize();
        }
    }

    pub fn query(&self, query_id: &str) -> Option<&Query> {
        self.queries.iter().find(|q| q.id == query_id)
    }

    pub fn query_mut(&mut self, query_id: &str) -> Option<&mut Query> {
        self.queries.iter_mut().find(|q| q.id == query_id)
    }

    fn is_unscoped(&self) -> bool {
        self.operating_system.is_none()
            && self.compound_product_id.is_none()
            && self.instance_id.is_none()
    }

    /// Whether this panel should be listed for the given product context.
    pub fn is_visible_in(&self, context: &PanelContext) -> bool {
        let Some(product_id) = context.product_id.as_deref() else {
            return true;
        };
        if self.is_unscoped() {
            return true;
        }

        let matches_compound_product = match &self.compound_product_id {
            None => true,
            Some(id) => context.compound_product_id.as_deref() == Some(id.as_str()),
        };
        let matches_instance = self.operating_system.as_deref() == Some(product_id)
            || self.instance_id.as_deref() == Some(product_id)
            || self.operating_system.is_none();

        matches_compound_product && matches_instance
    }
}

/// Route context a dashboard is viewed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PanelContext {
    pub product_id: Option<String>,
    pub compound_product_id: Option<String>,
    pub provisioned_compound_product_id: Option<String>,
}

/// Exported panel file: a panel without its own id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelFile {
    pub title: String,
    pub queries: Vec<Query>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl From<&Panel> for PanelFile {
    fn from(panel: &Panel) -> Self {
        Self {
            title: panel.title.clone(),
            queries: panel.queries.clone(),
            description: panel.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceEntry {
    pub details: Value,
}

/// compoundProductId -> provisionedCompoundProductId -> instanceId -> details
pub type InstanceDetailsMap =
    BTreeMap<String, BTreeMap<String, BTreeMap<String, InstanceEntry>>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub panels: Vec<Panel>,
    #[serde(default)]
    pub instance_details: InstanceDetailsMap,
}

impl DashboardSnapshot {
    pub fn new(panels: Vec<Panel>) -> Self {
        Self {
            panels,
            instance_details: InstanceDetailsMap::new(),
        }
    }

    /// Panel ids are unique and non-empty across the snapshot after this.
    pub fn normalize(&mut self) {
        let mut taken = HashSet::new();
        for panel in &mut self.panels {
            claim_unique_id(&mut panel.id, &mut taken);
            panel.normalize();
        }
    }

    pub fn instance_details(
        &self,
        compound_product_id: &str,
        provisioned_id: &str,
        instance_id: &str,
    ) -> Option<&Value> {
        self.instance_details
            .get(compound_product_id)?
            .get(provisioned_id)?
            .get(instance_id)
            .map(|entry| &entry.details)
    }
}

/// Panels shown when nothing has been persisted yet.
pub fn default_panels() -> Vec<Panel> {
    let scoped = |id: &str, title: &str, query: Query| Panel {
        id: id.to_string(),
        title: title.to_string(),
        queries: vec![query],
        description: None,
        operating_system: Some("observability-node".to_string()),
        compound_product_id: None,
        instance_id: None,
    };

    vec![
        scoped(
            "Prometheus-Query-Rate",
            "Prometheus Query Rate",
            Query::new("rate(prometheus_http_requests_total[5m])", "req/s", 2),
        ),
        scoped(
            "Scrape-Duration",
            "Scrape Duration",
            Query::new("prometheus_target_interval_length_seconds", "s", 2),
        ),
    ]
}
