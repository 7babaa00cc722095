// Panel state store - sole owner and mutator of panel data
use crate::domain::panel::{
    new_id, DashboardSnapshot, InstanceDetailsMap, InstanceEntry, Panel, PanelContext, PanelFile, Query,
    SeriesAlias, MAX_RESOLUTION,
};
use crate::domain::series::FetchedSeries;
use crate::domain::template::PanelTemplate;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_COMPOUND_PRODUCT_ID: &str = "default-compound-product-id";

/// Every mutation returns `true` when it changed state. Unknown ids are no-ops.
#[derive(Debug, Clone, Default)]
pub struct PanelStore {
    panels: Vec<Panel>,
    instance_details: InstanceDetailsMap,
}

impl PanelStore {
    /// Start from built-in panels, used until a snapshot is restored.
    pub fn new(default_panels: Vec<Panel>) -> Self {
        Self {
            panels: default_panels,
            instance_details: InstanceDetailsMap::new(),
        }
    }

    pub fn snapshot(&self) -> DashboardSnapshot {
        DashboardSnapshot {
            panels: self.panels.clone(),
            instance_details: self.instance_details.clone(),
        }
    }

    pub fn panels(&self) -> &[Panel] {
        &self.panels
    }

    pub fn select_panel(&self, panel_id: &str) -> Option<&Panel> {
        self.panels.iter().find(|p| p.id == panel_id)
    }

    pub fn visible_panels(&self, context: &PanelContext) -> Vec<&Panel> {
        self.panels.iter().filter(|p| p.is_visible_in(context)).collect()
    }

    pub fn instance_details(&self) -> &InstanceDetailsMap {
        &self.instance_details
    }

    fn panel_mut(&mut self, panel_id: &str) -> Option<&mut Panel> {
        self.panels.iter_mut().find(|p| p.id == panel_id)
    }

    fn query_mut(&mut self, panel_id: &str, query_id: &str) -> Option<&mut Query> {
        self.panel_mut(panel_id)?.query_mut(query_id)
    }

    /// Replace every panel. Instance details are kept unless the incoming map has entries.
    pub fn set_dashboard_state(&mut self, mut snapshot: DashboardSnapshot) -> bool {
        snapshot.normalize();
        let mut changed = false;
        if self.panels != snapshot.panels {
            self.panels = snapshot.panels;
            changed = true;
        }
        if !snapshot.instance_details.is_empty() && self.instance_details != snapshot.instance_details {
            self.instance_details = snapshot.instance_details;
            changed = true;
        }
        changed
    }

    /// Push `panel`, or a blank "New Panel", and return what was stored. A
    /// missing or already used panel id is replaced.
    pub fn add_panel(&mut self, panel: Option<Panel>) -> Panel {
        let mut panel = panel.unwrap_or_else(Panel::blank);
        if panel.id.is_empty() || self.select_panel(&panel.id).is_some() {
            panel.id = new_id();
        }
        panel.normalize();
        self.panels.push(panel.clone());
        panel
    }

    pub fn update_panel_title(&mut self, panel_id: &str, title: &str) -> bool {
        match self.panel_mut(panel_id) {
            Some(panel) if panel.title != title => {
                panel.title = title.to_string();
                true
            }
            _ => false,
        }
    }

    /// Load a panel file into an existing panel; query ids are regenerated.
    pub fn update_panel_from_file(&mut self, panel_id: &str, file: PanelFile) -> bool {
        let Some(panel) = self.panel_mut(panel_id) else {
            return false;
        };
        panel.title = file.title;
        panel.queries = file
            .queries
            .into_iter()
            .map(|q| Query { id: new_id(), ..q })
            .collect();
        if file.description.is_some() {
            panel.description = file.description;
        }
        panel.normalize();
        true
    }

    pub fn delete_panel(&mut self, panel_id: &str) -> bool {
        let before = self.panels.len();
        self.panels.retain(|p| p.id != panel_id);
        self.panels.len() != before
    }

    /// Append an empty query. Returns its id.
    pub fn add_query(&mut self, panel_id: &str) -> Option<String> {
        let panel = self.panel_mut(panel_id)?;
        let query = Query::empty();
        let id = query.id.clone();
        panel.queries.push(query);
        Some(id)
    }

    pub fn update_query(&mut self, panel_id: &str, query_id: &str, text: &str) -> bool {
        match self.query_mut(panel_id, query_id) {
            Some(query) if query.query != text => {
                query.query = text.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn remove_query(&mut self, panel_id: &str, query_id: &str) -> bool {
        let Some(panel) = self.panel_mut(panel_id) else {
            return false;
        };
        let before = panel.queries.len();
        panel.queries.retain(|q| q.id != query_id);
        panel.queries.len() != before
    }

    pub fn update_query_units(&mut self, panel_id: &str, query_id: &str, units: &str) -> bool {
        match self.query_mut(panel_id, query_id) {
            Some(query) if query.units != units => {
                query.units = units.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn update_query_resolution(&mut self, panel_id: &str, query_id: &str, resolution: u8) -> bool {
        let resolution = resolution.min(MAX_RESOLUTION);
        match self.query_mut(panel_id, query_id) {
            Some(query) if query.resolution != resolution => {
                query.resolution = resolution;
                true
            }
            _ => false,
        }
    }

    /// Rename an existing alias. Names not yet observed are ignored.
    pub fn update_series_rename(
        &mut self,
        panel_id: &str,
        query_id: &str,
        series_name: &str,
        rename: &str,
    ) -> bool {
        let alias = self
            .query_mut(panel_id, query_id)
            .and_then(|q| q.series.iter_mut().find(|s| s.series_name == series_name));
        match alias {
            Some(alias) if alias.series_rename != rename => {
                alias.series_rename = rename.to_string();
                true
            }
            _ => false,
        }
    }

    /// Replace a query's aliases with `series_names` (deduplicated, in order),
    /// keeping renames of names seen before. No write when nothing differs.
    pub fn set_series_for_query(&mut self, panel_id: &str, query_id: &str, series_names: &[String]) -> bool {
        let Some(query) = self.query_mut(panel_id, query_id) else {
            return false;
        };

        let mut seen = HashSet::new();
        let reconciled: Vec<SeriesAlias> = series_names
            .iter()
            .filter(|name| seen.insert(name.as_str()))
            .map(|name| {
                query
                    .series
                    .iter()
                    .find(|s| &s.series_name == name)
                    .cloned()
                    .unwrap_or_else(|| SeriesAlias::new(name.clone()))
            })
            .collect();

        if reconciled == query.series {
            return false;
        }
        query.series = reconciled;
        true
    }

    /// Merge the series names observed in a fetch into the panel's aliases.
    /// Queries that returned nothing keep their aliases.
    pub fn reconcile(&mut self, panel_id: &str, series: &[FetchedSeries]) -> bool {
        let mut observed: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for s in series {
            if let Some(name) = s.name() {
                observed.entry(s.query_id.as_str()).or_default().push(name.to_string());
            }
        }

        let mut changed = false;
        for (query_id, names) in observed {
            changed |= self.set_series_for_query(panel_id, query_id, &names);
        }
        if changed {
            tracing::debug!("Reconciled series aliases for panel {}", panel_id);
        }
        changed
    }

    pub fn set_instance_details(
        &mut self,
        compound_product_id: &str,
        provisioned_id: &str,
        instance_id: &str,
        details: Value,
    ) -> bool {
        let slot = self
            .instance_details
            .entry(compound_product_id.to_string())
            .or_default()
            .entry(provisioned_id.to_string())
            .or_default();
        let entry = InstanceEntry { details };
        if slot.get(instance_id) == Some(&entry) {
            return false;
        }
        slot.insert(instance_id.to_string(), entry);
        true
    }

    /// Operating system of the context's instance, when its details are known.
    pub fn instance_os(&self, context: &PanelContext, no_instance_sentinel: &str) -> Option<String> {
        let product_id = context.product_id.as_deref().filter(|id| *id != no_instance_sentinel)?;
        let details = self
            .instance_details
            .get(context.compound_product_id.as_deref()?)?
            .get(context.provisioned_compound_product_id.as_deref()?)?
            .get(product_id)?;
        details.details.get("os")?.as_str().map(str::to_string)
    }
}

/// Merge the selected templates into a single new panel scoped to `context`.
pub fn panel_from_templates(
    templates: &[&PanelTemplate],
    context: &PanelContext,
    instance_os: Option<&str>,
    no_instance_sentinel: &str,
) -> Panel {
    let title = templates.iter().map(|t| t.name).collect::<Vec<_>>().join(" + ");
    let description = templates
        .iter()
        .map(|t| t.description)
        .filter(|d| !d.is_empty())
        .collect::<Vec<_>>()
        .join(" | ");

    let queries = templates
        .iter()
        .flat_map(|t| t.queries)
        .map(|tq| {
            let mut query = Query::new(tq.query, tq.units, tq.resolution);
            if !tq.alias.is_empty() {
                query.series.push(SeriesAlias::renamed("", tq.alias));
            }
            query
        })
        .collect();

    let product_id = context.product_id.clone();
    let mut panel = Panel::new(title, queries);
    panel.description = Some(description);
    panel.operating_system = instance_os.map(str::to_string).or_else(|| product_id.clone());
    panel.compound_product_id = Some(
        context
            .compound_product_id
            .clone()
            .unwrap_or_else(|| DEFAULT_COMPOUND_PRODUCT_ID.to_string()),
    );
    panel.instance_id = product_id.filter(|id| id != no_instance_sentinel);
    panel
}
