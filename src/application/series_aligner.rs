// Series aligner - columnar chart data, colors, legend labels and value formatting
use crate::domain::panel::{Query, DEFAULT_RESOLUTION};
use crate::domain::series::FetchedSeries;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const PALETTE: [&str; 8] = [
    "#7EB26D", // green
    "#EAB839", // yellow
    "#6ED0E0", // cyan
    "#EF843C", // orange
    "#E24D42", // red
    "#1F78C1", // blue
    "#BA43A9", // purple
    "#705DA0", // dark purple
];

pub const UNKNOWN_SERIES: &str = "unknown_series";

const SI_SUFFIXES: [&str; 9] = ["p", "n", "μ", "m", "", "K", "M", "G", "T"];
const MIN_SI_ORDER: i32 = -4;
const MAX_SI_ORDER: i32 = 4;

pub fn color_for(index: usize) -> &'static str {
    PALETTE[index % PALETTE.len()]
}

/// Format `value` with `resolution` decimals and an SI suffix.
pub fn format_scientific(value: f64, resolution: u8) -> String {
    let precision = usize::from(resolution);
    if value == 0.0 {
        return format!("{:.*}", precision, 0.0);
    }
    if !value.is_finite() {
        return value.to_string();
    }

    let sign = if value < 0.0 { "-" } else { "" };
    let magnitude = value.abs();
    let order = ((magnitude.log10() / 3.0).floor() as i32).clamp(MIN_SI_ORDER, MAX_SI_ORDER);
    let normalized = magnitude / 10f64.powi(order * 3);
    let suffix = SI_SUFFIXES[(order - MIN_SI_ORDER) as usize];

    format!("{}{:.*}{}", sign, precision, normalized, suffix)
}

/// `[timestamps, column_1, column_2, ...]` as consumed by the plotting widget.
///
/// The first series' timestamps are the x-axis for every column. Series on a
/// different grid are not resampled and will plot misaligned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedColumns {
    pub timestamps: Vec<i64>,
    pub columns: Vec<Vec<Option<f64>>>,
}

impl Serialize for AlignedColumns {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.columns.len() + 1))?;
        seq.serialize_element(&self.timestamps)?;
        for column in &self.columns {
            seq.serialize_element(column)?;
        }
        seq.end()
    }
}

pub fn align(series: &[FetchedSeries]) -> AlignedColumns {
    let Some(first) = series.first() else {
        return AlignedColumns {
            timestamps: Vec::new(),
            columns: vec![Vec::new()],
        };
    };

    AlignedColumns {
        timestamps: first.timestamps.clone(),
        columns: series.iter().map(|s| s.values.clone()).collect(),
    }
}

/// Per-series plotting configuration.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesVisual {
    pub label: String,
    pub color: &'static str,
    pub units: String,
    pub resolution: u8,
    pub query_id: String,
    pub series_name: String,
}

impl SeriesVisual {
    pub fn format_value(&self, value: f64) -> String {
        format!("{} {}", format_scientific(value, self.resolution), self.units)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TooltipRow {
    pub label: String,
    pub color: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Tooltip {
    pub time: String,
    pub rows: Vec<TooltipRow>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct ChartModel {
    pub data: AlignedColumns,
    pub series: Vec<SeriesVisual>,
}

impl ChartModel {
    /// Tooltip content for the cursor at `index`, if anything is plotted there.
    pub fn tooltip_at(&self, index: usize) -> Option<Tooltip> {
        let timestamp = *self.data.timestamps.get(index)?;
        let time = DateTime::<Utc>::from_timestamp(timestamp, 0)?
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let rows: Vec<TooltipRow> = self
            .series
            .iter()
            .zip(&self.data.columns)
            .filter_map(|(visual, column)| {
                let value = (*column.get(index)?)?;
                Some(TooltipRow {
                    label: visual.label.clone(),
                    color: visual.color,
                    value: visual.format_value(value),
                })
            })
            .collect();

        (!rows.is_empty()).then_some(Tooltip { time, rows })
    }
}

/// Align `series` and attach legend labels, colors and formatting taken from
/// the owning queries.
pub fn chart_model(series: &[FetchedSeries], queries: &[Query]) -> ChartModel {
    let visuals = series
        .iter()
        .enumerate()
        .map(|(index, s)| {
            let series_name = s.name().unwrap_or_default().to_string();
            let owner = queries.iter().find(|q| q.id == s.query_id);

            let alias = owner
                .and_then(|q| q.alias_for(&series_name))
                .map(|a| a.series_rename.as_str())
                .filter(|rename| !rename.is_empty());
            let label = match alias {
                Some(rename) => rename.to_string(),
                None if !series_name.is_empty() => series_name.clone(),
                None => UNKNOWN_SERIES.to_string(),
            };

            SeriesVisual {
                label,
                color: color_for(index),
                units: owner.map(|q| q.units.clone()).unwrap_or_default(),
                resolution: owner.map_or(DEFAULT_RESOLUTION, |q| q.resolution),
                query_id: s.query_id.clone(),
                series_name,
            }
        })
        .collect();

    ChartModel {
        data: align(series),
        series: visuals,
    }
}

/// One row per distinct timestamp, one column per display name.
pub fn to_csv(series: &[FetchedSeries], queries: &[Query]) -> String {
    let renames: HashMap<&str, &str> = queries
        .iter()
        .flat_map(|q| &q.series)
        .filter(|alias| !alias.series_rename.is_empty())
        .map(|alias| (alias.series_name.as_str(), alias.series_rename.as_str()))
        .collect();

    let mut names = BTreeSet::new();
    let mut rows: BTreeMap<i64, HashMap<&str, String>> = BTreeMap::new();
    for s in series {
        let name = s.name().unwrap_or(UNKNOWN_SERIES);
        let display = renames.get(name).copied().unwrap_or(name);
        names.insert(display);

        for (timestamp, value) in s.timestamps.iter().zip(&s.values) {
            rows.entry(*timestamp)
                .or_default()
                .insert(display, value.map(|v| v.to_string()).unwrap_or_default());
        }
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        std::iter::once("Time".to_string())
            .chain(names.iter().map(|n| csv_cell(n)))
            .collect::<Vec<_>>()
            .join(","),
    );
    for (timestamp, cells) in &rows {
        let time = DateTime::<Utc>::from_timestamp(*timestamp, 0)
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| timestamp.to_string());
        let line = std::iter::once(time)
            .chain(names.iter().map(|n| cells.get(n).cloned().unwrap_or_default()))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(line);
    }
    lines.join("\n")
}

fn csv_cell(text: &str) -> String {
    if text.contains([',', '"', '\n']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::panel::SeriesAlias;
    use crate::domain::series::NAME_LABEL;

    fn fetched(name: &str, query_id: &str, timestamps: &[i64], values: &[Option<f64>]) -> FetchedSeries {
        FetchedSeries {
            labels: BTreeMap::from([(NAME_LABEL.to_string(), name.to_string())]),
            timestamps: timestamps.to_vec(),
            values: values.to_vec(),
            query_id: query_id.to_string(),
        }
    }

    fn query(id: &str, units: &str, resolution: u8, aliases: Vec<SeriesAlias>) -> Query {
        let mut q = Query::new("up", units, resolution);
        q.id = id.to_string();
        q.series = aliases;
        q
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(format_scientific(0.0, 3), "0.000");
        assert_eq!(format_scientific(0.0, 0), "0");
        assert_eq!(format_scientific(1234.0, 2), "1.23K");
        assert_eq!(format_scientific(-2_500_000.0, 1), "-2.5M");
        assert_eq!(format_scientific(0.0042, 2), "4.20m");
        assert_eq!(format_scientific(42.0, 0), "42");
        assert_eq!(format_scientific(3.0e-7, 1), "300.0n");
    }

    #[test]
    fn test_format_scientific_clamps_extreme_orders() {
        assert_eq!(format_scientific(5.0e15, 0), "5000T");
        assert_eq!(format_scientific(2.0e-15, 3), "0.002p");
    }

    #[test]
    fn test_align_uses_first_timestamps() {
        let series = vec![
            fetched("a", "q1", &[1, 2, 3], &[Some(1.0), None, Some(3.0)]),
            fetched("b", "q1", &[1, 2, 3], &[Some(4.0), Some(5.0), Some(6.0)]),
        ];
        let aligned = align(&series);
        assert_eq!(aligned.timestamps, vec![1, 2, 3]);
        assert_eq!(aligned.columns.len(), 2);

        let json = serde_json::to_value(&aligned).unwrap();
        assert_eq!(json, serde_json::json!([[1, 2, 3], [1.0, null, 3.0], [4.0, 5.0, 6.0]]));
    }

    #[test]
    fn test_align_empty() {
        let json = serde_json::to_value(align(&[])).unwrap();
        assert_eq!(json, serde_json::json!([[], []]));
    }

    #[test]
    fn test_colors_cycle_through_palette() {
        assert_eq!(color_for(0), "#7EB26D");
        assert_eq!(color_for(8), "#7EB26D");
        assert_eq!(color_for(13), "#1F78C1");
    }

    #[test]
    fn test_chart_model_labels() {
        let series = vec![
            fetched("up__job_a", "q1", &[1], &[Some(1.0)]),
            fetched("up__job_b", "q1", &[1], &[Some(1.0)]),
            fetched("load", "q2", &[1], &[Some(1.0)]),
            fetched("", "q3", &[1], &[Some(1.0)]),
        ];
        let queries = vec![
            query(
                "q1",
                "%",
                1,
                vec![SeriesAlias::renamed("up__job_a", "Job A"), SeriesAlias::renamed("up__job_b", "")],
            ),
            query("q2", "", 3, vec![SeriesAlias::renamed("", "Load")]),
        ];

        let model = chart_model(&series, &queries);
        let labels: Vec<_> = model.series.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Job A", "up__job_b", "Load", "unknown_series"]);

        assert_eq!(model.series[0].units, "%");
        assert_eq!(model.series[2].resolution, 3);
        assert_eq!(model.series[3].resolution, DEFAULT_RESOLUTION);
        assert_eq!(model.series[3].units, "");
        assert_eq!(model.series[1].color, "#EAB839");
    }

    #[test]
    fn test_colors_are_stable_across_refreshes() {
        let series = vec![fetched("a", "q1", &[1], &[Some(1.0)]), fetched("b", "q1", &[1], &[Some(2.0)])];
        let first = chart_model(&series, &[]);
        let second = chart_model(&series, &[]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tooltip_rows_skip_nulls() {
        let series = vec![
            fetched("a", "q1", &[1714564800, 1714564815], &[Some(1500.0), None]),
            fetched("b", "q1", &[1714564800, 1714564815], &[Some(2.0), Some(3.0)]),
        ];
        let model = chart_model(&series, &[query("q1", "req/s", 1, Vec::new())]);

        let tooltip = model.tooltip_at(0).unwrap();
        assert_eq!(tooltip.time, "2024-05-01 12:00:00");
        assert_eq!(tooltip.rows.len(), 2);
        assert_eq!(tooltip.rows[0].value, "1.5K req/s");

        let tooltip = model.tooltip_at(1).unwrap();
        assert_eq!(tooltip.rows.len(), 1);
        assert_eq!(tooltip.rows[0].label, "b");
        assert_eq!(tooltip.rows[0].color, "#EAB839");

        assert!(model.tooltip_at(2).is_none());
    }

    #[test]
    fn test_tooltip_hidden_when_all_null() {
        let series = vec![fetched("a", "q1", &[1], &[None])];
        assert!(chart_model(&series, &[]).tooltip_at(0).is_none());
    }

    #[test]
    fn test_csv_export() {
        let series = vec![
            fetched("b_metric", "q1", &[1714564815, 1714564800], &[Some(2.0), Some(1.5)]),
            fetched("a_metric", "q1", &[1714564800], &[None]),
        ];
        let queries = vec![query("q1", "", 2, vec![SeriesAlias::renamed("b_metric", "Bravo")])];

        assert_eq!(
            to_csv(&series, &queries),
            "Time,Bravo,a_metric\n\
             2024-05-01T12:00:00.000Z,1.5,\n\
             2024-05-01T12:00:15.000Z,2,"
        );
    }

    #[test]
    fn test_csv_quotes_names() {
        let series = vec![fetched("x", "q1", &[0], &[Some(1.0)])];
        let queries = vec![query("q1", "", 2, vec![SeriesAlias::renamed("x", "a,b")])];
        assert!(to_csv(&series, &queries).starts_with("Time,\"a,b\"\n"));
    }
}
