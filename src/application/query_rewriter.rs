// Query rewriter - scopes PromQL queries to one monitored instance
use crate::domain::series::QueryRef;
use crate::infrastructure::promql::{vector_selectors, SelectorSpan};

pub const NO_INSTANCE_SENTINEL: &str = "observability-node";
const INSTANCE_LABEL: &str = "instance";

/// A pending splice over the original query text.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Edit {
    from: usize,
    to: usize,
    insert: String,
}

#[derive(Debug, Clone)]
pub struct QueryRewriter {
    no_instance_sentinel: String,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self::new(NO_INSTANCE_SENTINEL)
    }
}

impl QueryRewriter {
    pub fn new(no_instance_sentinel: impl Into<String>) -> Self {
        Self {
            no_instance_sentinel: no_instance_sentinel.into(),
        }
    }

    /// Add `instance="<id>"` to every vector selector that does not already
    /// select on `instance`. Returns `query` unchanged when there is no
    /// instance to scope to or when the query does not parse.
    pub fn inject_instance_filter(&self, query: &str, instance_id: &str) -> String {
        if instance_id.is_empty() || instance_id == self.no_instance_sentinel || query.trim().is_empty() {
            return query.to_string();
        }

        let selectors = match vector_selectors(query) {
            Ok(selectors) => selectors,
            Err(e) => {
                tracing::warn!("Failed to parse PromQL query, returning original: {} ({})", query, e);
                return query.to_string();
            }
        };

        let matcher = format!("{}=\"{}\"", INSTANCE_LABEL, escape_label_value(instance_id));
        let mut edits: Vec<Edit> = selectors
            .iter()
            .filter(|s| !s.selects_on(INSTANCE_LABEL))
            .map(|s| edit_for(query, s, &matcher))
            .collect();

        edits.sort_by(|a, b| b.from.cmp(&a.from));

        let mut rewritten = query.to_string();
        for edit in edits {
            rewritten.replace_range(edit.from..edit.to, &edit.insert);
        }

        tracing::debug!("Scoped query to {}: {}", instance_id, rewritten);
        rewritten
    }

    /// Scope a whole batch; `None` leaves the batch untouched.
    pub fn scope_queries(&self, queries: &[QueryRef], instance_id: Option<&str>) -> Vec<QueryRef> {
        match instance_id {
            Some(id) => queries
                .iter()
                .map(|q| QueryRef::new(q.id.clone(), self.inject_instance_filter(&q.query, id)))
                .collect(),
            None => queries.to_vec(),
        }
    }
}

fn edit_for(query: &str, selector: &SelectorSpan, matcher: &str) -> Edit {
    match &selector.braces {
        Some(braces) => {
            let body = query[braces.open + 1..braces.close].trim_end();
            let insert = if body.is_empty() || body.ends_with(',') {
                matcher.to_string()
            } else {
                format!(",{}", matcher)
            };
            Edit {
                from: braces.close,
                to: braces.close,
                insert,
            }
        }
        None => Edit {
            from: selector.span.end,
            to: selector.span.end,
            insert: format!("{{{}}}", matcher),
        },
    }
}

fn escape_label_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
