// PromQL parsing - locates vector selectors with byte-accurate spans
use crate::error::RewriteError;
use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use std::ops::Range;

#[derive(Parser)]
#[grammar = "src/infrastructure/promql.pest"]
struct PromQlParser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
}

impl MatchOp {
    fn parse(text: &str) -> Self {
        match text {
            "!=" => Self::NotEqual,
            "=~" => Self::RegexMatch,
            "!~" => Self::RegexNoMatch,
            _ => Self::Equal,
        }
    }

    /// Operators that select (rather than exclude) label values.
    pub fn is_positive(self) -> bool {
        matches!(self, Self::Equal | Self::RegexMatch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub label: String,
    pub op: MatchOp,
}

/// The `{...}` part of a selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BraceList {
    /// Offset of `{`.
    pub open: usize,
    /// Offset of `}`.
    pub close: usize,
    pub matchers: Vec<LabelMatcher>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorSpan {
    pub span: Range<usize>,
    pub metric_name: Option<String>,
    pub braces: Option<BraceList>,
}

impl SelectorSpan {
    /// Whether some matcher already selects on `label`.
    pub fn selects_on(&self, label: &str) -> bool {
        self.braces.as_ref().is_some_and(|b| {
            b.matchers
                .iter()
                .any(|m| m.label == label && m.op.is_positive())
        })
    }
}

/// Parse `query` and return every vector selector in source order.
pub fn vector_selectors(query: &str) -> Result<Vec<SelectorSpan>, RewriteError> {
    let root = PromQlParser::parse(Rule::query, query)?;

    Ok(root
        .flatten()
        .filter(|pair| pair.as_rule() == Rule::vector_selector)
        .map(selector_span)
        .collect())
}

/// Syntax check only.
pub fn validate(query: &str) -> Result<(), RewriteError> {
    PromQlParser::parse(Rule::query, query)?;
    Ok(())
}

fn selector_span(pair: Pair<'_, Rule>) -> SelectorSpan {
    let span = pair.as_span().start()..pair.as_span().end();
    let mut metric_name = None;
    let mut braces = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::metric_name => metric_name = Some(inner.as_str().to_string()),
            Rule::label_matchers => {
                let open = inner.as_span().start();
                let close = inner.as_span().end() - 1;
                let matchers = inner
                    .into_inner()
                    .filter(|m| m.as_rule() == Rule::matcher)
                    .filter_map(label_matcher)
                    .collect();
                braces = Some(BraceList { open, close, matchers });
            }
            _ => {}
        }
    }

    SelectorSpan { span, metric_name, braces }
}

fn label_matcher(pair: Pair<'_, Rule>) -> Option<LabelMatcher> {
    let mut inner = pair.into_inner();
    let first = inner.next()?;
    if first.as_rule() != Rule::matcher_label {
        // bare `{"metric_name"}`
        return None;
    }

    let label = first.into_inner().next().map(|p| match p.as_rule() {
        Rule::string_literal => unquote(p.as_str()),
        _ => p.as_str().to_string(),
    })?;
    let op = MatchOp::parse(inner.next()?.as_str());

    Some(LabelMatcher { label, op })
}

fn unquote(literal: &str) -> String {
    literal
        .get(1..literal.len().saturating_sub(1))
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(query: &str) -> Vec<Option<String>> {
        vector_selectors(query)
            .unwrap()
            .into_iter()
            .map(|s| s.metric_name)
            .collect()
    }

    #[test]
    fn test_bare_selector_span() {
        let selectors = vector_selectors("node_load1").unwrap();
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].span, 0..10);
        assert!(selectors[0].braces.is_none());
    }

    #[test]
    fn test_braced_selector_offsets() {
        let query = r#"rate(http_requests_total{job="api", code!="500"}[5m])"#;
        let selectors = vector_selectors(query).unwrap();
        assert_eq!(selectors.len(), 1);

        let braces = selectors[0].braces.as_ref().unwrap();
        assert_eq!(&query[braces.open..=braces.close], r#"{job="api", code!="500"}"#);
        assert_eq!(braces.matchers.len(), 2);
        assert_eq!(braces.matchers[1].op, MatchOp::NotEqual);
    }

    #[test]
    fn test_functions_and_aggregations_are_not_selectors() {
        assert_eq!(
            names("node_load1 / count without (cpu, mode) (node_cpu_seconds_total{mode=\"idle\"})"),
            vec![Some("node_load1".into()), Some("node_cpu_seconds_total".into())]
        );
        assert_eq!(names("count(windows_os_info) or vector(0)"), vec![Some("windows_os_info".into())]);
        assert_eq!(names("sum(rate(x[5m])) by (job)"), vec![Some("x".into())]);
    }

    #[test]
    fn test_keywords_are_not_metric_names() {
        assert_eq!(
            names("a > bool on(job) group_left(team) b offset 5m"),
            vec![Some("a".into()), Some("b".into())]
        );
        assert_eq!(names("order_total or online_users"), vec![Some("order_total".into()), Some("online_users".into())]);
    }

    #[test]
    fn test_instance_detection() {
        let selectors = vector_selectors(r#"up{instance="a"} + up{instance!="b"} + up{job="instance=x"}"#).unwrap();
        assert!(selectors[0].selects_on("instance"));
        assert!(!selectors[1].selects_on("instance"));
        assert!(!selectors[2].selects_on("instance"));
    }

    #[test]
    fn test_label_only_selector_and_subquery() {
        let selectors = vector_selectors(r#"max_over_time({__name__="up"}[10m:1m] @ end())"#).unwrap();
        assert_eq!(selectors.len(), 1);
        assert!(selectors[0].metric_name.is_none());
        assert!(selectors[0].braces.is_some());
    }

    #[test]
    fn test_invalid_queries_fail() {
        assert!(vector_selectors("sum(rate(x[5m])").is_err());
        assert!(vector_selectors("up{job=}").is_err());
        assert!(vector_selectors("").is_err());
        assert!(validate("histogram_quantile(0.9, sum by (le) (rate(x_bucket[5m])))").is_ok());
    }
}
