// Range fetch coordinator - concurrent fan-out of a panel's queries
use crate::application::metrics_repository::{MetricsRepository, RawSeries};
use crate::application::series_namer::extract_series_name;
use crate::domain::series::{FetchedSeries, NAME_LABEL, QUERY_LABEL, QueryRef, RangeSpec, TimeWindow};
use crate::error::FetchError;
use chrono::Utc;
use futures::future::join_all;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const BATCH_ERROR_MESSAGE: &str = "Failed to fetch metrics.";

/// What a viewer asks for: the panel's queries, a relative range and an
/// externally driven refresh counter.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub queries: Vec<QueryRef>,
    pub range: RangeSpec,
    pub refresh_tick: u64,
}

impl FetchRequest {
    pub fn new(queries: Vec<QueryRef>, range: RangeSpec, refresh_tick: u64) -> Self {
        Self {
            queries,
            range,
            refresh_tick,
        }
    }
}

/// Memoization key: content of the query list, not its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchKey {
    queries: u64,
    range: RangeSpec,
    refresh_tick: u64,
}

impl FetchKey {
    pub fn of(request: &FetchRequest) -> Self {
        let mut hasher = DefaultHasher::new();
        for q in &request.queries {
            q.id.hash(&mut hasher);
            q.query.trim().hash(&mut hasher);
        }
        Self {
            queries: hasher.finish(),
            range: request.range,
            refresh_tick: request.refresh_tick,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchState {
    pub data: Option<Arc<Vec<FetchedSeries>>>,
    pub loading: bool,
    pub error: Option<String>,
    /// Ids of the queries whose request failed in the last cycle.
    pub failed_queries: Vec<String>,
}

/// Fetch every non-blank query concurrently over `window`.
///
/// `Ok(None)` when there is nothing to fetch or nothing came back. Any single
/// failure fails the whole batch; every failure is reported.
pub async fn fetch_all(
    repository: &dyn MetricsRepository,
    queries: &[QueryRef],
    window: &TimeWindow,
) -> Result<Option<Vec<FetchedSeries>>, Vec<FetchError>> {
    let active: Vec<&QueryRef> = queries.iter().filter(|q| !q.is_blank()).collect();
    if active.is_empty() {
        return Ok(None);
    }

    let responses = join_all(active.iter().map(|q| async move {
        repository
            .query_range(&q.query, window)
            .await
            .map(|series| (*q, series))
            .map_err(|e| FetchError::new(q.id.clone(), format!("{:#}", e)))
    }))
    .await;

    let mut all_series = Vec::new();
    let mut failures = Vec::new();
    for response in responses {
        match response {
            Ok((query, series)) => {
                tracing::debug!("Query {} returned {} series", query.id, series.len());
                all_series.extend(series.into_iter().map(|raw| tag_series(query, raw)));
            }
            Err(e) => failures.push(e),
        }
    }

    if !failures.is_empty() {
        return Err(failures);
    }
    Ok((!all_series.is_empty()).then_some(all_series))
}

fn tag_series(query: &QueryRef, raw: RawSeries) -> FetchedSeries {
    let name = extract_series_name(&query.query, &raw.labels);
    let mut labels = raw.labels;
    labels.insert(NAME_LABEL.to_string(), name);
    labels.insert(QUERY_LABEL.to_string(), query.query.clone());

    let (timestamps, values) = raw.samples.into_iter().map(|s| (s.time, s.value)).unzip();

    FetchedSeries {
        labels,
        timestamps,
        values,
        query_id: query.id.clone(),
    }
}

/// Holds the loading/error/data tri-state for one panel and decides when a
/// new fetch cycle is needed.
pub struct RangeFetchCoordinator {
    repository: Arc<dyn MetricsRepository>,
    state: Mutex<FetchState>,
    last_key: Mutex<Option<FetchKey>>,
    generation: AtomicU64,
}

impl RangeFetchCoordinator {
    pub fn new(repository: Arc<dyn MetricsRepository>) -> Self {
        Self {
            repository,
            state: Mutex::new(FetchState::default()),
            last_key: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> FetchState {
        lock(&self.state).clone()
    }

    /// Fetch only if the request differs from the previous one.
    pub async fn poll(&self, request: &FetchRequest) -> FetchState {
        let key = FetchKey::of(request);
        if *lock(&self.last_key) == Some(key) {
            return self.state();
        }
        let window = request.range.resolve(Utc::now());
        *lock(&self.last_key) = Some(key);
        self.run(request, window).await
    }

    /// Fetch unconditionally (retry).
    pub async fn refresh(&self, request: &FetchRequest) -> FetchState {
        let window = request.range.resolve(Utc::now());
        *lock(&self.last_key) = Some(FetchKey::of(request));
        self.run(request, window).await
    }

    // The window is resolved by the caller before any state is touched.
    async fn run(&self, request: &FetchRequest, window: TimeWindow) -> FetchState {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if request.queries.iter().all(QueryRef::is_blank) {
            let mut state = lock(&self.state);
            *state = FetchState::default();
            return state.clone();
        }

        {
            let mut state = lock(&self.state);
            state.loading = true;
            state.error = None;
            state.failed_queries.clear();
        }

        let result = fetch_all(self.repository.as_ref(), &request.queries, &window).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale fetch cycle {}", generation);
            return self.state();
        }

        let mut state = lock(&self.state);
        state.loading = false;
        match result {
            Ok(data) => {
                state.data = data.map(Arc::new);
            }
            Err(failures) => {
                for failure in &failures {
                    tracing::error!("Metrics fetch failed: {}", failure);
                }
                state.error = Some(BATCH_ERROR_MESSAGE.to_string());
                state.failed_queries = failures.into_iter().map(|f| f.query_id).collect();
            }
        }
        state.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::metrics_repository::testing::{series, ScriptedRepository};
    use std::time::Duration;

    fn request(queries: &[(&str, &str)], tick: u64) -> FetchRequest {
        FetchRequest::new(
            queries.iter().map(|(id, q)| QueryRef::new(*id, *q)).collect(),
            RangeSpec::default(),
            tick,
        )
    }

    fn coordinator(repo: &Arc<ScriptedRepository>) -> RangeFetchCoordinator {
        RangeFetchCoordinator::new(repo.clone())
    }

    #[tokio::test]
    async fn test_series_are_tagged_and_named() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.respond(
            "rate(http_requests_total[5m])",
            vec![
                series(&[("job", "api")], &[(10, 1.0), (25, 2.0)]),
                series(&[("job", "web")], &[(10, 3.0), (25, 4.0)]),
            ],
        );

        let state = coordinator(&repo)
            .poll(&request(&[("q1", "rate(http_requests_total[5m])")], 0))
            .await;

        let data = state.data.unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].query_id, "q1");
        assert_eq!(data[0].name(), Some("http_requests_total__job_api"));
        assert_eq!(data[0].labels[QUERY_LABEL], "rate(http_requests_total[5m])");
        assert_eq!(data[1].timestamps, vec![10, 25]);
        assert_eq!(data[1].values, vec![Some(3.0), Some(4.0)]);
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_blank_queries_issue_no_requests() {
        let repo = Arc::new(ScriptedRepository::new());
        let state = coordinator(&repo).poll(&request(&[("q1", ""), ("q2", "   ")], 0)).await;

        assert!(state.data.is_none());
        assert!(!state.loading);
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn test_blank_queries_are_filtered_from_batch() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.respond("up", vec![series(&[], &[(1, 1.0)])]);

        let state = coordinator(&repo).poll(&request(&[("q1", ""), ("q2", "up")], 0)).await;
        assert_eq!(repo.calls(), 1);
        assert_eq!(state.data.unwrap()[0].query_id, "q2");
    }

    #[tokio::test]
    async fn test_empty_results_give_no_data() {
        let repo = Arc::new(ScriptedRepository::new());
        let state = coordinator(&repo).poll(&request(&[("q1", "absent_metric")], 0)).await;
        assert_eq!(repo.calls(), 1);
        assert!(state.data.is_none());
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_query_keeps_previous_data() {
        let repo = Arc::new(ScriptedRepository::new());
        for q in ["a", "b", "c"] {
            repo.respond(q, vec![series(&[], &[(1, 1.0)])]);
        }
        let coordinator = coordinator(&repo);
        let batch = [("q1", "a"), ("q2", "b"), ("q3", "c")];

        let first = coordinator.poll(&request(&batch, 0)).await;
        let previous = first.data.clone().unwrap();
        assert_eq!(previous.len(), 3);

        repo.fail("b", "connection refused");
        let second = coordinator.poll(&request(&batch, 1)).await;

        assert_eq!(second.error.as_deref(), Some("Failed to fetch metrics."));
        assert_eq!(second.failed_queries, vec!["q2".to_string()]);
        assert!(Arc::ptr_eq(second.data.as_ref().unwrap(), &previous));
        assert!(!second.loading);
    }

    #[tokio::test]
    async fn test_unchanged_request_is_memoized() {
        let repo = Arc::new(ScriptedRepository::new());
        let coordinator = coordinator(&repo);

        coordinator.poll(&request(&[("q1", "up")], 0)).await;
        coordinator.poll(&request(&[("q1", " up ")], 0)).await;
        assert_eq!(repo.calls(), 1);

        coordinator.poll(&request(&[("q1", "up")], 1)).await;
        assert_eq!(repo.calls(), 2);

        let mut wider = request(&[("q1", "up")], 1);
        wider.range = RangeSpec::new(60, 15);
        coordinator.poll(&wider).await;
        assert_eq!(repo.calls(), 3);

        coordinator.refresh(&wider).await;
        assert_eq!(repo.calls(), 4);
    }

    #[tokio::test]
    async fn test_changed_query_text_triggers_fetch() {
        let repo = Arc::new(ScriptedRepository::new());
        let coordinator = coordinator(&repo);

        coordinator.poll(&request(&[("q1", "up")], 0)).await;
        coordinator.poll(&request(&[("q1", "up{job=\"x\"}")], 0)).await;
        assert_eq!(repo.calls(), 2);
    }

    #[tokio::test]
    async fn test_unbounded_range_still_fetches() {
        let repo = Arc::new(ScriptedRepository::new());
        let coordinator = coordinator(&repo);
        let mut huge = request(&[("q1", "up")], 0);
        huge.range = RangeSpec { minutes: i64::MAX, step_secs: i64::MAX };

        let state = coordinator.poll(&huge).await;
        assert!(!state.loading);
        assert_eq!(repo.calls(), 1);

        huge.refresh_tick = 1;
        coordinator.poll(&huge).await;
        assert_eq!(repo.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let repo = Arc::new(ScriptedRepository::new());
        repo.respond("slow", vec![series(&[("v", "old")], &[(1, 1.0)])]);
        repo.respond("fast", vec![series(&[("v", "new")], &[(1, 2.0)])]);
        repo.delay("slow", Duration::from_secs(5));
        let coordinator = coordinator(&repo);

        let slow = request(&[("q1", "slow")], 0);
        let fast = request(&[("q1", "fast")], 0);
        let (_, _) = tokio::join!(coordinator.poll(&slow), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            coordinator.poll(&fast).await
        });

        let data = coordinator.state().data.unwrap();
        assert_eq!(data[0].labels["v"], "new");
    }
}
