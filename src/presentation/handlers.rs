// HTTP request handlers
use crate::application::dashboard_service::{ChartRequest, QueryUpdate};
use crate::domain::panel::{Panel, PanelContext};
use crate::domain::template::{categories, find_templates, PanelTemplate};
use crate::error::{DashboardError, ValidationError};
use crate::infrastructure::http_response::{accepts_brotli, attachment_response, json_response};
use crate::presentation::app_state::AppState;
use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type HandlerResult = Result<Response<Body>, StatusCode>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
pub struct TitleBody {
    pub title: String,
}

#[derive(Deserialize)]
pub struct RenameBody {
    pub series_name: String,
    pub series_rename: String,
}

#[derive(Deserialize)]
pub struct TemplateSelection {
    pub template_ids: Vec<String>,
    #[serde(flatten)]
    pub context: PanelContext,
}

#[derive(Deserialize)]
pub struct TemplateFilter {
    pub operating_system: Option<String>,
    pub category: Option<String>,
}

#[derive(Deserialize)]
pub struct TooltipQuery {
    pub index: usize,
}

#[derive(Serialize)]
struct TemplateCatalogue {
    categories: Vec<&'static str>,
    templates: Vec<&'static PanelTemplate>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/templates", get(list_templates))
        .route("/panels", get(list_panels).post(add_panel))
        .route("/panels/from-templates", post(add_panel_from_templates))
        .route("/panels/import", post(import_panel))
        .route("/panels/:id", get(get_panel).delete(delete_panel))
        .route("/panels/:id/title", put(update_panel_title))
        .route("/panels/:id/queries", post(add_query))
        .route("/panels/:id/queries/:qid", axum::routing::patch(update_query).delete(remove_query))
        .route("/panels/:id/queries/:qid/series", put(rename_series))
        .route("/panels/:id/chart", get(chart))
        .route("/panels/:id/tooltip", get(tooltip))
        .route("/panels/:id/csv", get(download_csv))
        .route("/panels/:id/export", get(export_panel))
        .route("/panels/:id/import", post(import_into_panel))
        .route("/dashboard/export", get(export_dashboard))
        .route("/dashboard/import", post(import_dashboard))
        .route(
            "/instances/:compound/:provisioned/:instance/details",
            post(refresh_instance_details),
        )
        .with_state(state)
}

fn status_for(error: &DashboardError) -> StatusCode {
    match error {
        DashboardError::PanelNotFound(_) | DashboardError::QueryNotFound { .. } => StatusCode::NOT_FOUND,
        DashboardError::UnknownTemplate(_) | DashboardError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        DashboardError::Backend(_) => StatusCode::BAD_GATEWAY,
        DashboardError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn respond<T: Serialize>(result: Result<T, DashboardError>, compress: bool) -> HandlerResult {
    match result {
        Ok(data) => json_response(StatusCode::OK, &data, compress).await,
        Err(e) => {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!("Request failed: {}", e);
            } else {
                tracing::debug!("Request rejected: {}", e);
            }
            json_response(status, &ErrorBody { error: e.to_string() }, compress).await
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Template catalogue, optionally narrowed to one operating system and category
pub async fn list_templates(Query(filter): Query<TemplateFilter>, headers: HeaderMap) -> HandlerResult {
    let catalogue = TemplateCatalogue {
        categories: categories(),
        templates: find_templates(filter.operating_system.as_deref(), filter.category.as_deref()),
    };
    json_response(StatusCode::OK, &catalogue, accepts_brotli(&headers)).await
}

/// Panels visible in the route context
pub async fn list_panels(
    Query(context): Query<PanelContext>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    let panels = state.dashboard_service.visible_panels(&context);
    json_response(StatusCode::OK, &panels, accepts_brotli(&headers)).await
}

/// An empty body adds a blank panel.
pub async fn add_panel(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    body: String,
) -> HandlerResult {
    let compress = accepts_brotli(&headers);
    let panel = if body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Panel>(&body) {
            Ok(panel) => Some(panel),
            Err(e) => {
                let error = DashboardError::from(ValidationError::Json(e.to_string()));
                return respond::<()>(Err(error), compress).await;
            }
        }
    };
    let panel = state.dashboard_service.add_panel(panel);
    json_response(StatusCode::CREATED, &panel, compress).await
}

pub async fn add_panel_from_templates(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(selection): Json<TemplateSelection>,
) -> HandlerResult {
    let result = state
        .dashboard_service
        .add_panel_from_templates(&selection.template_ids, &selection.context);
    respond(result, accepts_brotli(&headers)).await
}

pub async fn get_panel(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    respond(state.dashboard_service.panel(&id), accepts_brotli(&headers)).await
}

pub async fn delete_panel(Path(id): Path<String>, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.dashboard_service.delete_panel(&id) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => status_for(&e),
    }
}

pub async fn update_panel_title(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<TitleBody>,
) -> HandlerResult {
    let result = state.dashboard_service.update_panel_title(&id, &body.title);
    respond(result, accepts_brotli(&headers)).await
}

pub async fn add_query(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    respond(state.dashboard_service.add_query(&id), accepts_brotli(&headers)).await
}

pub async fn update_query(
    Path((id, qid)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(update): Json<QueryUpdate>,
) -> HandlerResult {
    let result = state.dashboard_service.update_query(&id, &qid, &update);
    respond(result, accepts_brotli(&headers)).await
}

pub async fn remove_query(
    Path((id, qid)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    respond(state.dashboard_service.remove_query(&id, &qid), accepts_brotli(&headers)).await
}

pub async fn rename_series(
    Path((id, qid)): Path<(String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<RenameBody>,
) -> HandlerResult {
    let result = state
        .dashboard_service
        .update_series_rename(&id, &qid, &body.series_name, &body.series_rename);
    respond(result, accepts_brotli(&headers)).await
}

/// Fetch, reconcile and return the chart model. A failed fetch answers 502
/// with the previously fetched data still in the body.
pub async fn chart(
    Path(id): Path<String>,
    Query(request): Query<ChartRequest>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    let compress = accepts_brotli(&headers);
    match state.dashboard_service.chart(&id, &request).await {
        Ok(response) if response.error.is_some() => {
            json_response(StatusCode::BAD_GATEWAY, &response, compress).await
        }
        result => respond(result, compress).await,
    }
}

pub async fn download_csv(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    let compress = accepts_brotli(&headers);
    match state.dashboard_service.csv(&id) {
        Ok((file_name, csv)) => attachment_response("text/csv; charset=utf-8", &file_name, csv, compress).await,
        Err(e) => respond::<()>(Err(e), compress).await,
    }
}

pub async fn tooltip(
    Path(id): Path<String>,
    Query(query): Query<TooltipQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    respond(state.dashboard_service.tooltip(&id, query.index), accepts_brotli(&headers)).await
}

pub async fn export_panel(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    let compress = accepts_brotli(&headers);
    match state.dashboard_service.export_panel(&id) {
        Ok((file_name, json)) => attachment_response("application/json", &file_name, json, compress).await,
        Err(e) => respond::<()>(Err(e), compress).await,
    }
}

pub async fn import_panel(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    body: String,
) -> HandlerResult {
    respond(state.dashboard_service.import_panel(&body), accepts_brotli(&headers)).await
}

pub async fn import_into_panel(
    Path(id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    body: String,
) -> HandlerResult {
    respond(state.dashboard_service.import_into_panel(&id, &body), accepts_brotli(&headers)).await
}

pub async fn export_dashboard(headers: HeaderMap, State(state): State<Arc<AppState>>) -> HandlerResult {
    let compress = accepts_brotli(&headers);
    match state.dashboard_service.export_dashboard() {
        Ok(json) => attachment_response("application/json", "dashboard-config.json", json, compress).await,
        Err(e) => respond::<()>(Err(e), compress).await,
    }
}

pub async fn import_dashboard(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    body: String,
) -> HandlerResult {
    respond(state.dashboard_service.import_dashboard(&body), accepts_brotli(&headers)).await
}

pub async fn refresh_instance_details(
    Path((compound, provisioned, instance)): Path<(String, String, String)>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> HandlerResult {
    let result = state
        .dashboard_service
        .refresh_instance_details(&compound, &provisioned, &instance)
        .await;
    respond(result, accepts_brotli(&headers)).await
}
