//! HTTP surface: the HTML dashboard, the log viewer and the JSON API.
//!
//! Handlers are thin. They validate path and query input, call into the
//! supervisor client, the deployment runner or the log reader, and hand the
//! result to [`ActionResponse`] or the page renderers.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{from_fn, Next};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, Instrument};

use crate::deploy::{DeployAction, DeployRunner};
use crate::errors::DashError;
use crate::logs::{self, LogFileDescriptor, LogKind, LogReader};
use crate::outcome::{ActionKind, ActionResponse};
use crate::pages;
use crate::supervisor::{LifecycleAction, Supervisor};

/// Shared handles for every request. Cloned per request by axum.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub deployer: Arc<DeployRunner>,
    pub logs: Arc<LogReader>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/logs/:name/:log_type", get(log_page))
        .route("/api/processes", get(list_processes))
        .route("/api/processes/:name/:action", post(lifecycle_action))
        .route("/api/logs/:name/:log_type", get(log_json))
        .route(
            "/api/git-pull/:name",
            post(|state: State<AppState>, name: Path<String>| {
                deploy_action(state, name, DeployAction::PullSource)
            }),
        )
        .route(
            "/api/npm-install/:name",
            post(|state: State<AppState>, name: Path<String>| {
                deploy_action(state, name, DeployAction::InstallDependencies)
            }),
        )
        .route(
            "/api/npm-build/:name",
            post(|state: State<AppState>, name: Path<String>| {
                deploy_action(state, name, DeployAction::Build)
            }),
        )
        .route(
            "/api/npm-deploy/:name",
            post(|state: State<AppState>, name: Path<String>| {
                deploy_action(state, name, DeployAction::Deploy)
            }),
        )
        .layer(from_fn(trace_requests))
        .with_state(state)
}

async fn trace_requests(request: Request, next: Next) -> Response {
    let span = info_span!(
        "http.request",
        method = %request.method(),
        route = %request.uri().path(),
    );
    let started = Instant::now();
    let response = next.run(request).instrument(span.clone()).await;
    span.in_scope(|| {
        info!(
            status = response.status().as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        )
    });
    response
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a str>,
}

impl IntoResponse for DashError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            details: self.stderr(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Errors on the HTML routes are shown as plain text.
struct PageError(DashError);

impl From<DashError> for PageError {
    fn from(err: DashError) -> Self {
        Self(err)
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (self.0.status(), format!("Error: {}", self.0)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct LogQuery {
    lines: Option<String>,
    #[serde(default)]
    strip_ansi: bool,
}

async fn dashboard(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    let records = state.supervisor.list_processes().await?;
    let cards: Vec<_> = records
        .into_iter()
        .map(|record| {
            let logs = state.logs.descriptors(&record.name);
            (record, logs)
        })
        .collect();
    Ok(Html(pages::render_dashboard(&cards)))
}

fn resolve_log(
    reader: &LogReader,
    name: &str,
    log_type: &str,
) -> Result<LogFileDescriptor, DashError> {
    let kind: LogKind = log_type.parse()?;
    if !logs::is_safe_name(name) {
        return Err(DashError::InvalidProcessName(name.to_string()));
    }
    reader
        .descriptor(name, kind)
        .ok_or_else(|| DashError::LogFileAbsent(format!("{}-{}.log", name, kind.as_str())))
}

async fn log_page(
    State(state): State<AppState>,
    Path((name, log_type)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Html<String>, PageError> {
    let lines = logs::parse_line_count(query.lines.as_deref())?;
    let log = resolve_log(&state.logs, &name, &log_type)?;
    let content = logs::strip_ansi(&state.logs.tail(&log.path, lines).await);
    Ok(Html(pages::render_log(&log, lines.get(), &content)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogBody {
    process_name: String,
    log_type: LogKind,
    file_name: String,
    file_path: String,
    lines: usize,
    content: String,
}

async fn log_json(
    State(state): State<AppState>,
    Path((name, log_type)): Path<(String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Json<LogBody>, DashError> {
    let lines = logs::parse_line_count(query.lines.as_deref())?;
    let log = resolve_log(&state.logs, &name, &log_type)?;
    let mut content = state.logs.tail(&log.path, lines).await;
    if query.strip_ansi {
        content = logs::strip_ansi(&content);
    }
    Ok(Json(LogBody {
        process_name: log.process_name,
        log_type: log.kind,
        file_name: log.file_name,
        file_path: log.path.display().to_string(),
        lines: lines.get(),
        content,
    }))
}

async fn list_processes(State(state): State<AppState>) -> Response {
    match state.supervisor.list_processes().await {
        Ok(records) => Json(records).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn lifecycle_action(
    State(state): State<AppState>,
    Path((name, action)): Path<(String, String)>,
) -> Response {
    let action: LifecycleAction = match action.parse() {
        Ok(action) => action,
        Err(err) => return err.into_response(),
    };
    let outcome = state.supervisor.apply_lifecycle_action(&name, action).await;
    let (status, body) = ActionResponse::from_outcome(&name, ActionKind::Lifecycle(action), outcome);
    (status, Json(body)).into_response()
}

async fn deploy_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    action: DeployAction,
) -> Response {
    let kind = ActionKind::Deploy(action);
    let (status, body) = match state.deployer.run(&name, action).await {
        Ok(outcome) => ActionResponse::from_outcome(&name, kind, outcome),
        Err(err) => ActionResponse::from_error(&name, kind, &err),
    };
    if status != StatusCode::OK || !body.success {
        info!(process = %name, action = action.as_str(), code = ?body.code, "deployment action did not succeed");
    }
    (status, Json(body)).into_response()
}
