//! HTTP endpoints: one axum router per service, each on its own listener.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::ingest::IngestReceiver;
use crate::model::{Batch, Datagram, PartialResult};
use crate::query::{ArcInfo, GlobalStatistics, LineInfo, QueryService};
use crate::stats::{PipelineStats, StatsCollector};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorker {
    pub worker_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitParams {
    /// Zero or negative means no limit.
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
pub enum AppError {
    NotFound(&'static str),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{what} not available")),
            AppError::Internal(message) => {
                error!(error = %message, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

async fn ping() -> Json<bool> {
    Json(true)
}

// ingestion

pub fn ingest_router(receiver: Arc<IngestReceiver>) -> Router {
    Router::new()
        .route("/datagrams", post(submit_datagram))
        .route("/ping", get(ping))
        .with_state(receiver)
}

async fn submit_datagram(
    State(receiver): State<Arc<IngestReceiver>>,
    Json(datagram): Json<Datagram>,
) -> Result<Json<bool>, AppError> {
    // file append is blocking io
    let accepted = tokio::task::spawn_blocking(move || receiver.submit_datagram(&datagram))
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(accepted))
}

// dispatch

pub fn dispatch_router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/batches/pull", post(pull_batch))
        .route("/results", post(submit_result))
        .route("/work/pending", get(has_more_work))
        .route("/workers", post(register_worker))
        .route("/ping", get(ping))
        .with_state(dispatcher)
}

async fn pull_batch(State(dispatcher): State<Arc<Dispatcher>>) -> Json<Batch> {
    Json(dispatcher.pull_batch())
}

async fn submit_result(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(result): Json<PartialResult>,
) -> StatusCode {
    dispatcher.submit_partial_result(&result);
    StatusCode::NO_CONTENT
}

async fn has_more_work(State(dispatcher): State<Arc<Dispatcher>>) -> Json<bool> {
    Json(dispatcher.has_more_work())
}

async fn register_worker(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(req): Json<RegisterWorker>,
) -> Json<bool> {
    Json(dispatcher.register_worker(&req.worker_id))
}

// query

#[derive(Clone)]
pub struct QueryState {
    pub query: QueryService,
    pub stats: Option<StatsCollector>,
}

pub fn query_router(state: QueryState) -> Router {
    Router::new()
        .route("/arcs/slowest", get(slowest_arcs))
        .route("/arcs/fastest", get(fastest_arcs))
        .route("/arcs/{key}", get(arc_info))
        .route("/lines", get(all_lines))
        .route("/lines/{id}/arcs", get(arcs_for_line))
        .route("/lines/{id}/average", get(line_average_speed))
        .route("/statistics", get(global_statistics))
        .route("/stats", get(pipeline_stats))
        .route("/ping", get(ping))
        .with_state(state)
}

async fn arc_info(State(state): State<QueryState>, Path(key): Path<String>) -> Json<ArcInfo> {
    Json(state.query.arc_info(&key))
}

async fn arcs_for_line(State(state): State<QueryState>, Path(id): Path<i64>) -> Json<Vec<ArcInfo>> {
    Json(state.query.arcs_for_line(id))
}

async fn line_average_speed(State(state): State<QueryState>, Path(id): Path<i64>) -> Json<Option<f64>> {
    Json(state.query.line_average_speed(id))
}

async fn all_lines(State(state): State<QueryState>) -> Json<Vec<LineInfo>> {
    Json(state.query.all_lines())
}

async fn slowest_arcs(
    State(state): State<QueryState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<ArcInfo>> {
    Json(state.query.slowest_arcs(params.limit))
}

async fn fastest_arcs(
    State(state): State<QueryState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<ArcInfo>> {
    Json(state.query.fastest_arcs(params.limit))
}

async fn global_statistics(State(state): State<QueryState>) -> Json<GlobalStatistics> {
    Json(state.query.global_statistics())
}

async fn pipeline_stats(State(state): State<QueryState>) -> Result<Json<PipelineStats>, AppError> {
    let collector = state.stats.ok_or(AppError::NotFound("pipeline stats"))?;
    Ok(Json(collector.collect()))
}

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))
}

/// Serves `router` on `listener` until `cancel` fires, letting in-flight
/// requests finish.
pub async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(endpoint = name, %addr, "HTTP endpoint listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .with_context(|| format!("{name} endpoint on {addr}"))?;

    info!(endpoint = name, "HTTP endpoint stopped");
    Ok(())
}
