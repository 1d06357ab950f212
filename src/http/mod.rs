use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app::AppContext;
use crate::escalation::{EscalationEvent, EscalationState};
use crate::pools::PoolEvent;
use crate::presenter::InstanceSnapshot;
use crate::series::Sample;

pub fn create_router(ctx: AppContext) -> Router {
    let api = Router::new()
        .route("/instances", get(list_instances))
        .route(
            "/instances/:id",
            post(start_instance).delete(stop_instance),
        )
        .route("/instances/:id/samples", post(ingest_samples))
        .route("/instances/:id/pools", post(ingest_pool_snapshot))
        .route("/instances/:id/snapshot", get(get_snapshot))
        .route("/instances/:id/series/:metric", get(get_series))
        .route(
            "/instances/:id/pools/:pool/series/:metric",
            get(get_pool_series),
        )
        .route("/instances/:id/escalations", get(get_escalations))
        .route(
            "/instances/:id/escalations/history",
            get(get_escalation_history),
        );

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    let staleness = (ctx.config.monitor.interval * 3).max(Duration::from_secs(30));
    if ctx.hub.is_ready(staleness).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    ctx.metrics.export_hub(&ctx.hub).await;
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn list_instances(State(ctx): State<AppContext>) -> Json<Vec<String>> {
    Json(ctx.hub.list().await)
}

async fn start_instance(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> StatusCode {
    ctx.hub.start(&id).await;
    StatusCode::CREATED
}

async fn stop_instance(State(ctx): State<AppContext>, Path(id): Path<String>) -> StatusCode {
    if ctx.hub.dispose(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// One sample in an ingest batch. `pool` scopes the sample to a connection
/// pool; without it the sample targets an instance metric.
#[derive(Debug, Deserialize)]
struct SamplePayload {
    metric: String,
    value: f64,
    #[serde(with = "chrono::serde::ts_seconds")]
    ts: DateTime<Utc>,
    #[serde(default)]
    pool: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    applied: u64,
    coalesced: u64,
    dropped: u64,
}

/// Fire-and-forget batch ingest. Every sample gets a terminal outcome;
/// dropped samples (stale, unknown ids) are counted, never an error.
async fn ingest_samples(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(batch): Json<Vec<SamplePayload>>,
) -> Result<(StatusCode, Json<IngestSummary>), StatusCode> {
    if ctx.hub.get(&id).await.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let mut summary = IngestSummary::default();
    for sample in batch {
        let outcome = match &sample.pool {
            Some(pool) => {
                ctx.hub
                    .submit_pool_sample(&id, pool, &sample.metric, sample.value, sample.ts)
                    .await
            }
            None => {
                ctx.hub
                    .submit_sample(&id, &sample.metric, sample.value, sample.ts)
                    .await
            }
        };
        ctx.metrics.record_outcome(&id, outcome);
        match outcome {
            crate::presenter::SampleOutcome::Applied => summary.applied += 1,
            crate::presenter::SampleOutcome::Coalesced => summary.coalesced += 1,
            _ => summary.dropped += 1,
        }
    }

    if summary.applied + summary.coalesced > 0 {
        ctx.hub.record_feed_success(&id).await;
    }
    Ok((StatusCode::ACCEPTED, Json(summary)))
}

/// Full observed pool-name set for one discovery tick; the registry computes
/// the diff.
async fn ingest_pool_snapshot(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(observed): Json<Vec<String>>,
) -> Result<(StatusCode, Json<Vec<PoolEvent>>), StatusCode> {
    let observed: BTreeSet<String> = observed.into_iter().collect();
    match ctx.hub.submit_pool_snapshot(&id, &observed).await {
        Some(events) => {
            ctx.metrics.record_pool_events(&id, &events);
            Ok((StatusCode::ACCEPTED, Json(events)))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn get_snapshot(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<InstanceSnapshot>, StatusCode> {
    match ctx.hub.get(&id).await {
        Some(presenter) => Ok(Json(presenter.snapshot().await)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Serialize)]
struct SeriesResponse {
    metric: String,
    points: Vec<Sample>,
    downsampled: bool,
}

/// Returns the bounded history for a metric.
/// Query params:
///   ?window=5m | 15m | 1h | 6h | 24h (default: full buffer)
///   ?max_points=1000 (downsample target)
async fn get_series(
    State(ctx): State<AppContext>,
    Path((id, metric)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SeriesResponse>, StatusCode> {
    let presenter = ctx.hub.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let points = presenter
        .series(&metric)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    series_response(metric, points, &params)
}

async fn get_pool_series(
    State(ctx): State<AppContext>,
    Path((id, pool, metric)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<SeriesResponse>, StatusCode> {
    let presenter = ctx.hub.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let points = presenter
        .pool_series(&pool, &metric)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;
    series_response(metric, points, &params)
}

fn series_response(
    metric: String,
    points: Vec<Sample>,
    params: &HashMap<String, String>,
) -> Result<Json<SeriesResponse>, StatusCode> {
    let max_points: usize = params
        .get("max_points")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1000);

    let points = match params.get("window") {
        Some(window) => {
            let cutoff = cutoff_for_window(window).ok_or(StatusCode::BAD_REQUEST)?;
            points.into_iter().filter(|p| p.ts >= cutoff).collect()
        }
        None => points,
    };

    let (points, downsampled) = maybe_downsample(points, max_points);
    Ok(Json(SeriesResponse {
        metric,
        points,
        downsampled,
    }))
}

async fn get_escalations(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<EscalationState>>, StatusCode> {
    match ctx.hub.get(&id).await {
        Some(presenter) => Ok(Json(presenter.escalations().await)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn get_escalation_history(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<EscalationEvent>>, StatusCode> {
    let presenter = ctx.hub.get(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let limit: usize = params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(200);
    let mut events = presenter.escalation_log().await;
    if events.len() > limit {
        let start = events.len() - limit;
        events = events[start..].to_vec();
    }
    Ok(Json(events))
}

fn cutoff_for_window(window: &str) -> Option<DateTime<Utc>> {
    let now = Utc::now();
    match window {
        "5m" => Some(now - chrono::Duration::minutes(5)),
        "15m" => Some(now - chrono::Duration::minutes(15)),
        "1h" => Some(now - chrono::Duration::hours(1)),
        "6h" => Some(now - chrono::Duration::hours(6)),
        "24h" => Some(now - chrono::Duration::hours(24)),
        _ => None,
    }
}

/// Stride-sample a series down to roughly `max_points` entries.
pub fn maybe_downsample(points: Vec<Sample>, max_points: usize) -> (Vec<Sample>, bool) {
    if points.len() <= max_points || max_points == 0 {
        return (points, false);
    }
    let step = (points.len() as f64 / max_points as f64).ceil() as usize;
    if step <= 1 {
        return (points, false);
    }
    let mut sampled = Vec::with_capacity(max_points);
    for (idx, p) in points.into_iter().enumerate() {
        if idx % step == 0 {
            sampled.push(p);
        }
    }
    (sampled, true)
}
