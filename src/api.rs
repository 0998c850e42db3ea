//! HTTP/SSE surface (C6, spec.md §6).
//!
//! Grounded in
//! `examples/Carbon-Twelve-C12-quantera/backend/risk_service/src/bin/server.rs`
//! for the `AppState` + `ApiResponse<T>` envelope shape and router layout,
//! and in `examples/original_source/prospector/api/routers/*.py` for the
//! exact endpoint set and query semantics. Streaming uses
//! `axum::response::sse::Sse` rather than the teacher's raw
//! `tokio-tungstenite` websocket loop — SSE is the natural fit for a
//! one-way server push of JSON records and is the ecosystem-idiomatic
//! pairing with axum (see DESIGN.md).
//!
//! `AppState.cache` is `Arc<dyn RiskCache>` rather than `Arc<Cache>` so the
//! router can be exercised with `tower::ServiceExt::oneshot` against an
//! in-memory fake, the way
//! `examples/Carbon-Twelve-C12-quantera/tests/integration/test_wef_implementation.rs`
//! drives a `Router` in-process rather than against a live server.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::Stream;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::RiskCache;
use crate::config::Config;
use crate::error::RiskError;
use crate::metrics::PerformanceTracker;
use crate::model::{
    MetricsSummary, Portfolio, Position, PortfolioStats, PortfolioUpdate, RiskDistribution,
    RiskResult, RiskTolerance, Sector, SystemStatus,
};

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<dyn RiskCache>,
    pub producer: Arc<FutureProducer>,
    pub tracker: Arc<PerformanceTracker>,
    pub config: Arc<Config>,
}

/// Uniform success envelope, matching the teacher's
/// `ApiResponse<T> { success, data, error }` in `src/bin/server.rs`.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/risk/:portfolio_id", get(get_risk))
        .route("/portfolios/at-risk", get(at_risk_portfolios))
        .route("/advisor/:advisor_id/portfolios", get(advisor_portfolios))
        .route("/metrics/summary", get(metrics_summary))
        .route("/portfolio/update", post(update_portfolio))
        .route("/portfolio/simulate", post(simulate_portfolio))
        .route("/stream/risk-updates", get(stream_risk_updates))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    ApiResponse::success(serde_json::json!({
        "service": "portfolio-risk-analytics",
        "endpoints": [
            "/health",
            "/risk/{portfolio_id}",
            "/portfolios/at-risk",
            "/advisor/{advisor_id}/portfolios",
            "/metrics/summary",
            "/portfolio/update",
            "/portfolio/simulate",
            "/stream/risk-updates",
        ],
    }))
}

/// Reports uptime and aggregate calculation counts from `global:metrics`
/// when the cache is reachable (independent of this process's own memory,
/// so a restarted instance still reports a meaningful uptime/total), and
/// falls back to the local `PerformanceTracker` otherwise.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let cache_connected = state.cache.ping().await;
    let bus_connected = state
        .producer
        .client()
        .fetch_metadata(None, Duration::from_secs(2))
        .is_ok();

    let local_stats = state.tracker.stats();
    let global = if cache_connected {
        state.cache.global_metrics().await.ok()
    } else {
        None
    };

    let (total_calculations, avg_calculation_time_ms, uptime_seconds) = match global {
        Some(g) if g.total_calculations > 0 => {
            let avg = g.total_processing_time_ms / g.total_calculations as f64;
            let uptime = g
                .start_time
                .map(|start| (now_secs() - start).max(0.0))
                .unwrap_or(local_stats.uptime_seconds);
            (g.total_calculations, avg, uptime)
        }
        _ => (
            local_stats.messages_processed,
            local_stats.avg_latency_ms,
            local_stats.uptime_seconds,
        ),
    };

    let status = if cache_connected && bus_connected {
        "healthy"
    } else {
        "degraded"
    };

    ApiResponse::success(SystemStatus {
        status: status.to_string(),
        uptime_seconds,
        total_calculations,
        avg_calculation_time_ms,
        cache_connected,
        bus_connected,
    })
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

async fn get_risk(
    State(state): State<AppState>,
    Path(portfolio_id): Path<String>,
) -> Result<impl IntoResponse, RiskError> {
    match state.cache.get_result(&portfolio_id).await? {
        Some(result) => Ok(ApiResponse::success(result)),
        None => Err(RiskError::NotFound(portfolio_id)),
    }
}

#[derive(Deserialize)]
struct AtRiskQuery {
    #[serde(default = "default_risk_threshold")]
    risk_threshold: i32,
}

fn default_risk_threshold() -> i32 {
    70
}

async fn at_risk_portfolios(
    State(state): State<AppState>,
    Query(query): Query<AtRiskQuery>,
) -> Result<impl IntoResponse, RiskError> {
    let threshold = query.risk_threshold.clamp(1, 99);
    let results = state.cache.scan_portfolios().await?;
    let ids: Vec<String> = results
        .into_iter()
        .filter(|r| r.risk_number >= threshold)
        .map(|r| r.portfolio_id)
        .collect();
    Ok(ApiResponse::success(ids))
}

async fn advisor_portfolios(
    State(state): State<AppState>,
    Path(advisor_id): Path<String>,
) -> Result<impl IntoResponse, RiskError> {
    let results = state.cache.scan_portfolios().await?;
    let stats: Vec<PortfolioStats> = results
        .into_iter()
        .filter(|r| r.advisor_id == advisor_id)
        .map(|r| PortfolioStats {
            portfolio_id: r.portfolio_id,
            last_update: r.timestamp,
            current_risk_number: r.risk_number,
        })
        .collect();
    Ok(ApiResponse::success(stats))
}

async fn metrics_summary(State(state): State<AppState>) -> Result<impl IntoResponse, RiskError> {
    let results = state.cache.scan_portfolios().await?;
    let total_portfolios = results.len();

    if total_portfolios == 0 {
        return Ok(ApiResponse::success(MetricsSummary {
            total_portfolios: 0,
            avg_risk_number: 0.0,
            total_value_at_risk: 0.0,
            high_risk_count: 0,
            risk_distribution: RiskDistribution::default(),
        }));
    }

    let mut distribution = RiskDistribution::default();
    let mut risk_sum = 0i64;
    let mut var_sum = 0.0;
    let mut high_risk_count = 0;

    for result in &results {
        risk_sum += result.risk_number as i64;
        var_sum += result.var_95;
        if result.risk_number < 30 {
            distribution.low += 1;
        } else if result.risk_number < 70 {
            distribution.moderate += 1;
        } else {
            distribution.high += 1;
            high_risk_count += 1;
        }
    }

    Ok(ApiResponse::success(MetricsSummary {
        total_portfolios,
        avg_risk_number: risk_sum as f64 / total_portfolios as f64,
        total_value_at_risk: var_sum,
        high_risk_count,
        risk_distribution: distribution,
    }))
}

#[derive(Serialize)]
struct UpdateAccepted {
    status: &'static str,
    portfolio_id: String,
}

/// Producer-only: validates, publishes to the ingress topic keyed by
/// `portfolio.id`, and flushes. Never computes a result itself
/// (spec.md §6).
async fn update_portfolio(
    State(state): State<AppState>,
    Json(body): Json<PortfolioUpdate>,
) -> Result<impl IntoResponse, RiskError> {
    body.portfolio
        .validate()
        .map_err(|e| RiskError::Validation(e.to_string()))?;

    let payload = serde_json::to_vec(&body.portfolio)
        .map_err(|e| RiskError::Validation(format!("failed to serialize portfolio: {e}")))?;

    let record = FutureRecord::to(&state.config.ingress_topic)
        .key(&body.portfolio.id)
        .payload(&payload);

    state
        .producer
        .send(record, Duration::from_secs(5))
        .await
        .map_err(|(e, _)| RiskError::Bus(e))?;

    Ok(ApiResponse::success(UpdateAccepted {
        status: "accepted",
        portfolio_id: body.portfolio.id,
    }))
}

#[derive(Deserialize)]
struct SimulateQuery {
    portfolio_id: Option<String>,
    advisor_id: Option<String>,
    #[serde(default)]
    risk_tolerance: RiskTolerance,
}

/// Supplemented test-data endpoint, mirroring
/// `prospector/api/routers/portfolio.py::simulate_portfolio_update`: takes
/// no body, builds the canonical three-position AAPL/MSFT/JNJ sample
/// server-side, and produces it to the ingress topic exactly the way
/// `update_portfolio` does — useful for manual smoke testing of the full
/// pipeline rather than just the calculation engine in isolation.
async fn simulate_portfolio(
    State(state): State<AppState>,
    Query(query): Query<SimulateQuery>,
) -> Result<impl IntoResponse, RiskError> {
    let portfolio_id = query
        .portfolio_id
        .unwrap_or_else(|| format!("sim-{}", Uuid::new_v4()));
    let advisor_id = query.advisor_id.unwrap_or_else(|| "advisor-1".to_string());
    let portfolio = sample_s1_portfolio(portfolio_id, advisor_id, query.risk_tolerance);

    let payload = serde_json::to_vec(&portfolio)
        .map_err(|e| RiskError::Validation(format!("failed to serialize portfolio: {e}")))?;

    let record = FutureRecord::to(&state.config.ingress_topic)
        .key(&portfolio.id)
        .payload(&payload);

    state
        .producer
        .send(record, Duration::from_secs(5))
        .await
        .map_err(|(e, _)| RiskError::Bus(e))?;

    Ok(ApiResponse::success(UpdateAccepted {
        status: "accepted",
        portfolio_id: portfolio.id,
    }))
}

/// The canonical S1 sample portfolio used for smoke testing, transcribed
/// from `prospector/api/routers/portfolio.py::simulate_portfolio_update`.
fn sample_s1_portfolio(id: String, advisor_id: String, risk_tolerance: RiskTolerance) -> Portfolio {
    let client_id = format!("client-{id}");
    Portfolio {
        id,
        advisor_id,
        client_id,
        positions: vec![
            Position {
                symbol: "AAPL".into(),
                quantity: 100.0,
                price: 185.50,
                market_value: 18550.0,
                weight: 40.0,
                sector: Sector::Technology,
            },
            Position {
                symbol: "MSFT".into(),
                quantity: 50.0,
                price: 420.25,
                market_value: 21012.50,
                weight: 45.0,
                sector: Sector::Technology,
            },
            Position {
                symbol: "JNJ".into(),
                quantity: 75.0,
                price: 155.75,
                market_value: 11681.25,
                weight: 15.0,
                sector: Sector::Healthcare,
            },
        ],
        total_value: 51243.75,
        timestamp: now_secs(),
        risk_tolerance,
        account_type: Default::default(),
    }
}

#[derive(Deserialize)]
struct StreamQuery {
    portfolio_id: Option<String>,
}

/// Opens an ephemeral consumer group on the egress topic starting from
/// the latest offset and streams decoded `RiskResult`s as SSE, filtered
/// by `portfolio_id` when supplied. The consumer is dropped (and its
/// ephemeral group abandoned) when the client disconnects, since the
/// stream is owned by this request's task.
async fn stream_risk_updates(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, RiskError> {
    let group_id = format!("risk-stream-{}", Uuid::new_v4());
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &state.config.kafka_brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "false")
        .create()
        .map_err(RiskError::Bus)?;

    let mut assignment = TopicPartitionList::new();
    let metadata = consumer
        .fetch_metadata(Some(&state.config.egress_topic), Duration::from_secs(5))
        .map_err(RiskError::Bus)?;
    let topic_metadata = metadata
        .topics()
        .first()
        .ok_or_else(|| RiskError::Compute("egress topic metadata missing".into()))?;
    for partition in topic_metadata.partitions() {
        assignment
            .add_partition_offset(&state.config.egress_topic, partition.id(), Offset::End)
            .map_err(RiskError::Bus)?;
    }
    consumer.assign(&assignment).map_err(RiskError::Bus)?;

    info!("opened SSE stream consumer group {group_id} on {}", state.config.egress_topic);

    let portfolio_filter = query.portfolio_id;
    let stream = futures::stream::unfold(
        (consumer, portfolio_filter, group_id),
        |(consumer, filter, group_id)| async move {
            loop {
                match consumer.recv().await {
                    Ok(message) => {
                        let Some(payload) = message.payload() else { continue };
                        let result: RiskResult = match serde_json::from_slice(payload) {
                            Ok(r) => r,
                            Err(e) => {
                                warn!("SSE stream decode failure: {e}");
                                continue;
                            }
                        };
                        if let Some(wanted) = &filter {
                            if &result.portfolio_id != wanted {
                                continue;
                            }
                        }
                        let json = match serde_json::to_string(&result) {
                            Ok(j) => j,
                            Err(_) => continue,
                        };
                        return Some((Ok(Event::default().data(json)), (consumer, filter, group_id)));
                    }
                    Err(e) => {
                        warn!("SSE stream consumer group {group_id} error: {e}");
                        return None;
                    }
                }
            }
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
