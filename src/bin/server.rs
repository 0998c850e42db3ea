use std::net::SocketAddr;
use std::sync::Arc;

use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use risk_analytics_service::api::{self, AppState};
use risk_analytics_service::cache::{Cache, RiskCache};
use risk_analytics_service::config::Config;
use risk_analytics_service::metrics::PerformanceTracker;
use risk_analytics_service::pipeline::Pipeline;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    info!("starting portfolio risk analytics service");

    let config = Config::from_env().map_err(|e| {
        error!("configuration error: {e}");
        error!("copy .env.example to .env and fill in the values");
        std::io::Error::new(std::io::ErrorKind::Other, e)
    })?;

    config.validate().map_err(|e| {
        error!("configuration validation failed: {e}");
        std::io::Error::new(std::io::ErrorKind::Other, e)
    })?;

    let cache: Arc<dyn RiskCache> = Arc::new(Cache::connect(&config.redis_url).await.map_err(|e| {
        error!("failed to connect to cache: {e}");
        std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
    })?);

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("linger.ms", config.linger_ms.to_string())
        .create()
        .map_err(|e| {
            error!("failed to build message bus producer: {e}");
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?;
    let producer = Arc::new(producer);

    let tracker = Arc::new(PerformanceTracker::new());
    let config = Arc::new(config);

    let pipeline = Arc::new(
        Pipeline::new((*config).clone(), cache.clone(), tracker.clone()).map_err(|e| {
            error!("failed to build pipeline: {e}");
            std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
        })?,
    );

    let shutdown = CancellationToken::new();

    let pipeline_handle = {
        let pipeline = pipeline.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            pipeline.run(shutdown).await;
        })
    };

    let app_state = AppState {
        cache: cache.clone(),
        producer: producer.clone(),
        tracker: tracker.clone(),
        config: config.clone(),
    };
    let app = api::router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("HTTP API listening on {addr}");
    let listener = TcpListener::bind(addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    shutdown.cancel();
    let drain = tokio::time::Duration::from_secs(config.shutdown_drain_seconds);
    if tokio::time::timeout(drain, pipeline_handle).await.is_err() {
        error!("pipeline did not drain within {:?}, exiting anyway", drain);
    }

    info!("portfolio risk analytics service stopped");
    Ok(())
}
