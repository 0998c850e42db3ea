//! Configuration (ambient stack), following
//! `examples/Carbon-Twelve-C12-quantera/backend/risk_service/src/config.rs`:
//! a `Config::from_env()` + `Config::validate()` pair, `.env` loaded via
//! `dotenv`, required variables failing fast with a descriptive message
//! and optional ones defaulting.

use std::env;

use tracing::info;

#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub kafka_brokers: String,
    pub ingress_topic: String,
    pub egress_topic: String,
    pub partitions: u32,
    pub batch_size: u32,
    pub linger_ms: u32,
    pub flush_every: u64,
    pub consumer_group: String,
    pub performance_log_interval: u64,
    pub http_port: u16,
    pub shutdown_drain_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        // Try to load .env file if it exists.
        dotenv::dotenv().ok();

        let redis_url = env::var("REDIS_URL")
            .map_err(|_| "REDIS_URL not set. Example: redis://localhost:6379")?;
        let kafka_brokers = env::var("KAFKA_BROKERS")
            .map_err(|_| "KAFKA_BROKERS not set. Example: localhost:9092")?;

        let ingress_topic =
            env::var("INGRESS_TOPIC").unwrap_or_else(|_| "portfolio-updates-v2".to_string());
        let egress_topic = env::var("EGRESS_TOPIC").unwrap_or_else(|_| "risk-updates".to_string());
        let consumer_group =
            env::var("CONSUMER_GROUP").unwrap_or_else(|_| "risk-pipeline".to_string());

        let partitions = parse_env_or("PARTITIONS", 12)?;
        let batch_size = parse_env_or("BATCH_SIZE", 1000)?;
        let linger_ms = parse_env_or("LINGER_MS", 10)?;
        let flush_every = parse_env_or("FLUSH_EVERY", 1000)?;
        let performance_log_interval = parse_env_or("PERFORMANCE_LOG_INTERVAL", 100)?;
        let http_port = parse_env_or("HTTP_PORT", 8001)?;
        let shutdown_drain_seconds = parse_env_or("SHUTDOWN_DRAIN_SECONDS", 10)?;

        let config = Config {
            redis_url,
            kafka_brokers,
            ingress_topic,
            egress_topic,
            partitions,
            batch_size,
            linger_ms,
            flush_every,
            consumer_group,
            performance_log_interval,
            http_port,
            shutdown_drain_seconds,
        };

        info!("configuration loaded successfully");
        info!("HTTP API will listen on port {}", config.http_port);
        info!("Kafka brokers: {}", config.kafka_brokers);
        info!(
            "ingress topic {} ({} partitions) -> egress topic {}",
            config.ingress_topic, config.partitions, config.egress_topic
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.redis_url.starts_with("redis://") {
            return Err("REDIS_URL must start with redis://".to_string());
        }
        if self.kafka_brokers.trim().is_empty() {
            return Err("KAFKA_BROKERS must not be empty".to_string());
        }
        if self.partitions == 0 {
            return Err("PARTITIONS must be >= 1".to_string());
        }
        if self.batch_size == 0 {
            return Err("BATCH_SIZE must be >= 1".to_string());
        }
        Ok(())
    }
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, String> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| format!("{key} must be a valid value")),
        Err(_) => Ok(default),
    }
}
