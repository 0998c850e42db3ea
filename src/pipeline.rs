//! Stream pipeline (C4, spec.md §4.4).
//!
//! Topology: `ingress(portfolio-updates-v2) -> decode -> compute ->
//! {cache write, egress(risk-updates)}`, one partition-affine Tokio task
//! per partition, no shared portfolio state between workers. Grounded in
//! `examples/original_source/prospector/streaming/pipeline.py` for the
//! decode/filter/compute/serialize stage order, realized with `rdkafka`
//! (the idiomatic Rust Kafka client — no example repo in the retrieval
//! pack depends on a message-bus crate, so this one is new; see
//! `DESIGN.md`). Partition assignment is manual (`assign`, not
//! `subscribe`) so each worker owns exactly one partition end to end,
//! matching the teacher's one-task-per-connection shape in
//! `examples/Carbon-Twelve-C12-quantera/backend/risk_service/src/websocket.rs`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::calculations;
use crate::cache::RiskCache;
use crate::config::Config;
use crate::error::RiskError;
use crate::metrics::PerformanceTracker;
use crate::model::Portfolio;

const POLL_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub decoded: AtomicU64,
    pub decode_failures: AtomicU64,
    pub validation_failures: AtomicU64,
    pub compute_failures: AtomicU64,
    pub cache_failures: AtomicU64,
    pub produced: AtomicU64,
}

pub struct Pipeline {
    config: Config,
    cache: Arc<dyn RiskCache>,
    tracker: Arc<PerformanceTracker>,
    producer: FutureProducer,
    pub counters: PipelineCounters,
}

impl Pipeline {
    pub fn new(
        config: Config,
        cache: Arc<dyn RiskCache>,
        tracker: Arc<PerformanceTracker>,
    ) -> Result<Self, RiskError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("linger.ms", config.linger_ms.to_string())
            .set("queue.buffering.max.messages", "200000")
            .create()
            .map_err(RiskError::Bus)?;

        Ok(Self {
            config,
            cache,
            tracker,
            producer,
            counters: PipelineCounters::default(),
        })
    }

    /// Spawn one worker task per partition and run until `shutdown` fires.
    /// Returns once every worker has drained and the producer has flushed.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut handles = Vec::with_capacity(self.config.partitions as usize);

        for partition in 0..self.config.partitions {
            let worker = self.clone();
            let token = shutdown.clone();
            handles.push(tokio::spawn(async move {
                worker.run_partition_worker(partition as i32, token).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("partition worker task panicked: {e}");
            }
        }

        let drain = Duration::from_secs(self.config.shutdown_drain_seconds);
        if let Err((e, _)) = self.producer.flush(drain) {
            error!("producer flush on shutdown failed: {e}");
        }
    }

    async fn run_partition_worker(&self, partition: i32, shutdown: CancellationToken) {
        let consumer: StreamConsumer = match ClientConfig::new()
            .set("bootstrap.servers", &self.config.kafka_brokers)
            .set("group.id", &self.config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("fetch.message.max.bytes", (self.config.batch_size * 2048).to_string())
            .create()
        {
            Ok(c) => c,
            Err(e) => {
                error!("partition {partition} failed to build consumer: {e}");
                return;
            }
        };

        let mut assignment = TopicPartitionList::new();
        if let Err(e) =
            assignment.add_partition_offset(&self.config.ingress_topic, partition, Offset::Stored)
        {
            error!("partition {partition} invalid offset spec: {e}");
            return;
        }
        if let Err(e) = consumer.assign(&assignment) {
            error!("partition {partition} failed to assign: {e}");
            return;
        }

        info!(
            "worker for partition {partition} of {} started",
            self.config.ingress_topic
        );

        let mut since_flush: u64 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let received = tokio::time::timeout(POLL_TIMEOUT, consumer.recv()).await;
            let message = match received {
                Err(_elapsed) => continue, // poll timeout, re-check shutdown
                Ok(Err(e)) => {
                    warn!("partition {partition} poll error: {e}");
                    continue;
                }
                Ok(Ok(message)) => message,
            };

            self.process_message(&message, partition).await;

            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                warn!("partition {partition} commit failed: {e}");
            }

            since_flush += 1;
            if since_flush >= self.config.flush_every {
                if let Err((e, _)) = self.producer.flush(Duration::from_secs(5)) {
                    warn!("partition {partition} periodic flush failed: {e}");
                }
                since_flush = 0;
            }
        }

        info!("worker for partition {partition} shutting down");
    }

    /// Decode, compute, produce and cache one ingress record. Never
    /// returns an error to the caller — failures are counted and logged
    /// per spec.md §4.4/§7, and the offset is still advanced by the
    /// caller after this returns.
    async fn process_message(&self, message: &rdkafka::message::BorrowedMessage<'_>, partition: i32) {
        let payload = match message.payload() {
            Some(p) => p,
            None => {
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let portfolio = match decode_portfolio(payload) {
            Ok(p) => p,
            Err(DecodeError::Malformed(e)) => {
                warn!("partition {partition} decode failure: {e}");
                self.counters.decode_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(DecodeError::Invalid(id, e)) => {
                warn!("partition {partition} validation failure for {id}: {e}");
                self.counters.validation_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        self.counters.decoded.fetch_add(1, Ordering::Relaxed);

        let result = match calculations::compute(&portfolio) {
            Ok(r) => r,
            Err(e) => {
                warn!("partition {partition} compute failure for {}: {e}", portfolio.id);
                self.counters.compute_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let payload = match serde_json::to_vec(&result) {
            Ok(p) => p,
            Err(e) => {
                error!("failed to serialize risk result for {}: {e}", result.portfolio_id);
                return;
            }
        };

        let record = FutureRecord::to(&self.config.egress_topic)
            .key(&result.portfolio_id)
            .payload(&payload)
            .partition(partition);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => self.counters.produced.fetch_add(1, Ordering::Relaxed),
            Err((e, _)) => {
                error!("egress produce failed for {}: {e}", result.portfolio_id);
                return;
            }
        };

        if let Err(e) = self.cache.write_result(&result).await {
            warn!("cache write failed for {}: {e}", result.portfolio_id);
            self.counters.cache_failures.fetch_add(1, Ordering::Relaxed);
        }

        self.tracker.record(result.calculation_time_ms);
        self.tracker.log_if(self.config.performance_log_interval);
    }
}

enum DecodeError {
    Malformed(serde_json::Error),
    Invalid(String, RiskError),
}

/// Decode and validate one ingress payload, pulled out of
/// [`Pipeline::process_message`] as a pure function so the decode/validate
/// stage can be exercised without a live Kafka message (`BorrowedMessage`
/// can only be constructed from a real librdkafka response).
fn decode_portfolio(payload: &[u8]) -> Result<Portfolio, DecodeError> {
    let portfolio: Portfolio =
        serde_json::from_slice(payload).map_err(DecodeError::Malformed)?;
    portfolio
        .validate()
        .map_err(|e| DecodeError::Invalid(portfolio.id.clone(), RiskError::Validation(e.to_string())))?;
    Ok(portfolio)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::fakes::FakeCache;
    use crate::model::{AccountType, Position, RiskTolerance, Sector};

    fn portfolio(id: &str, timestamp: f64) -> Portfolio {
        Portfolio {
            id: id.into(),
            advisor_id: "adv1".into(),
            client_id: format!("client-{id}"),
            positions: vec![Position {
                symbol: "AAPL".into(),
                quantity: 10.0,
                price: 100.0,
                market_value: 1000.0,
                weight: 100.0,
                sector: Sector::Technology,
            }],
            total_value: 1000.0,
            timestamp,
            risk_tolerance: RiskTolerance::Moderate,
            account_type: AccountType::Individual,
        }
    }

    fn test_config() -> Config {
        Config {
            redis_url: "redis://127.0.0.1:6379".into(),
            kafka_brokers: "127.0.0.1:1".into(),
            ingress_topic: "portfolio-updates-v2".into(),
            egress_topic: "risk-updates".into(),
            partitions: 2,
            batch_size: 100,
            linger_ms: 10,
            flush_every: 100,
            consumer_group: "risk-pipeline-test".into(),
            performance_log_interval: 100,
            http_port: 0,
            shutdown_drain_seconds: 1,
        }
    }

    #[test]
    fn pipeline_builds_without_dialing_a_broker() {
        let cache: Arc<dyn RiskCache> = Arc::new(FakeCache::new());
        let tracker = Arc::new(PerformanceTracker::new());
        let pipeline = Pipeline::new(test_config(), cache, tracker).unwrap();
        assert_eq!(pipeline.counters.decoded.load(Ordering::Relaxed), 0);
        assert_eq!(pipeline.counters.produced.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn decode_portfolio_rejects_malformed_json() {
        assert!(matches!(
            decode_portfolio(b"not json"),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn decode_portfolio_rejects_invalid_portfolio() {
        let mut bad = portfolio("p1", 1.0);
        bad.positions.clear();
        let payload = serde_json::to_vec(&bad).unwrap();
        assert!(matches!(
            decode_portfolio(&payload),
            Err(DecodeError::Invalid(id, _)) if id == "p1"
        ));
    }

    #[test]
    fn decode_preserves_per_portfolio_snapshot_order() {
        // spec.md §8 property 7: per-portfolio FIFO ordering. The decode
        // stage is pure, so feeding snapshots in ingress order must yield
        // decoded portfolios in the same order downstream.
        let snapshots: Vec<Portfolio> = (1..=3).map(|i| portfolio("p1", i as f64)).collect();
        let payloads: Vec<Vec<u8>> = snapshots
            .iter()
            .map(|p| serde_json::to_vec(p).unwrap())
            .collect();

        let decoded: Vec<Portfolio> = payloads
            .iter()
            .map(|payload| decode_portfolio(payload).ok().unwrap())
            .collect();

        let timestamps: Vec<f64> = decoded.iter().map(|p| p.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0]);
        assert!(decoded.iter().all(|p| p.id == "p1"));
    }
}
