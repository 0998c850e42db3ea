//! Cache writer (C3, spec.md §4.3) — Redis-backed, grounded in
//! `examples/Carbon-Twelve-C12-quantera/backend/risk_service/src/lib.rs`
//! (`cache_risk_metrics`) for the pipelined write shape, and in
//! `examples/original_source/prospector/core/risk_processor.py`
//! (`_cache_results`) for the exact hash schema and TTL semantics.
//!
//! `redis::aio::ConnectionManager` is cheaply `Clone`-able and safe to use
//! concurrently without any external lock (that's the whole point of it in
//! redis-rs), so the manager is stored and cloned directly rather than
//! guarded behind a `RwLock` — spec.md §5 calls for a connection pool with
//! concurrent readers/writers, not one serialized at a time.
//!
//! Cache access goes through the [`RiskCache`] trait (grounded in
//! `examples/jeremycod-rustfolio/backend/src/external/price_provider.rs`'s
//! `#[async_trait] trait PriceProvider` + `dyn PriceProvider` pattern) so
//! HTTP-level tests can swap in an in-memory fake instead of a live Redis
//! connection.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::RiskError;
use crate::model::RiskResult;

/// TTL applied (and reset) on every write to a `portfolio:{id}` key.
pub const CACHE_TTL_SECONDS: i64 = 300;

#[derive(Debug, Default, Clone)]
pub struct GlobalMetrics {
    pub total_calculations: u64,
    pub total_processing_time_ms: f64,
    pub start_time: Option<f64>,
}

/// Cache operations needed by the pipeline and the HTTP API. Implemented by
/// [`Cache`] against live Redis; tests implement it against an in-memory map.
#[async_trait]
pub trait RiskCache: Send + Sync {
    async fn write_result(&self, result: &RiskResult) -> Result<(), RiskError>;
    async fn get_result(&self, portfolio_id: &str) -> Result<Option<RiskResult>, RiskError>;
    async fn scan_portfolios(&self) -> Result<Vec<RiskResult>, RiskError>;
    async fn global_metrics(&self) -> Result<GlobalMetrics, RiskError>;
    async fn ping(&self) -> bool;
}

pub struct Cache {
    conn: ConnectionManager,
}

impl Cache {
    pub async fn connect(redis_url: &str) -> Result<Self, RiskError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl RiskCache for Cache {
    /// Write a `RiskResult` under `portfolio:{id}` and bump the global
    /// aggregate counters, as a single pipelined round-trip so readers
    /// never observe a partially populated key (spec.md §4.3). Replaying
    /// the same portfolio leaves exactly one key behind — every field is
    /// an overwrite, not an append (spec.md §8 property 6).
    ///
    /// Per spec.md's failure policy, callers should log and continue on
    /// `Err` rather than abort the pipeline.
    async fn write_result(&self, result: &RiskResult) -> Result<(), RiskError> {
        let key = format!("portfolio:{}", result.portfolio_id);
        let mut conn = self.conn.clone();

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset(&key, "portfolio_id", &result.portfolio_id)
            .hset(&key, "advisor_id", &result.advisor_id)
            .hset(&key, "risk_number", result.risk_number)
            .hset(&key, "var_95", result.var_95)
            .hset(&key, "expected_return", result.expected_return)
            .hset(&key, "volatility", result.volatility)
            .hset(&key, "sharpe_ratio", result.sharpe_ratio)
            .hset(&key, "downside_percentage", result.downside_percentage)
            .hset(&key, "portfolio_beta", result.portfolio_beta)
            .hset(&key, "downside_capture", result.downside_capture)
            .hset(&key, "calculation_time_ms", result.calculation_time_ms)
            .hset(&key, "timestamp", result.timestamp)
            .hset(&key, "methodology", "advanced_behavioral")
            .expire(&key, CACHE_TTL_SECONDS)
            .hincr("global:metrics", "total_calculations", 1)
            .hincr(
                "global:metrics",
                "total_processing_time_ms",
                result.calculation_time_ms,
            )
            .hset("global:metrics", "last_calculation", result.timestamp)
            .hset_nx("global:metrics", "start_time", result.timestamp);

        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    /// `GET /risk/{portfolio_id}` support: fetch one cached record.
    async fn get_result(&self, portfolio_id: &str) -> Result<Option<RiskResult>, RiskError> {
        let key = format!("portfolio:{portfolio_id}");
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall(&key).await?;
        if map.is_empty() {
            return Ok(None);
        }
        Ok(Some(parse_result(&map)?))
    }

    /// Non-blocking cursor scan over `portfolio:*`, used by the at-risk,
    /// advisor-filter, and metrics-summary endpoints (spec.md §4.6).
    /// Tolerates keys expiring mid-scan by skipping ones that vanish.
    async fn scan_portfolios(&self) -> Result<Vec<RiskResult>, RiskError> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut results = Vec::new();

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg("portfolio:*")
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await?;

            for key in keys {
                let map: HashMap<String, String> = conn.hgetall(&key).await?;
                if map.is_empty() {
                    // Expired between SCAN and HGETALL — skip it.
                    continue;
                }
                match parse_result(&map) {
                    Ok(result) => results.push(result),
                    Err(e) => warn!("skipping malformed cache record {key}: {e}"),
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }

        Ok(results)
    }

    /// Read back the `global:metrics` hash, used by `/health` to report
    /// restart-independent uptime and aggregate calculation counts.
    async fn global_metrics(&self) -> Result<GlobalMetrics, RiskError> {
        let mut conn = self.conn.clone();
        let map: HashMap<String, String> = conn.hgetall("global:metrics").await?;
        Ok(GlobalMetrics {
            total_calculations: map
                .get("total_calculations")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            total_processing_time_ms: map
                .get("total_processing_time_ms")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.0),
            start_time: map.get("start_time").and_then(|v| v.parse().ok()),
        })
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

fn parse_result(map: &HashMap<String, String>) -> Result<RiskResult, RiskError> {
    let field = |name: &str| -> Result<&String, RiskError> {
        map.get(name)
            .ok_or_else(|| RiskError::Decode(format!("cache record missing field {name}")))
    };
    let parse_f64 = |name: &str| -> Result<f64, RiskError> {
        field(name)?
            .parse::<f64>()
            .map_err(|e| RiskError::Decode(format!("field {name}: {e}")))
    };

    Ok(RiskResult {
        portfolio_id: field("portfolio_id")?.clone(),
        advisor_id: field("advisor_id")?.clone(),
        risk_number: field("risk_number")?
            .parse()
            .map_err(|e| RiskError::Decode(format!("risk_number: {e}")))?,
        var_95: parse_f64("var_95")?,
        expected_return: parse_f64("expected_return")?,
        volatility: parse_f64("volatility")?,
        sharpe_ratio: parse_f64("sharpe_ratio")?,
        downside_percentage: parse_f64("downside_percentage")?,
        portfolio_beta: parse_f64("portfolio_beta")?,
        downside_capture: parse_f64("downside_capture")?,
        calculation_time_ms: parse_f64("calculation_time_ms")?,
        timestamp: parse_f64("timestamp")?,
    })
}

/// In-memory stand-in for [`Cache`], reused by `api.rs`'s router tests so
/// neither needs a live Redis connection.
#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub(crate) struct FakeCache {
        records: Mutex<HashMap<String, RiskResult>>,
        total_calculations: Mutex<u64>,
    }

    impl FakeCache {
        pub(crate) fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl RiskCache for FakeCache {
        async fn write_result(&self, result: &RiskResult) -> Result<(), RiskError> {
            self.records
                .lock()
                .unwrap()
                .insert(result.portfolio_id.clone(), result.clone());
            *self.total_calculations.lock().unwrap() += 1;
            Ok(())
        }

        async fn get_result(&self, portfolio_id: &str) -> Result<Option<RiskResult>, RiskError> {
            Ok(self.records.lock().unwrap().get(portfolio_id).cloned())
        }

        async fn scan_portfolios(&self) -> Result<Vec<RiskResult>, RiskError> {
            Ok(self.records.lock().unwrap().values().cloned().collect())
        }

        async fn global_metrics(&self) -> Result<GlobalMetrics, RiskError> {
            Ok(GlobalMetrics {
                total_calculations: *self.total_calculations.lock().unwrap(),
                total_processing_time_ms: 0.0,
                start_time: Some(0.0),
            })
        }

        async fn ping(&self) -> bool {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::FakeCache;
    use super::*;

    fn sample(portfolio_id: &str, timestamp: f64) -> RiskResult {
        RiskResult {
            portfolio_id: portfolio_id.into(),
            advisor_id: "adv1".into(),
            risk_number: 55,
            var_95: 1234.5,
            expected_return: 0.1,
            volatility: 0.18,
            sharpe_ratio: 0.4,
            downside_percentage: -12.0,
            portfolio_beta: 1.05,
            downside_capture: 105.0,
            calculation_time_ms: 2.5,
            timestamp,
        }
    }

    #[test]
    fn parse_result_round_trips_written_fields() {
        let result = sample("p1", 100.0);
        let mut map = HashMap::new();
        map.insert("portfolio_id".into(), result.portfolio_id.clone());
        map.insert("advisor_id".into(), result.advisor_id.clone());
        map.insert("risk_number".into(), result.risk_number.to_string());
        map.insert("var_95".into(), result.var_95.to_string());
        map.insert("expected_return".into(), result.expected_return.to_string());
        map.insert("volatility".into(), result.volatility.to_string());
        map.insert("sharpe_ratio".into(), result.sharpe_ratio.to_string());
        map.insert(
            "downside_percentage".into(),
            result.downside_percentage.to_string(),
        );
        map.insert("portfolio_beta".into(), result.portfolio_beta.to_string());
        map.insert("downside_capture".into(), result.downside_capture.to_string());
        map.insert(
            "calculation_time_ms".into(),
            result.calculation_time_ms.to_string(),
        );
        map.insert("timestamp".into(), result.timestamp.to_string());

        let parsed = parse_result(&map).unwrap();
        assert_eq!(parsed.portfolio_id, result.portfolio_id);
        assert_eq!(parsed.risk_number, result.risk_number);
        assert!((parsed.var_95 - result.var_95).abs() < 1e-9);
    }

    #[test]
    fn parse_result_reports_missing_field() {
        let map = HashMap::new();
        assert!(parse_result(&map).is_err());
    }

    #[tokio::test]
    async fn replay_is_idempotent_on_cache_state() {
        // spec.md §8 property 6: replaying the same portfolio leaves
        // exactly one cached record, with the latest write's fields.
        let cache = FakeCache::new();
        cache.write_result(&sample("p1", 1.0)).await.unwrap();
        cache.write_result(&sample("p1", 2.0)).await.unwrap();
        cache.write_result(&sample("p1", 3.0)).await.unwrap();

        let all = cache.scan_portfolios().await.unwrap();
        assert_eq!(all.len(), 1);

        let latest = cache.get_result("p1").await.unwrap().unwrap();
        assert_eq!(latest.timestamp, 3.0);

        let metrics = cache.global_metrics().await.unwrap();
        assert_eq!(metrics.total_calculations, 3);
    }

    #[tokio::test]
    async fn distinct_portfolios_accumulate_separately() {
        let cache = FakeCache::new();
        cache.write_result(&sample("p1", 1.0)).await.unwrap();
        cache.write_result(&sample("p2", 1.0)).await.unwrap();

        let all = cache.scan_portfolios().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(cache.get_result("p3").await.unwrap().is_none());
    }
}
