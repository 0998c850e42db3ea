//! Performance tracker (C5, spec.md §4.5).
//!
//! Grounded in
//! `examples/original_source/prospector/utils/performance.py`
//! (`PerformanceTracker`): same fields, same four operations. A blocking
//! `std::sync::Mutex` guards the whole state, matching the teacher's use
//! of `tokio::sync::RwLock` to guard `websocket_clients` — here a
//! synchronous mutex is the right tool since every critical section is
//! O(1) arithmetic, never an `.await`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use tracing::info;

const ROLLING_WINDOW: usize = 1000;

struct Inner {
    messages_processed: u64,
    total_processing_time_ms: f64,
    recent_latencies: VecDeque<f64>,
    start_time: Instant,
}

pub struct PerformanceTracker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Clone, Copy)]
pub struct Stats {
    pub messages_processed: u64,
    pub throughput_per_second: f64,
    pub avg_latency_ms: f64,
    pub recent_avg_latency_ms: f64,
    pub uptime_seconds: f64,
}

impl Default for PerformanceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages_processed: 0,
                total_processing_time_ms: 0.0,
                recent_latencies: VecDeque::with_capacity(ROLLING_WINDOW),
                start_time: Instant::now(),
            }),
        }
    }

    pub fn record(&self, latency_ms: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages_processed += 1;
        inner.total_processing_time_ms += latency_ms;
        if inner.recent_latencies.len() == ROLLING_WINDOW {
            inner.recent_latencies.pop_front();
        }
        inner.recent_latencies.push_back(latency_ms);
    }

    pub fn stats(&self) -> Stats {
        let inner = self.inner.lock().unwrap();
        let elapsed = inner.start_time.elapsed().as_secs_f64();

        if elapsed <= 0.0 || inner.messages_processed == 0 {
            return Stats {
                messages_processed: inner.messages_processed,
                throughput_per_second: 0.0,
                avg_latency_ms: 0.0,
                recent_avg_latency_ms: 0.0,
                uptime_seconds: elapsed,
            };
        }

        let throughput = inner.messages_processed as f64 / elapsed;
        let avg_latency = inner.total_processing_time_ms / inner.messages_processed as f64;
        let recent_avg = if inner.recent_latencies.is_empty() {
            0.0
        } else {
            inner.recent_latencies.iter().sum::<f64>() / inner.recent_latencies.len() as f64
        };

        Stats {
            messages_processed: inner.messages_processed,
            throughput_per_second: throughput,
            avg_latency_ms: avg_latency,
            recent_avg_latency_ms: recent_avg,
            uptime_seconds: elapsed,
        }
    }

    /// Emit one log line every `interval` processed messages.
    pub fn log_if(&self, interval: u64) {
        let processed = self.inner.lock().unwrap().messages_processed;
        if interval > 0 && processed > 0 && processed % interval == 0 {
            let stats = self.stats();
            info!(
                "performance: processed {} messages | throughput {:.2} msg/s | recent avg latency {:.2}ms",
                stats.messages_processed, stats.throughput_per_second, stats.recent_avg_latency_ms
            );
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.messages_processed = 0;
        inner.total_processing_time_ms = 0.0;
        inner.recent_latencies.clear();
        inner.start_time = Instant::now();
    }
}
