//! 接続統計（試行・失敗カウンタと接続遅延の直近ウィンドウ）
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

pub const LATENCY_WINDOW: usize = 100;
const RECENT_AVERAGE_SAMPLES: usize = 10;
const MIN_RATE_UPTIME: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Counters {
    total_attempts: u64,
    failed_attempts: u64,
    recent_latencies_ms: VecDeque<f64>,
}

#[derive(Debug)]
pub struct StatsAggregator {
    started_at: Instant,
    counters: Mutex<Counters>,
}

/// `GET /stats` のレスポンス
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub uptime_seconds: f64,
    pub current_connections: usize,
    pub total_attempts: u64,
    pub failed_attempts: u64,
    pub success_rate: f64,
    pub avg_latency_ms_last_10: f64,
    pub connections_per_minute: f64,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    /// `started_at` を起点に稼働時間を測る
    pub fn started_at(started_at: Instant) -> Self {
        Self {
            started_at,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn record_attempt(&self) {
        self.counters.lock().total_attempts += 1;
    }

    /// 失敗を数える（`failed` が `total` を超えない）
    pub fn record_failure(&self) {
        let mut counters = self.counters.lock();
        if counters.failed_attempts < counters.total_attempts {
            counters.failed_attempts += 1;
        }
    }

    pub fn record_latency(&self, latency_ms: f64) {
        let mut counters = self.counters.lock();
        if counters.recent_latencies_ms.len() == LATENCY_WINDOW {
            counters.recent_latencies_ms.pop_front();
        }
        counters.recent_latencies_ms.push_back(latency_ms);
    }

    pub fn recent_latencies(&self) -> Vec<f64> {
        self.counters
            .lock()
            .recent_latencies_ms
            .iter()
            .copied()
            .collect()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self, current_connections: usize) -> StatsSnapshot {
        let uptime = self.uptime();
        let counters = self.counters.lock();

        let total = counters.total_attempts;
        let failed = counters.failed_attempts;
        let success_rate = (total - failed) as f64 / total.max(1) as f64 * 100.0;

        let recent: Vec<f64> = counters
            .recent_latencies_ms
            .iter()
            .rev()
            .take(RECENT_AVERAGE_SAMPLES)
            .copied()
            .collect();
        let avg_latency_ms_last_10 = if recent.is_empty() {
            0.0
        } else {
            recent.iter().sum::<f64>() / recent.len() as f64
        };

        let connections_per_minute = if uptime > MIN_RATE_UPTIME {
            total as f64 / (uptime.as_secs_f64() / 60.0)
        } else {
            0.0
        };

        StatsSnapshot {
            uptime_seconds: uptime.as_secs_f64(),
            current_connections,
            total_attempts: total,
            failed_attempts: failed,
            success_rate,
            avg_latency_ms_last_10,
            connections_per_minute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_after_two_failures_in_ten() {
        let stats = StatsAggregator::new();
        for _ in 0..10 {
            stats.record_attempt();
        }
        stats.record_failure();
        stats.record_failure();

        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.total_attempts, 10);
        assert_eq!(snapshot.failed_attempts, 2);
        assert_eq!(snapshot.success_rate, 80.0);
    }

    #[test]
    fn empty_stats_report_zero_success_rate() {
        let snapshot = StatsAggregator::new().snapshot(3);
        assert_eq!(snapshot.success_rate, 0.0);
        assert_eq!(snapshot.current_connections, 3);
        assert_eq!(snapshot.avg_latency_ms_last_10, 0.0);
    }

    #[test]
    fn latency_window_keeps_last_hundred_in_order() {
        let stats = StatsAggregator::new();
        for i in 0..105 {
            stats.record_latency(i as f64);
        }
        let latencies = stats.recent_latencies();
        assert_eq!(latencies.len(), LATENCY_WINDOW);
        let expected: Vec<f64> = (5..105).map(|i| i as f64).collect();
        assert_eq!(latencies, expected);
    }

    #[test]
    fn average_uses_last_ten_samples() {
        let stats = StatsAggregator::new();
        for _ in 0..20 {
            stats.record_latency(1000.0);
        }
        for _ in 0..10 {
            stats.record_latency(100.0);
        }
        assert_eq!(stats.snapshot(0).avg_latency_ms_last_10, 100.0);
    }

    #[test]
    fn rate_is_zero_during_first_minute() {
        let stats = StatsAggregator::new();
        stats.record_attempt();
        assert_eq!(stats.snapshot(0).connections_per_minute, 0.0);
    }

    #[test]
    fn rate_after_two_minutes() {
        let Some(start) = Instant::now().checked_sub(Duration::from_secs(120)) else {
            return;
        };
        let stats = StatsAggregator::started_at(start);
        for _ in 0..10 {
            stats.record_attempt();
        }
        let rate = stats.snapshot(0).connections_per_minute;
        assert!(rate > 4.9 && rate <= 5.0, "rate was {rate}");
    }

    #[test]
    fn failures_never_exceed_attempts() {
        let stats = StatsAggregator::new();
        stats.record_failure();
        stats.record_attempt();
        stats.record_failure();
        stats.record_failure();
        let snapshot = stats.snapshot(0);
        assert_eq!(snapshot.failed_attempts, 1);
        assert_eq!(snapshot.total_attempts, 1);
    }

    #[test]
    fn snapshot_does_not_mutate() {
        let stats = StatsAggregator::new();
        stats.record_attempt();
        stats.record_latency(12.0);
        let first = stats.snapshot(1);
        let second = stats.snapshot(1);
        assert_eq!(first.total_attempts, second.total_attempts);
        assert_eq!(stats.recent_latencies(), vec![12.0]);
    }
}
