//! Connector Metrics Collector

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

use crate::Result;

/// Point-in-time totals across all route kinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectorStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub hook_panics: u64,
}

/// Counts connection attempts per route kind (`direct`, `socks5`, `http`)
pub struct ConnectorMetrics {
    prometheus_registry: Registry,

    connect_attempts_total: IntCounterVec,
    connect_failures_total: IntCounterVec,
    connect_duration: HistogramVec,

    attempts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    hook_panics: AtomicU64,
}

impl ConnectorMetrics {
    /// Create a collector with its own prometheus registry
    pub fn new() -> Result<Self> {
        let prometheus_registry = Registry::new();

        let connect_attempts_total = IntCounterVec::new(
            Opts::new(
                "proxyscope_connect_attempts_total",
                "Outbound connection attempts by route kind",
            ),
            &["route"],
        )?;

        let connect_failures_total = IntCounterVec::new(
            Opts::new(
                "proxyscope_connect_failures_total",
                "Failed outbound connection attempts by route kind",
            ),
            &["route"],
        )?;

        let connect_duration = HistogramVec::new(
            HistogramOpts::new(
                "proxyscope_connect_duration_seconds",
                "Time to establish an outbound connection, including proxy negotiation",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
            &["route"],
        )?;

        prometheus_registry.register(Box::new(connect_attempts_total.clone()))?;
        prometheus_registry.register(Box::new(connect_failures_total.clone()))?;
        prometheus_registry.register(Box::new(connect_duration.clone()))?;

        Ok(Self {
            prometheus_registry,
            connect_attempts_total,
            connect_failures_total,
            connect_duration,
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            hook_panics: AtomicU64::new(0),
        })
    }

    pub(crate) fn record_attempt(&self, route: &str) {
        self.connect_attempts_total.with_label_values(&[route]).inc();
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, route: &str, elapsed: Duration) {
        self.connect_duration
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, route: &str, elapsed: Duration) {
        self.connect_failures_total.with_label_values(&[route]).inc();
        self.connect_duration
            .with_label_values(&[route])
            .observe(elapsed.as_secs_f64());
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hook_panic(&self) {
        self.hook_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Totals since creation
    pub fn snapshot(&self) -> ConnectorStats {
        ConnectorStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            hook_panics: self.hook_panics.load(Ordering::Relaxed),
        }
    }

    /// Attempts recorded for one route kind
    pub fn attempts_for(&self, route: &str) -> u64 {
        self.connect_attempts_total.with_label_values(&[route]).get()
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.prometheus_registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode Prometheus metrics");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_route() {
        let metrics = ConnectorMetrics::new().unwrap();

        metrics.record_attempt("socks5");
        metrics.record_success("socks5", Duration::from_millis(12));
        metrics.record_attempt("direct");
        metrics.record_failure("direct", Duration::from_millis(3));

        assert_eq!(metrics.attempts_for("socks5"), 1);
        assert_eq!(metrics.attempts_for("direct"), 1);
        assert_eq!(metrics.attempts_for("http"), 0);
        assert_eq!(
            metrics.snapshot(),
            ConnectorStats { attempts: 2, successes: 1, failures: 1, hook_panics: 0 }
        );
    }

    #[test]
    fn test_render_contains_metric_names() {
        let metrics = ConnectorMetrics::new().unwrap();
        metrics.record_attempt("http");
        metrics.record_failure("http", Duration::from_millis(1));

        let text = metrics.render();
        assert!(text.contains("proxyscope_connect_attempts_total{route=\"http\"} 1"));
        assert!(text.contains("proxyscope_connect_failures_total"));
        assert!(text.contains("proxyscope_connect_duration_seconds_bucket"));
    }
}
