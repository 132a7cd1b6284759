//! Metrics collection for courier.
//!
//! Counters for the outbox, ingestion, and archival paths. Operators read them
//! through the `/metrics` endpoint; per-domain failure state lives in the peer
//! health store instead.

use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Initialize global metrics with custom instance.
pub fn init_metrics(metrics: Arc<Metrics>) -> Result<(), Arc<Metrics>> {
    METRICS.set(metrics)
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Production ===
    /// Outbox events created.
    pub events_produced: AtomicU64,

    // === Ingestion ===
    /// Inbound events accepted.
    pub events_ingested: AtomicU64,
    /// Inbound events that were already known.
    pub events_duplicate: AtomicU64,

    // === Delivery attempts (per target) ===
    /// Targets that acknowledged an event.
    pub deliveries_succeeded: AtomicU64,
    /// Attempts that failed transiently (including timeouts).
    pub deliveries_failed: AtomicU64,
    /// Attempts skipped because the peer is unreachable.
    pub deliveries_skipped: AtomicU64,
    /// Targets removed after a permanent rejection.
    pub deliveries_rejected: AtomicU64,
    /// Total attempt time in microseconds.
    pub delivery_time_us_total: AtomicU64,

    // === Outbox rows ===
    /// Rows leased by dispatch workers.
    pub leases_acquired: AtomicU64,
    /// Rows that reached `delivered`.
    pub rows_delivered: AtomicU64,
    /// Rows that reached `failed`.
    pub rows_failed: AtomicU64,
    /// Leases that expired before the worker could finish.
    pub leases_lost: AtomicU64,

    // === Archival ===
    /// Outbox rows moved into the archive.
    pub outbox_archived: AtomicU64,
    /// Inbound events moved into the archive.
    pub inbound_archived: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            events_produced: AtomicU64::new(0),
            events_ingested: AtomicU64::new(0),
            events_duplicate: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_failed: AtomicU64::new(0),
            deliveries_skipped: AtomicU64::new(0),
            deliveries_rejected: AtomicU64::new(0),
            delivery_time_us_total: AtomicU64::new(0),
            leases_acquired: AtomicU64::new(0),
            rows_delivered: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            leases_lost: AtomicU64::new(0),
            outbox_archived: AtomicU64::new(0),
            inbound_archived: AtomicU64::new(0),
        }
    }

    /// Record a newly produced outbox event.
    pub fn record_produced(&self) {
        self.events_produced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an ingestion result.
    pub fn record_ingested(&self, duplicate: bool) {
        if duplicate {
            self.events_duplicate.fetch_add(1, Ordering::Relaxed);
        } else {
            self.events_ingested.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one attempt against one target.
    pub fn record_attempt(&self, success: bool, duration: Duration) {
        if success {
            self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.delivery_time_us_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a target skipped for this cycle.
    pub fn record_skipped(&self) {
        self.deliveries_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a target removed after a permanent rejection.
    pub fn record_rejected(&self) {
        self.deliveries_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record rows leased by one scan.
    pub fn record_leased(&self, count: usize) {
        self.leases_acquired
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a row reaching a terminal state.
    pub fn record_terminal(&self, delivered: bool) {
        if delivered {
            self.rows_delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rows_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a cycle whose lease expired before it finished.
    pub fn record_lease_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an archival run.
    pub fn record_archived(&self, outbox: u64, inbound: u64) {
        self.outbox_archived.fetch_add(outbox, Ordering::Relaxed);
        self.inbound_archived.fetch_add(inbound, Ordering::Relaxed);
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_produced: self.events_produced.load(Ordering::Relaxed),
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            deliveries_skipped: self.deliveries_skipped.load(Ordering::Relaxed),
            deliveries_rejected: self.deliveries_rejected.load(Ordering::Relaxed),
            delivery_avg_time_us: self.average_delivery_time_us(),
            leases_acquired: self.leases_acquired.load(Ordering::Relaxed),
            rows_delivered: self.rows_delivered.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
            outbox_archived: self.outbox_archived.load(Ordering::Relaxed),
            inbound_archived: self.inbound_archived.load(Ordering::Relaxed),
        }
    }

    /// Calculate average attempt time.
    fn average_delivery_time_us(&self) -> u64 {
        let total = self.delivery_time_us_total.load(Ordering::Relaxed);
        let count = self.deliveries_succeeded.load(Ordering::Relaxed)
            + self.deliveries_failed.load(Ordering::Relaxed);
        if count > 0 { total / count } else { 0 }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        write_metric(
            &mut output,
            "courier_events_produced_total",
            "counter",
            "Outbox events produced",
            s.events_produced,
        );
        write_metric(
            &mut output,
            "courier_events_ingested_total",
            "counter",
            "Inbound events accepted",
            s.events_ingested,
        );
        write_metric(
            &mut output,
            "courier_events_duplicate_total",
            "counter",
            "Inbound events already known",
            s.events_duplicate,
        );

        output.push_str("# HELP courier_delivery_attempts_total Delivery attempts by result\n");
        output.push_str("# TYPE courier_delivery_attempts_total counter\n");
        for (result, value) in [
            ("success", s.deliveries_succeeded),
            ("failure", s.deliveries_failed),
            ("skipped", s.deliveries_skipped),
            ("rejected", s.deliveries_rejected),
        ] {
            let _ = writeln!(
                output,
                "courier_delivery_attempts_total{{result=\"{result}\"}} {value}"
            );
        }

        write_metric(
            &mut output,
            "courier_delivery_time_avg_us",
            "gauge",
            "Average delivery attempt time",
            s.delivery_avg_time_us,
        );
        write_metric(
            &mut output,
            "courier_leases_acquired_total",
            "counter",
            "Outbox rows leased",
            s.leases_acquired,
        );
        write_metric(
            &mut output,
            "courier_leases_lost_total",
            "counter",
            "Outbox leases that expired mid-cycle",
            s.leases_lost,
        );

        output.push_str("# HELP courier_outbox_terminal_total Outbox rows reaching a terminal state\n");
        output.push_str("# TYPE courier_outbox_terminal_total counter\n");
        let _ = writeln!(
            output,
            "courier_outbox_terminal_total{{status=\"delivered\"}} {}",
            s.rows_delivered
        );
        let _ = writeln!(
            output,
            "courier_outbox_terminal_total{{status=\"failed\"}} {}",
            s.rows_failed
        );

        output.push_str("# HELP courier_archived_total Rows moved into the archive\n");
        output.push_str("# TYPE courier_archived_total counter\n");
        let _ = writeln!(
            output,
            "courier_archived_total{{store=\"outbox\"}} {}",
            s.outbox_archived
        );
        let _ = writeln!(
            output,
            "courier_archived_total{{store=\"inbound\"}} {}",
            s.inbound_archived
        );

        output
    }
}

fn write_metric(output: &mut String, name: &str, kind: &str, help: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {kind}");
    let _ = writeln!(output, "{name} {value}");
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct MetricsSnapshot {
    pub events_produced: u64,
    pub events_ingested: u64,
    pub events_duplicate: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub deliveries_skipped: u64,
    pub deliveries_rejected: u64,
    pub delivery_avg_time_us: u64,
    pub leases_acquired: u64,
    pub rows_delivered: u64,
    pub rows_failed: u64,
    pub leases_lost: u64,
    pub outbox_archived: u64,
    pub inbound_archived: u64,
}

/// Timer for measuring operation duration.
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time since timer started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_produced, 0);
        assert_eq!(snapshot.deliveries_succeeded, 0);
        assert_eq!(snapshot.delivery_avg_time_us, 0);
    }

    #[test]
    fn test_record_ingested() {
        let metrics = Metrics::new();
        metrics.record_ingested(false);
        metrics.record_ingested(false);
        metrics.record_ingested(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_ingested, 2);
        assert_eq!(snapshot.events_duplicate, 1);
    }

    #[test]
    fn test_record_attempt_average() {
        let metrics = Metrics::new();
        metrics.record_attempt(true, Duration::from_micros(100));
        metrics.record_attempt(false, Duration::from_micros(300));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deliveries_succeeded, 1);
        assert_eq!(snapshot.deliveries_failed, 1);
        assert_eq!(snapshot.delivery_avg_time_us, 200);
    }

    #[test]
    fn test_skipped_does_not_affect_average() {
        let metrics = Metrics::new();
        metrics.record_skipped();
        metrics.record_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.deliveries_skipped, 1);
        assert_eq!(snapshot.deliveries_rejected, 1);
        assert_eq!(snapshot.delivery_avg_time_us, 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.record_produced();
        metrics.record_terminal(false);
        metrics.record_archived(3, 5);

        let output = metrics.to_prometheus();
        assert!(output.contains("courier_events_produced_total 1"));
        assert!(output.contains("courier_outbox_terminal_total{status=\"failed\"} 1"));
        assert!(output.contains("courier_archived_total{store=\"outbox\"} 3"));
        assert!(output.contains("courier_archived_total{store=\"inbound\"} 5"));
        assert!(output.contains("# TYPE courier_delivery_attempts_total counter"));
    }

    #[test]
    fn test_timer() {
        let timer = Timer::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
    }
}
