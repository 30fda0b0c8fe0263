//! Observability stubs (metrics, tracing)

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Metrics handle for recording counters at well-known pipeline points.
#[derive(Debug, Default)]
pub struct Metrics {
    requests_total: AtomicU64,
    step_failures: AtomicU64,
    sign_validations: Mutex<HashMap<String, u64>>,
    schema_validations: Mutex<HashMap<(String, String), u64>>,
    routing_decisions: Mutex<HashMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sign_validation(&self, status: &str) {
        let mut map = lock(&self.sign_validations);
        *map.entry(status.to_string()).or_default() += 1;
        tracing::debug!(counter = "sign_validations_total", status, "Metric incremented");
    }

    pub fn schema_validation(&self, version: &str, status: &str) {
        let mut map = lock(&self.schema_validations);
        *map.entry((version.to_string(), status.to_string())).or_default() += 1;
        tracing::debug!(
            counter = "schema_validations_total",
            version,
            status,
            "Metric incremented"
        );
    }

    pub fn routing_decision(&self, target_type: &str) {
        let mut map = lock(&self.routing_decisions);
        *map.entry(target_type.to_string()).or_default() += 1;
        tracing::debug!(
            counter = "routing_decisions_total",
            target_type,
            "Metric incremented"
        );
    }

    /// Records one step execution; duration lands on the log line, terminal
    /// status feeds the failure counter.
    pub fn step_completed(&self, step: &str, module: &str, status: &str, elapsed: Duration) {
        if status != "success" {
            self.step_failures.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            step,
            module,
            status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Step completed"
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            step_failures: self.step_failures.load(Ordering::Relaxed),
            sign_validations: lock(&self.sign_validations).clone(),
            schema_validations: lock(&self.schema_validations).clone(),
            routing_decisions: lock(&self.routing_decisions).clone(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub step_failures: u64,
    pub sign_validations: HashMap<String, u64>,
    pub schema_validations: HashMap<(String, String), u64>,
    pub routing_decisions: HashMap<String, u64>,
}
