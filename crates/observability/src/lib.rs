use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

/// Counters kept by the calling layer around engine invocations.
#[derive(Debug, Default)]
pub struct RunMetrics {
    evaluations_total: AtomicU64,
    violations_total: AtomicU64,
    rejected_visits_total: AtomicU64,
    total_latency_micros: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub evaluations_total: u64,
    pub violations_total: u64,
    pub rejected_visits_total: u64,
    pub avg_latency_micros: f64,
}

impl RunMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_evaluation(&self) {
        self.evaluations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_violation(&self) {
        self.violations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rejected(&self, count: usize) {
        self.rejected_visits_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let evaluations = self.evaluations_total.load(Ordering::Relaxed);
        let latency = self.total_latency_micros.load(Ordering::Relaxed);

        MetricsSnapshot {
            evaluations_total: evaluations,
            violations_total: self.violations_total.load(Ordering::Relaxed),
            rejected_visits_total: self.rejected_visits_total.load(Ordering::Relaxed),
            avg_latency_micros: if evaluations == 0 {
                0.0
            } else {
                latency as f64 / evaluations as f64
            },
        }
    }
}

pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}=info,staywise_core=info", service_name))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .init();
    });
}
