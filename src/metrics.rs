// Prometheus metrics for the backup validator service
//
// Exposes metrics on the /metrics HTTP endpoint:
// - Request outcomes (counter)
// - Script durations (histogram)
// - Running scripts (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::sync::{Arc, Once};

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "backup_validator_requests_total",
            "Script requests by outcome (success, error, rejected, denied)"
        ),
        &["outcome"]
    ).expect("Failed to create requests total metric");

    pub static ref SCRIPT_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "backup_validator_script_duration_seconds",
            "Script run time in seconds"
        ),
        &["script"]
    ).expect("Failed to create script duration metric");

    pub static ref ACTIVE_SCRIPTS: IntGauge = IntGauge::new(
        "backup_validator_active_scripts",
        "Number of currently running scripts"
    ).expect("Failed to create active scripts metric");
}

static INIT: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
            Box::new(REQUESTS_TOTAL.clone()),
            Box::new(SCRIPT_DURATION_SECONDS.clone()),
            Box::new(ACTIVE_SCRIPTS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Marks one script as running until dropped
pub struct ActiveScript(());

impl ActiveScript {
    pub fn start() -> Self {
        ACTIVE_SCRIPTS.inc();
        Self(())
    }
}

impl Drop for ActiveScript {
    fn drop(&mut self) {
        ACTIVE_SCRIPTS.dec();
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}
