// Prometheus metrics for the coderun API

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    // Global registry
    pub static ref REGISTRY: Registry = Registry::new();

    // Jobs handed to the engine (counter with language label)
    pub static ref EXECUTIONS_SUBMITTED: CounterVec = CounterVec::new(
        Opts::new("coderun_executions_submitted_total", "Total number of jobs submitted to the engine"),
        &["language"]
    )
    .expect("metric can be created");

    // Requests turned away before or at submission
    pub static ref EXECUTIONS_REJECTED: CounterVec = CounterVec::new(
        Opts::new("coderun_executions_rejected_total", "Total execution requests rejected"),
        &["reason"]
    )
    .expect("metric can be created");

    // How each submitted request was answered
    pub static ref EXECUTION_RESPONSES: CounterVec = CounterVec::new(
        Opts::new("coderun_execution_responses_total", "Execution requests by outcome"),
        &["language", "outcome"]
    )
    .expect("metric can be created");

    // Time from submission to outcome, timeout or disconnect (in milliseconds)
    pub static ref EXECUTION_WAIT_TIME: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "coderun_execution_wait_time_ms",
            "Time spent waiting for a job outcome in milliseconds"
        )
        .buckets(vec![100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
        &["language"]
    )
    .expect("metric can be created");
}

/// Register all collectors; call once at start-up
pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(EXECUTIONS_SUBMITTED.clone()))?;
    REGISTRY.register(Box::new(EXECUTIONS_REJECTED.clone()))?;
    REGISTRY.register(Box::new(EXECUTION_RESPONSES.clone()))?;
    REGISTRY.register(Box::new(EXECUTION_WAIT_TIME.clone()))?;
    Ok(())
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

pub fn record_submitted(language: &str) {
    EXECUTIONS_SUBMITTED.with_label_values(&[language]).inc();
}

pub fn record_rejected(reason: &str) {
    EXECUTIONS_REJECTED.with_label_values(&[reason]).inc();
}

pub fn record_response(language: &str, outcome: &str, wait_ms: f64) {
    EXECUTION_RESPONSES.with_label_values(&[language, outcome]).inc();
    EXECUTION_WAIT_TIME.with_label_values(&[language]).observe(wait_ms);
}
