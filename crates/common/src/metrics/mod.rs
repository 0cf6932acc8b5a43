//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming conventions for the
//! answer pipeline: routing, retrieval, fusion, synthesis.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all Redchamber metrics
pub const METRICS_PREFIX: &str = "redchamber";

/// Histogram buckets for end-to-end answer latency (in seconds).
/// Dominated by the generation call.
pub const ANSWER_LATENCY_BUCKETS: &[f64] = &[
    0.010, // 10ms - no-evidence short circuit
    0.050,
    0.100,
    0.250,
    0.500,
    1.000,
    2.500,
    5.000,
    10.00,
    20.00,
    45.00, // generation timeout
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total questions answered, by routed class"
    );

    describe_histogram!(
        format!("{}_answer_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end answer latency in seconds"
    );

    describe_counter!(
        format!("{}_retriever_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Retriever calls that failed with RetrievalUnavailable"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Per-retriever search latency in seconds"
    );

    describe_histogram!(
        format!("{}_fused_passages", METRICS_PREFIX),
        Unit::Count,
        "Passages kept after fusion"
    );

    describe_counter!(
        format!("{}_synthesis_attempts_total", METRICS_PREFIX),
        Unit::Count,
        "Generation service calls, by outcome"
    );

    describe_counter!(
        format!("{}_degraded_answers_total", METRICS_PREFIX),
        Unit::Count,
        "Answers returned in a degraded state, by reason"
    );

    tracing::info!("Metrics registered");
}

/// Tracks one answer request from routing to completion
pub struct AnswerMetrics {
    start: Instant,
    class: &'static str,
}

impl AnswerMetrics {
    /// Start tracking a routed query
    pub fn start(class: &'static str) -> Self {
        Self {
            start: Instant::now(),
            class,
        }
    }

    /// Record request completion
    pub fn finish(self, degraded: bool) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_queries_total", METRICS_PREFIX),
            "class" => self.class,
            "degraded" => degraded.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_answer_duration_seconds", METRICS_PREFIX),
            "class" => self.class
        )
        .record(duration);
    }
}

/// Helper to record one retriever call
pub fn record_retrieval(retriever: &str, duration_secs: f64, success: bool) {
    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "retriever" => retriever.to_string()
    )
    .record(duration_secs);

    if !success {
        counter!(
            format!("{}_retriever_failures_total", METRICS_PREFIX),
            "retriever" => retriever.to_string()
        )
        .increment(1);
    }
}

/// Helper to record fused result size
pub fn record_fusion(strategy: &str, kept: usize) {
    histogram!(
        format!("{}_fused_passages", METRICS_PREFIX),
        "strategy" => strategy.to_string()
    )
    .record(kept as f64);
}

/// Helper to record a generation call
pub fn record_synthesis_attempt(model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_synthesis_attempts_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Helper to record a degraded answer
pub fn record_degraded(reason: &'static str) {
    counter!(
        format!("{}_degraded_answers_total", METRICS_PREFIX),
        "reason" => reason
    )
    .increment(1);
}
