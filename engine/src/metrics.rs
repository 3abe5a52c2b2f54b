use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_PROCESSED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_readings_processed_total",
        "Total sensor readings calibrated and stored"
    ))
    .unwrap();
    pub static ref READINGS_SKIPPED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_readings_skipped_total",
        "Total readings skipped because their sensor could not be resolved"
    ))
    .unwrap();
    pub static ref ANOMALIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new("engine_anomalies_total", "Total threshold breaches detected"),
        &["type"]
    )
    .unwrap();
    pub static ref HEALTH_CHECKS_TOTAL: CounterVec = CounterVec::new(
        Opts::new("engine_health_checks_total", "Total health checks recorded"),
        &["status"]
    )
    .unwrap();
    pub static ref NOTIFICATION_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_notification_failures_total",
        "Total owner notifications that could not be delivered"
    ))
    .unwrap();
    pub static ref MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_mqtt_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref VALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_mqtt_valid_messages_total",
        "Total telemetry batches accepted after validation"
    ))
    .unwrap();
    pub static ref INVALID_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_mqtt_invalid_messages_total",
        "Total telemetry batches rejected"
    ))
    .unwrap();
    pub static ref CHANNEL_FULL_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_channel_full_total",
        "Total number of times the ingest channel was full (backpressure events)"
    ))
    .unwrap();
    pub static ref BATCH_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "engine_batch_failures_total",
        "Total telemetry batches that failed or ran past their deadline"
    ))
    .unwrap();
    pub static ref BATCH_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "engine_batch_latency_seconds",
            "Time taken to process one telemetry batch"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(READINGS_PROCESSED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_SKIPPED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(ANOMALIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(HEALTH_CHECKS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(NOTIFICATION_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(VALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INVALID_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CHANNEL_FULL_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(BATCH_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
