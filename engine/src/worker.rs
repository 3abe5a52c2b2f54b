use crate::errors::{Error, Result};
use crate::metrics::{BATCH_FAILURES_TOTAL, BATCH_LATENCY_SECONDS};
use crate::mqtt::IngestJob;
use crate::pipeline::ProcessingSummary;
use crate::service::IotService;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Drains queued telemetry batches into the pipeline.
///
/// Up to `max_in_flight` batches run at once; batches for the same device
/// still serialize on the device lock inside the service. Returns once the
/// channel is closed and every in-flight batch has finished.
pub async fn run_ingest_worker(
    mut rx: mpsc::Receiver<IngestJob>,
    service: Arc<IotService>,
    max_in_flight: usize,
    deadline_ms: u64,
) {
    let max_in_flight = max_in_flight.max(1);
    info!(
        "Starting ingest worker with max_in_flight={}, deadline_ms={}",
        max_in_flight, deadline_ms
    );

    let permits = Arc::new(Semaphore::new(max_in_flight));

    while let Some(job) = rx.recv().await {
        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };

        let service = service.clone();
        tokio::spawn(async move {
            let _permit = permit;
            let device_id = job.device_id.clone();
            if let Err(e) = process_job(&service, job, deadline_ms).await {
                BATCH_FAILURES_TOTAL.inc();
                error!(device_id = %device_id, "Telemetry batch failed: {}", e);
            }
        });
    }

    info!("Channel closed, waiting for in-flight batches");
    // Every permit back means every spawned batch is done.
    let _ = permits.acquire_many(max_in_flight as u32).await;
    info!("Ingest worker stopped");
}

/// Runs one batch under the caller-imposed deadline.
pub async fn process_job(
    service: &IotService,
    job: IngestJob,
    deadline_ms: u64,
) -> Result<ProcessingSummary> {
    let start = Instant::now();
    let deadline = Duration::from_millis(deadline_ms);

    let summary = tokio::time::timeout(
        deadline,
        service.process_sensor_data(&job.device_id, job.readings),
    )
    .await
    .map_err(|_| Error::Timeout(deadline_ms))??;

    let elapsed = start.elapsed().as_secs_f64();
    BATCH_LATENCY_SECONDS.observe(elapsed);
    debug!(
        device_id = %summary.device_id,
        readings = summary.processed_readings.len(),
        "Batch processed in {:.3}s",
        elapsed
    );
    Ok(summary)
}
