use crate::anomaly::{detect, Anomaly};
use crate::calibration::parse_sensor_id;
use crate::errors::{Result, ResultExt};
use crate::metrics::{READINGS_PROCESSED_TOTAL, READINGS_SKIPPED_TOTAL};
use crate::model::{Device, LastReading, ReadingInput, Sensor, SensorReading};
use crate::service::IotService;
use crate::validate::validate_reading;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedReading {
    pub sensor_id: Uuid,
    pub sensor_name: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
}

/// Result of one `process_sensor_data` call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub device_id: String,
    pub processed_readings: Vec<ProcessedReading>,
    pub anomalies: Vec<Anomaly>,
    pub timestamp: DateTime<Utc>,
}

impl IotService {
    /// Runs a device's batch through calibration, threshold checks and
    /// storage. An anomalous reading gets its alert right after the reading
    /// itself is stored.
    ///
    /// Readings are independent: one whose sensor cannot be resolved is
    /// skipped and the rest of the batch still goes through.
    #[instrument(skip(self, readings), fields(readings = readings.len()))]
    pub async fn process_sensor_data(
        &self,
        device_id: &str,
        readings: Vec<ReadingInput>,
    ) -> Result<ProcessingSummary> {
        let device = self.touch_device(device_id).await?;

        let mut processed_readings = Vec::with_capacity(readings.len());
        let mut anomalies = Vec::new();

        for reading in readings {
            let Some(id) = self.resolvable_sensor_id(&reading) else {
                READINGS_SKIPPED_TOTAL.inc();
                continue;
            };

            let _guard = self.sensor_locks.lock(&id.to_string()).await;
            let Some(sensor) = self.resolve_sensor(id).await else {
                READINGS_SKIPPED_TOTAL.inc();
                continue;
            };

            let (entry, anomaly) = self
                .process_reading(&device, sensor, reading)
                .await
                .context("process sensor data")?;

            READINGS_PROCESSED_TOTAL.inc();
            processed_readings.push(entry);

            if let Some(anomaly) = anomaly {
                self.raise_alert(&device, &anomaly)
                    .await
                    .context("process sensor data")?;
                anomalies.push(anomaly);
            }
        }

        info!(
            processed = processed_readings.len(),
            anomalies = anomalies.len(),
            "Sensor data processed"
        );

        Ok(ProcessingSummary {
            device_id: device.device_id,
            processed_readings,
            anomalies,
            timestamp: Utc::now(),
        })
    }

    /// Refreshes the device's connection date under its lock.
    async fn touch_device(&self, device_id: &str) -> Result<Device> {
        let _guard = self.device_locks.lock(device_id).await;
        let mut device = self
            .load_device(device_id)
            .await
            .context("process sensor data")?;

        device.last_connection_date = Some(Utc::now());
        self.store
            .update_device(&device)
            .await
            .context("process sensor data")?;
        Ok(device)
    }

    fn resolvable_sensor_id(&self, reading: &ReadingInput) -> Option<Uuid> {
        if let Err(e) = validate_reading(reading) {
            warn!(sensor_id = %reading.sensor_id, "Skipping reading: {}", e);
            return None;
        }
        let id = parse_sensor_id(&reading.sensor_id);
        if id.is_none() {
            warn!(sensor_id = %reading.sensor_id, "Skipping reading with malformed sensor id");
        }
        id
    }

    async fn resolve_sensor(&self, id: Uuid) -> Option<Sensor> {
        match self.store.get_sensor(id).await {
            Ok(Some(sensor)) => Some(sensor),
            Ok(None) => {
                debug!(sensor_id = %id, "Skipping reading for unknown sensor");
                None
            }
            Err(e) => {
                warn!(sensor_id = %id, "Skipping reading, sensor lookup failed: {}", e);
                None
            }
        }
    }

    async fn process_reading(
        &self,
        device: &Device,
        mut sensor: Sensor,
        reading: ReadingInput,
    ) -> Result<(ProcessedReading, Option<Anomaly>)> {
        let timestamp = reading.timestamp.unwrap_or_else(Utc::now);
        let processed_value = sensor.calibrate(reading.value);

        let anomaly = detect(processed_value, sensor.min_threshold, sensor.max_threshold).map(
            |(kind, threshold)| Anomaly {
                sensor_id: sensor.id,
                sensor_name: sensor.name.clone(),
                kind,
                value: processed_value,
                threshold,
                timestamp,
            },
        );

        let stored = SensorReading {
            id: Uuid::new_v4(),
            sensor_id: sensor.id,
            device_id: device.device_id.clone(),
            raw_value: reading.value,
            processed_value,
            timestamp,
            is_anomaly: anomaly.is_some(),
            metadata: reading.metadata.unwrap_or_default(),
        };
        self.store.insert_reading(&stored).await?;

        sensor.last_reading = Some(LastReading {
            value: processed_value,
            timestamp,
        });
        self.store.update_sensor(&sensor).await?;

        let entry = ProcessedReading {
            sensor_id: sensor.id,
            sensor_name: sensor.name,
            raw_value: reading.value,
            processed_value,
            timestamp,
            is_anomaly: stored.is_anomaly,
        };
        Ok((entry, anomaly))
    }
}
