use crate::errors::{Error, Result, ResultExt};
use crate::model::{Calibration, CalibrationRequest, NewSensor, Sensor};
use crate::service::IotService;
use crate::validate::{validate_calibration, validate_new_sensor};
use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;

/// `raw * multiplier + offset` when both coefficients are set, otherwise the
/// raw value unchanged.
pub fn apply_calibration(raw: f64, offset: Option<f64>, multiplier: Option<f64>) -> f64 {
    match (multiplier, offset) {
        (Some(multiplier), Some(offset)) => raw * multiplier + offset,
        _ => raw,
    }
}

impl Sensor {
    pub fn calibrate(&self, raw: f64) -> f64 {
        apply_calibration(raw, self.calibration_offset, self.calibration_multiplier)
    }
}

/// Sensor ids arrive as strings from devices and HTTP paths.
pub fn parse_sensor_id(sensor_id: &str) -> Option<Uuid> {
    Uuid::parse_str(sensor_id.trim()).ok()
}

impl IotService {
    pub async fn create_sensor(&self, input: NewSensor) -> Result<Sensor> {
        validate_new_sensor(&input)?;

        let sensor = Sensor {
            id: Uuid::new_v4(),
            name: input.name,
            kind: input.kind,
            unit: input.unit,
            device_id: input.device_id,
            calibration_offset: input.calibration_offset,
            calibration_multiplier: input.calibration_multiplier,
            min_threshold: input.min_threshold,
            max_threshold: input.max_threshold,
            last_reading: None,
            last_calibration_date: None,
            calibration_history: Vec::new(),
        };

        self.store
            .insert_sensor(&sensor)
            .await
            .context("create sensor")?;

        info!(sensor_id = %sensor.id, name = %sensor.name, "Sensor created");
        Ok(sensor)
    }

    /// Records an audit entry with the old and new coefficients, then swaps
    /// the live coefficients on the sensor.
    #[instrument(skip(self, request))]
    pub async fn calibrate_sensor(
        &self,
        sensor_id: &str,
        request: CalibrationRequest,
    ) -> Result<Sensor> {
        let (offset, multiplier, user_id) = validate_calibration(&request)?;
        let id = parse_sensor_id(sensor_id).ok_or_else(|| Error::not_found("sensor", sensor_id))?;

        let _guard = self.sensor_locks.lock(&id.to_string()).await;
        let mut sensor = self
            .store
            .get_sensor(id)
            .await
            .context("calibrate sensor")?
            .ok_or_else(|| Error::not_found("sensor", sensor_id))?;

        let now = Utc::now();
        let calibration = Calibration {
            id: Uuid::new_v4(),
            sensor_id: sensor.id,
            previous_offset: sensor.calibration_offset,
            previous_multiplier: sensor.calibration_multiplier,
            new_offset: offset,
            new_multiplier: multiplier,
            reference_value: request.reference_value,
            measured_value: request.measured_value,
            calibrated_by: user_id.to_string(),
            timestamp: now,
        };

        self.store
            .insert_calibration(&calibration)
            .await
            .context("calibrate sensor")?;

        sensor.calibration_offset = Some(offset);
        sensor.calibration_multiplier = Some(multiplier);
        sensor.last_calibration_date = Some(now);
        sensor.calibration_history.push(calibration.id);

        self.store
            .update_sensor(&sensor)
            .await
            .context("calibrate sensor")?;

        info!(
            calibration_id = %calibration.id,
            offset,
            multiplier,
            "Sensor calibrated"
        );
        Ok(sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::notify::TracingNotifier;
    use rand::Rng;
    use std::sync::Arc;

    #[test]
    fn test_linear_transform() {
        assert_eq!(apply_calibration(30.0, Some(1.0), Some(2.0)), 61.0);
        assert_eq!(apply_calibration(-4.0, Some(0.5), Some(0.25)), -0.5);
    }

    #[test]
    fn test_missing_coefficient_passes_raw_through() {
        assert_eq!(apply_calibration(12.5, None, Some(2.0)), 12.5);
        assert_eq!(apply_calibration(12.5, Some(1.0), None), 12.5);
        assert_eq!(apply_calibration(12.5, None, None), 12.5);
    }

    #[test]
    fn test_transform_is_pure() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let raw: f64 = rng.gen_range(-1000.0..1000.0);
            let offset: f64 = rng.gen_range(-10.0..10.0);
            let multiplier: f64 = rng.gen_range(-5.0..5.0);
            let first = apply_calibration(raw, Some(offset), Some(multiplier));
            let second = apply_calibration(raw, Some(offset), Some(multiplier));
            assert_eq!(first.to_bits(), second.to_bits());
        }
    }

    #[test]
    fn test_parse_sensor_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_sensor_id(&id.to_string()), Some(id));
        assert_eq!(parse_sensor_id("not-a-sensor"), None);
    }

    #[tokio::test]
    async fn test_calibrate_records_previous_coefficients() {
        let store = Arc::new(MemoryStore::new());
        let svc = IotService::new(store.clone(), Arc::new(TracingNotifier));
        let sensor = svc
            .create_sensor(NewSensor {
                name: "Soil moisture".to_string(),
                calibration_offset: Some(0.5),
                calibration_multiplier: Some(1.0),
                ..Default::default()
            })
            .await
            .unwrap();

        let updated = svc
            .calibrate_sensor(
                &sensor.id.to_string(),
                CalibrationRequest {
                    offset: Some(1.0),
                    multiplier: Some(2.0),
                    reference_value: Some(21.0),
                    measured_value: Some(10.0),
                    user_id: Some("tech-1".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.calibration_offset, Some(1.0));
        assert_eq!(updated.calibration_multiplier, Some(2.0));
        assert!(updated.last_calibration_date.is_some());

        let audit = store.calibrations().await;
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].previous_offset, Some(0.5));
        assert_eq!(audit[0].previous_multiplier, Some(1.0));
        assert_eq!(audit[0].calibrated_by, "tech-1");
        assert_eq!(updated.calibration_history, vec![audit[0].id]);
    }

    #[tokio::test]
    async fn test_calibrate_unknown_sensor() {
        let svc = IotService::new(Arc::new(MemoryStore::new()), Arc::new(TracingNotifier));
        let request = CalibrationRequest {
            offset: Some(1.0),
            multiplier: Some(2.0),
            user_id: Some("tech-1".to_string()),
            ..Default::default()
        };

        let err = svc
            .calibrate_sensor(&Uuid::new_v4().to_string(), request.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { entity: "sensor", .. }));

        let err = svc.calibrate_sensor("garbage", request).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_calibrate_rejects_missing_fields() {
        let svc = IotService::new(Arc::new(MemoryStore::new()), Arc::new(TracingNotifier));
        let err = svc
            .calibrate_sensor(&Uuid::new_v4().to_string(), CalibrationRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
