use crate::errors::Result;
use crate::model::{Alert, Calibration, Device, FirmwareUpdate, HealthCheck, Sensor, SensorReading};
use async_trait::async_trait;
use uuid::Uuid;

/// Persistence boundary of the engine.
///
/// Every method is an independent write or read; nothing here spans more
/// than one record, so callers must not assume atomicity across calls.
/// `update_*` methods replace the stored record and fail with
/// `Error::NotFound` when it does not exist.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fails with `Error::Conflict` when the device id is taken.
    async fn insert_device(&self, device: &Device) -> Result<()>;
    async fn get_device(&self, device_id: &str) -> Result<Option<Device>>;
    async fn update_device(&self, device: &Device) -> Result<()>;
    async fn devices_by_field(&self, field_id: &str) -> Result<Vec<Device>>;
    async fn devices_by_owner(&self, owner_id: &str) -> Result<Vec<Device>>;

    async fn insert_firmware_update(&self, update: &FirmwareUpdate) -> Result<()>;
    async fn get_firmware_update(&self, id: Uuid) -> Result<Option<FirmwareUpdate>>;
    async fn update_firmware_update(&self, update: &FirmwareUpdate) -> Result<()>;

    async fn insert_health_check(&self, check: &HealthCheck) -> Result<()>;
    /// Newest first.
    async fn health_checks_for_device(
        &self,
        device_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<HealthCheck>>;

    async fn insert_sensor(&self, sensor: &Sensor) -> Result<()>;
    async fn get_sensor(&self, id: Uuid) -> Result<Option<Sensor>>;
    async fn update_sensor(&self, sensor: &Sensor) -> Result<()>;
    async fn insert_calibration(&self, calibration: &Calibration) -> Result<()>;

    async fn insert_reading(&self, reading: &SensorReading) -> Result<()>;

    async fn insert_alert(&self, alert: &Alert) -> Result<()>;
    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>>;
    async fn update_alert(&self, alert: &Alert) -> Result<()>;
    /// Active alerts raised by any of the given devices, newest first.
    async fn active_alerts_for_devices(&self, device_ids: &[String]) -> Result<Vec<Alert>>;
}
