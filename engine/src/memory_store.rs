use crate::errors::{Error, Result};
use crate::model::{
    Alert, AlertStatus, Calibration, Device, FirmwareUpdate, HealthCheck, Sensor, SensorReading,
};
use crate::store::Store;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory implementation of `Store` backed by one map per record type
#[derive(Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<String, Device>>,
    firmware_updates: RwLock<HashMap<Uuid, FirmwareUpdate>>,
    health_checks: RwLock<Vec<HealthCheck>>,
    sensors: RwLock<HashMap<Uuid, Sensor>>,
    calibrations: RwLock<Vec<Calibration>>,
    readings: RwLock<Vec<SensorReading>>,
    alerts: RwLock<HashMap<Uuid, Alert>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn readings(&self) -> Vec<SensorReading> {
        self.readings.read().await.clone()
    }

    pub async fn calibrations(&self) -> Vec<Calibration> {
        self.calibrations.read().await.clone()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.alerts.read().await.values().cloned().collect();
        alerts.sort_by_key(|a| a.timestamp);
        alerts
    }

    pub async fn firmware_updates(&self) -> Vec<FirmwareUpdate> {
        let mut updates: Vec<FirmwareUpdate> =
            self.firmware_updates.read().await.values().cloned().collect();
        updates.sort_by_key(|u| u.initiated_at);
        updates
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_device(&self, device: &Device) -> Result<()> {
        let mut devices = self.devices.write().await;
        if devices.contains_key(&device.device_id) {
            return Err(Error::Conflict(format!(
                "device {} already exists",
                device.device_id
            )));
        }
        devices.insert(device.device_id.clone(), device.clone());
        Ok(())
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        Ok(self.devices.read().await.get(device_id).cloned())
    }

    async fn update_device(&self, device: &Device) -> Result<()> {
        match self.devices.write().await.get_mut(&device.device_id) {
            Some(stored) => {
                *stored = device.clone();
                Ok(())
            }
            None => Err(Error::not_found("device", &device.device_id)),
        }
    }

    async fn devices_by_field(&self, field_id: &str) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|d| d.field.as_deref() == Some(field_id))
            .cloned()
            .collect())
    }

    async fn devices_by_owner(&self, owner_id: &str) -> Result<Vec<Device>> {
        let devices = self.devices.read().await;
        Ok(devices
            .values()
            .filter(|d| d.owner == owner_id)
            .cloned()
            .collect())
    }

    async fn insert_firmware_update(&self, update: &FirmwareUpdate) -> Result<()> {
        self.firmware_updates
            .write()
            .await
            .insert(update.id, update.clone());
        Ok(())
    }

    async fn get_firmware_update(&self, id: Uuid) -> Result<Option<FirmwareUpdate>> {
        Ok(self.firmware_updates.read().await.get(&id).cloned())
    }

    async fn update_firmware_update(&self, update: &FirmwareUpdate) -> Result<()> {
        match self.firmware_updates.write().await.get_mut(&update.id) {
            Some(stored) => {
                *stored = update.clone();
                Ok(())
            }
            None => Err(Error::not_found("firmware update", update.id.to_string())),
        }
    }

    async fn insert_health_check(&self, check: &HealthCheck) -> Result<()> {
        self.health_checks.write().await.push(check.clone());
        Ok(())
    }

    async fn health_checks_for_device(
        &self,
        device_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<HealthCheck>> {
        let checks = self.health_checks.read().await;
        let mut matching: Vec<HealthCheck> = checks
            .iter()
            .filter(|c| c.device_id == device_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps, so reverse
        // after sorting ascending to get newest-inserted first.
        matching.sort_by_key(|c| c.timestamp);
        matching.reverse();
        Ok(matching.into_iter().skip(skip).take(limit).collect())
    }

    async fn insert_sensor(&self, sensor: &Sensor) -> Result<()> {
        self.sensors.write().await.insert(sensor.id, sensor.clone());
        Ok(())
    }

    async fn get_sensor(&self, id: Uuid) -> Result<Option<Sensor>> {
        Ok(self.sensors.read().await.get(&id).cloned())
    }

    async fn update_sensor(&self, sensor: &Sensor) -> Result<()> {
        match self.sensors.write().await.get_mut(&sensor.id) {
            Some(stored) => {
                *stored = sensor.clone();
                Ok(())
            }
            None => Err(Error::not_found("sensor", sensor.id.to_string())),
        }
    }

    async fn insert_calibration(&self, calibration: &Calibration) -> Result<()> {
        self.calibrations.write().await.push(calibration.clone());
        Ok(())
    }

    async fn insert_reading(&self, reading: &SensorReading) -> Result<()> {
        self.readings.write().await.push(reading.clone());
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        match self.alerts.write().await.get_mut(&alert.id) {
            Some(stored) => {
                *stored = alert.clone();
                Ok(())
            }
            None => Err(Error::not_found("alert", alert.id.to_string())),
        }
    }

    async fn active_alerts_for_devices(&self, device_ids: &[String]) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().await;
        let mut active: Vec<Alert> = alerts
            .values()
            .filter(|a| a.status == AlertStatus::Active && device_ids.contains(&a.device_id))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(active)
    }
}
