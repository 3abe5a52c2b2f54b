use crate::errors::{Error, Result};
use crate::model::{
    Alert, Calibration, Device, FirmwareUpdate, HealthCheck, HealthError, LastReading, Metadata,
    Sensor, SensorReading,
};
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgQueryResult};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub async fn make_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// PostgreSQL implementation of `Store`
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(make_pool(database_url).await?))
    }
}

const DEVICE_COLUMNS: &str = "device_id, name, device_type, description, manufacturer, model, \
     api_key, status, firmware_version, pending_firmware_update, owner, field, \
     registration_date, activation_date, last_connection_date, last_health_check";

const FIRMWARE_COLUMNS: &str = "id, device_id, previous_version, new_version, status, \
     initiated_at, completed_at, installed_version, error_message";

const HEALTH_COLUMNS: &str = "id, device_id, battery_level, signal_strength, memory_usage, \
     temperature, errors, status, ts";

const SENSOR_COLUMNS: &str = "id, name, kind, unit, device_id, calibration_offset, \
     calibration_multiplier, min_threshold, max_threshold, last_reading_value, \
     last_reading_at, last_calibration_date, calibration_history";

const ALERT_COLUMNS: &str =
    "id, sensor_id, device_id, kind, value, threshold, ts, status, resolved_by, resolved_at";

#[derive(sqlx::FromRow)]
struct DeviceRow {
    device_id: String,
    name: String,
    device_type: String,
    description: Option<String>,
    manufacturer: Option<String>,
    model: Option<String>,
    api_key: String,
    status: String,
    firmware_version: Option<String>,
    pending_firmware_update: Option<Uuid>,
    owner: String,
    field: Option<String>,
    registration_date: DateTime<Utc>,
    activation_date: Option<DateTime<Utc>>,
    last_connection_date: Option<DateTime<Utc>>,
    last_health_check: Option<Uuid>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = Error;

    fn try_from(row: DeviceRow) -> Result<Self> {
        Ok(Device {
            status: row.status.parse()?,
            device_id: row.device_id,
            name: row.name,
            device_type: row.device_type,
            description: row.description,
            manufacturer: row.manufacturer,
            model: row.model,
            api_key: row.api_key,
            firmware_version: row.firmware_version,
            pending_firmware_update: row.pending_firmware_update,
            owner: row.owner,
            field: row.field,
            registration_date: row.registration_date,
            activation_date: row.activation_date,
            last_connection_date: row.last_connection_date,
            last_health_check: row.last_health_check,
        })
    }
}

#[derive(sqlx::FromRow)]
struct FirmwareRow {
    id: Uuid,
    device_id: String,
    previous_version: Option<String>,
    new_version: String,
    status: String,
    initiated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    installed_version: Option<String>,
    error_message: Option<String>,
}

impl TryFrom<FirmwareRow> for FirmwareUpdate {
    type Error = Error;

    fn try_from(row: FirmwareRow) -> Result<Self> {
        Ok(FirmwareUpdate {
            status: row.status.parse()?,
            id: row.id,
            device_id: row.device_id,
            previous_version: row.previous_version,
            new_version: row.new_version,
            initiated_at: row.initiated_at,
            completed_at: row.completed_at,
            installed_version: row.installed_version,
            error_message: row.error_message,
        })
    }
}

#[derive(sqlx::FromRow)]
struct HealthRow {
    id: Uuid,
    device_id: String,
    battery_level: f64,
    signal_strength: f64,
    memory_usage: f64,
    temperature: f64,
    errors: Json<Vec<HealthError>>,
    status: String,
    ts: DateTime<Utc>,
}

impl TryFrom<HealthRow> for HealthCheck {
    type Error = Error;

    fn try_from(row: HealthRow) -> Result<Self> {
        Ok(HealthCheck {
            status: row.status.parse()?,
            id: row.id,
            device_id: row.device_id,
            battery_level: row.battery_level,
            signal_strength: row.signal_strength,
            memory_usage: row.memory_usage,
            temperature: row.temperature,
            errors: row.errors.0,
            timestamp: row.ts,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SensorRow {
    id: Uuid,
    name: String,
    kind: String,
    unit: Option<String>,
    device_id: Option<String>,
    calibration_offset: Option<f64>,
    calibration_multiplier: Option<f64>,
    min_threshold: Option<f64>,
    max_threshold: Option<f64>,
    last_reading_value: Option<f64>,
    last_reading_at: Option<DateTime<Utc>>,
    last_calibration_date: Option<DateTime<Utc>>,
    calibration_history: Vec<Uuid>,
}

impl From<SensorRow> for Sensor {
    fn from(row: SensorRow) -> Self {
        let last_reading = match (row.last_reading_value, row.last_reading_at) {
            (Some(value), Some(timestamp)) => Some(LastReading { value, timestamp }),
            _ => None,
        };
        Sensor {
            id: row.id,
            name: row.name,
            kind: row.kind,
            unit: row.unit,
            device_id: row.device_id,
            calibration_offset: row.calibration_offset,
            calibration_multiplier: row.calibration_multiplier,
            min_threshold: row.min_threshold,
            max_threshold: row.max_threshold,
            last_reading,
            last_calibration_date: row.last_calibration_date,
            calibration_history: row.calibration_history,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    sensor_id: Uuid,
    device_id: String,
    kind: String,
    value: f64,
    threshold: f64,
    ts: DateTime<Utc>,
    status: String,
    resolved_by: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = Error;

    fn try_from(row: AlertRow) -> Result<Self> {
        Ok(Alert {
            kind: row.kind.parse()?,
            status: row.status.parse()?,
            id: row.id,
            sensor_id: row.sensor_id,
            device_id: row.device_id,
            value: row.value,
            threshold: row.threshold,
            timestamp: row.ts,
            resolved_by: row.resolved_by,
            resolved_at: row.resolved_at,
        })
    }
}

/// LIMIT/OFFSET value; anything past `i64::MAX` is as good as unbounded.
fn page_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Fails with `NotFound` when an UPDATE touched nothing.
fn expect_updated(result: PgQueryResult, entity: &'static str, id: String) -> Result<()> {
    if result.rows_affected() == 0 {
        return Err(Error::not_found(entity, id));
    }
    Ok(())
}

#[async_trait]
impl Store for PgStore {
    async fn insert_device(&self, device: &Device) -> Result<()> {
        let query = format!(
            "INSERT INTO devices ({DEVICE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        );

        let result = sqlx::query(&query)
            .bind(&device.device_id)
            .bind(&device.name)
            .bind(&device.device_type)
            .bind(&device.description)
            .bind(&device.manufacturer)
            .bind(&device.model)
            .bind(&device.api_key)
            .bind(device.status.as_str())
            .bind(&device.firmware_version)
            .bind(device.pending_firmware_update)
            .bind(&device.owner)
            .bind(&device.field)
            .bind(device.registration_date)
            .bind(device.activation_date)
            .bind(device.last_connection_date)
            .bind(device.last_health_check)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                debug!(device_id = %device.device_id, "device row inserted");
                Ok(())
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                Error::Conflict(format!("device {} already exists", device.device_id)),
            ),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_device(&self, device_id: &str) -> Result<Option<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE device_id = $1");
        let row = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Device::try_from).transpose()
    }

    async fn update_device(&self, device: &Device) -> Result<()> {
        let result = sqlx::query(
            "UPDATE devices SET
                name = $2, device_type = $3, description = $4, manufacturer = $5, model = $6,
                api_key = $7, status = $8, firmware_version = $9, pending_firmware_update = $10,
                owner = $11, field = $12, registration_date = $13, activation_date = $14,
                last_connection_date = $15, last_health_check = $16
             WHERE device_id = $1",
        )
        .bind(&device.device_id)
        .bind(&device.name)
        .bind(&device.device_type)
        .bind(&device.description)
        .bind(&device.manufacturer)
        .bind(&device.model)
        .bind(&device.api_key)
        .bind(device.status.as_str())
        .bind(&device.firmware_version)
        .bind(device.pending_firmware_update)
        .bind(&device.owner)
        .bind(&device.field)
        .bind(device.registration_date)
        .bind(device.activation_date)
        .bind(device.last_connection_date)
        .bind(device.last_health_check)
        .execute(&self.pool)
        .await?;

        expect_updated(result, "device", device.device_id.clone())
    }

    async fn devices_by_field(&self, field_id: &str) -> Result<Vec<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE field = $1");
        let rows = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(field_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Device::try_from).collect()
    }

    async fn devices_by_owner(&self, owner_id: &str) -> Result<Vec<Device>> {
        let query = format!("SELECT {DEVICE_COLUMNS} FROM devices WHERE owner = $1");
        let rows = sqlx::query_as::<_, DeviceRow>(&query)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Device::try_from).collect()
    }

    async fn insert_firmware_update(&self, update: &FirmwareUpdate) -> Result<()> {
        let query = format!(
            "INSERT INTO firmware_updates ({FIRMWARE_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(update.id)
            .bind(&update.device_id)
            .bind(&update.previous_version)
            .bind(&update.new_version)
            .bind(update.status.as_str())
            .bind(update.initiated_at)
            .bind(update.completed_at)
            .bind(&update.installed_version)
            .bind(&update.error_message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_firmware_update(&self, id: Uuid) -> Result<Option<FirmwareUpdate>> {
        let query = format!("SELECT {FIRMWARE_COLUMNS} FROM firmware_updates WHERE id = $1");
        let row = sqlx::query_as::<_, FirmwareRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FirmwareUpdate::try_from).transpose()
    }

    async fn update_firmware_update(&self, update: &FirmwareUpdate) -> Result<()> {
        let result = sqlx::query(
            "UPDATE firmware_updates SET
                status = $2, completed_at = $3, installed_version = $4, error_message = $5
             WHERE id = $1",
        )
        .bind(update.id)
        .bind(update.status.as_str())
        .bind(update.completed_at)
        .bind(&update.installed_version)
        .bind(&update.error_message)
        .execute(&self.pool)
        .await?;

        expect_updated(result, "firmware update", update.id.to_string())
    }

    async fn insert_health_check(&self, check: &HealthCheck) -> Result<()> {
        let query = format!(
            "INSERT INTO health_checks ({HEALTH_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        );
        sqlx::query(&query)
            .bind(check.id)
            .bind(&check.device_id)
            .bind(check.battery_level)
            .bind(check.signal_strength)
            .bind(check.memory_usage)
            .bind(check.temperature)
            .bind(Json(&check.errors))
            .bind(check.status.as_str())
            .bind(check.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn health_checks_for_device(
        &self,
        device_id: &str,
        limit: usize,
        skip: usize,
    ) -> Result<Vec<HealthCheck>> {
        let query = format!(
            "SELECT {HEALTH_COLUMNS} FROM health_checks
             WHERE device_id = $1
             ORDER BY ts DESC
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, HealthRow>(&query)
            .bind(device_id)
            .bind(page_bound(limit))
            .bind(page_bound(skip))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(HealthCheck::try_from).collect()
    }

    async fn insert_sensor(&self, sensor: &Sensor) -> Result<()> {
        let query = format!(
            "INSERT INTO sensors ({SENSOR_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        );
        sqlx::query(&query)
            .bind(sensor.id)
            .bind(&sensor.name)
            .bind(&sensor.kind)
            .bind(&sensor.unit)
            .bind(&sensor.device_id)
            .bind(sensor.calibration_offset)
            .bind(sensor.calibration_multiplier)
            .bind(sensor.min_threshold)
            .bind(sensor.max_threshold)
            .bind(sensor.last_reading.map(|r| r.value))
            .bind(sensor.last_reading.map(|r| r.timestamp))
            .bind(sensor.last_calibration_date)
            .bind(&sensor.calibration_history)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_sensor(&self, id: Uuid) -> Result<Option<Sensor>> {
        let query = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE id = $1");
        let row = sqlx::query_as::<_, SensorRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Sensor::from))
    }

    async fn update_sensor(&self, sensor: &Sensor) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sensors SET
                name = $2, kind = $3, unit = $4, device_id = $5, calibration_offset = $6,
                calibration_multiplier = $7, min_threshold = $8, max_threshold = $9,
                last_reading_value = $10, last_reading_at = $11, last_calibration_date = $12,
                calibration_history = $13
             WHERE id = $1",
        )
        .bind(sensor.id)
        .bind(&sensor.name)
        .bind(&sensor.kind)
        .bind(&sensor.unit)
        .bind(&sensor.device_id)
        .bind(sensor.calibration_offset)
        .bind(sensor.calibration_multiplier)
        .bind(sensor.min_threshold)
        .bind(sensor.max_threshold)
        .bind(sensor.last_reading.map(|r| r.value))
        .bind(sensor.last_reading.map(|r| r.timestamp))
        .bind(sensor.last_calibration_date)
        .bind(&sensor.calibration_history)
        .execute(&self.pool)
        .await?;

        expect_updated(result, "sensor", sensor.id.to_string())
    }

    async fn insert_calibration(&self, calibration: &Calibration) -> Result<()> {
        sqlx::query(
            "INSERT INTO calibrations (id, sensor_id, previous_offset, previous_multiplier,
                new_offset, new_multiplier, reference_value, measured_value, calibrated_by, ts)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(calibration.id)
        .bind(calibration.sensor_id)
        .bind(calibration.previous_offset)
        .bind(calibration.previous_multiplier)
        .bind(calibration.new_offset)
        .bind(calibration.new_multiplier)
        .bind(calibration.reference_value)
        .bind(calibration.measured_value)
        .bind(&calibration.calibrated_by)
        .bind(calibration.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_reading(&self, reading: &SensorReading) -> Result<()> {
        sqlx::query(
            "INSERT INTO sensor_readings (id, sensor_id, device_id, raw_value, processed_value,
                ts, is_anomaly, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(reading.id)
        .bind(reading.sensor_id)
        .bind(&reading.device_id)
        .bind(reading.raw_value)
        .bind(reading.processed_value)
        .bind(reading.timestamp)
        .bind(reading.is_anomaly)
        .bind(Json::<&Metadata>(&reading.metadata))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        let query = format!(
            "INSERT INTO alerts ({ALERT_COLUMNS})
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        );
        sqlx::query(&query)
            .bind(alert.id)
            .bind(alert.sensor_id)
            .bind(&alert.device_id)
            .bind(alert.kind.as_str())
            .bind(alert.value)
            .bind(alert.threshold)
            .bind(alert.timestamp)
            .bind(alert.status.as_str())
            .bind(&alert.resolved_by)
            .bind(alert.resolved_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        let query = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1");
        let row = sqlx::query_as::<_, AlertRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Alert::try_from).transpose()
    }

    async fn update_alert(&self, alert: &Alert) -> Result<()> {
        let result = sqlx::query(
            "UPDATE alerts SET status = $2, resolved_by = $3, resolved_at = $4 WHERE id = $1",
        )
        .bind(alert.id)
        .bind(alert.status.as_str())
        .bind(&alert.resolved_by)
        .bind(alert.resolved_at)
        .execute(&self.pool)
        .await?;

        expect_updated(result, "alert", alert.id.to_string())
    }

    async fn active_alerts_for_devices(&self, device_ids: &[String]) -> Result<Vec<Alert>> {
        let query = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE status = 'active' AND device_id = ANY($1)
             ORDER BY ts DESC"
        );
        let rows = sqlx::query_as::<_, AlertRow>(&query)
            .bind(device_ids)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }
}
