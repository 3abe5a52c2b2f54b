use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open key/value payload attached to readings. Producers put things like
/// `{"unit": "%", "rssi": -71}` here; the engine stores it untouched.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Gives a fieldless enum a stable lowercase text form, used for the JSON
/// wire format and the TEXT columns in Postgres.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::errors::Error;

            fn from_str(s: &str) -> crate::errors::Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::errors::Error::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Registered,
    Active,
    Inactive,
}

text_enum!(DeviceStatus {
    Registered => "registered",
    Active => "active",
    Inactive => "inactive",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirmwareStatus {
    Pending,
    Completed,
    Failed,
}

text_enum!(FirmwareStatus {
    Pending => "pending",
    Completed => "completed",
    Failed => "failed",
});

/// Health tiers, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Moderate,
    Warning,
    Critical,
}

text_enum!(HealthStatus {
    Healthy => "healthy",
    Moderate => "moderate",
    Warning => "warning",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

text_enum!(ErrorSeverity {
    Info => "info",
    Warning => "warning",
    Error => "error",
    Critical => "critical",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    AboveThreshold,
    BelowThreshold,
}

text_enum!(AlertKind {
    AboveThreshold => "above_threshold",
    BelowThreshold => "below_threshold",
});

impl AlertKind {
    /// Direction word used in owner notifications.
    pub fn direction(&self) -> &'static str {
        match self {
            AlertKind::AboveThreshold => "above",
            AlertKind::BelowThreshold => "below",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

text_enum!(AlertStatus {
    Active => "active",
    Acknowledged => "acknowledged",
    Resolved => "resolved",
});

/// A registered field device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub name: String,
    pub device_type: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub api_key: String,
    pub status: DeviceStatus,
    pub firmware_version: Option<String>,
    pub pending_firmware_update: Option<Uuid>,
    pub owner: String,
    pub field: Option<String>,
    pub registration_date: DateTime<Utc>,
    pub activation_date: Option<DateTime<Utc>>,
    pub last_connection_date: Option<DateTime<Utc>>,
    pub last_health_check: Option<Uuid>,
}

/// Registration input; `device_id` is generated when absent
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDevice {
    pub device_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub device_type: String,
    pub description: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub owner: String,
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirmwareUpdate {
    pub id: Uuid,
    pub device_id: String,
    pub previous_version: Option<String>,
    pub new_version: String,
    pub status: FirmwareStatus,
    pub initiated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub installed_version: Option<String>,
    pub error_message: Option<String>,
}

/// One entry of the error list a device reports with its health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthError {
    pub severity: ErrorSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Raw health metrics submitted by a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub battery_level: f64,
    pub signal_strength: f64,
    pub memory_usage: f64,
    pub temperature: f64,
    #[serde(default)]
    pub errors: Vec<HealthError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub id: Uuid,
    pub device_id: String,
    pub battery_level: f64,
    pub signal_strength: f64,
    pub memory_usage: f64,
    pub temperature: f64,
    pub errors: Vec<HealthError>,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LastReading {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensor {
    pub id: Uuid,
    pub name: String,
    pub kind: String,
    pub unit: Option<String>,
    pub device_id: Option<String>,
    pub calibration_offset: Option<f64>,
    pub calibration_multiplier: Option<f64>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
    pub last_reading: Option<LastReading>,
    pub last_calibration_date: Option<DateTime<Utc>>,
    pub calibration_history: Vec<Uuid>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSensor {
    pub name: String,
    #[serde(default)]
    pub kind: String,
    pub unit: Option<String>,
    pub device_id: Option<String>,
    pub calibration_offset: Option<f64>,
    pub calibration_multiplier: Option<f64>,
    pub min_threshold: Option<f64>,
    pub max_threshold: Option<f64>,
}

/// Audit record of a single calibration change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    pub id: Uuid,
    pub sensor_id: Uuid,
    pub previous_offset: Option<f64>,
    pub previous_multiplier: Option<f64>,
    pub new_offset: f64,
    pub new_multiplier: f64,
    pub reference_value: Option<f64>,
    pub measured_value: Option<f64>,
    pub calibrated_by: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationRequest {
    pub offset: Option<f64>,
    pub multiplier: Option<f64>,
    pub reference_value: Option<f64>,
    pub measured_value: Option<f64>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub id: Uuid,
    pub sensor_id: Uuid,
    pub device_id: String,
    pub raw_value: f64,
    pub processed_value: f64,
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
    pub metadata: Metadata,
}

/// A single reading as submitted by a device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingInput {
    pub sensor_id: String,
    pub value: f64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Wire format of a telemetry batch (HTTP body and MQTT payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryBatch {
    #[serde(default)]
    pub device_id: Option<String>,
    pub sensor_data: Vec<ReadingInput>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub sensor_id: Uuid,
    pub device_id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Paging for history queries
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct HistoryOptions {
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl HistoryOptions {
    pub const DEFAULT_LIMIT: usize = 20;

    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }

    pub fn skip(&self) -> usize {
        self.skip.unwrap_or(0)
    }
}
