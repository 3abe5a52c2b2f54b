use crate::errors::{Result, ResultExt};
use crate::metrics::HEALTH_CHECKS_TOTAL;
use crate::model::{
    Device, ErrorSeverity, HealthCheck, HealthMetrics, HealthStatus, HistoryOptions,
};
use crate::notify::{Notification, NotificationKind, Priority, Subject};
use crate::service::IotService;
use crate::validate::validate_health;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CRITICAL_BATTERY: f64 = 10.0;
const CRITICAL_SIGNAL: f64 = 10.0;
const CRITICAL_TEMPERATURE: f64 = 80.0;

const WARNING_BATTERY: f64 = 30.0;
const WARNING_SIGNAL: f64 = 30.0;
const WARNING_MEMORY: f64 = 90.0;
const WARNING_TEMPERATURE: f64 = 70.0;

const MODERATE_BATTERY: f64 = 50.0;
const MODERATE_SIGNAL: f64 = 50.0;
const MODERATE_MEMORY: f64 = 70.0;
const MODERATE_TEMPERATURE: f64 = 60.0;

/// Maps raw metrics to a health tier. Tiers are tested worst-first and the
/// first match wins, so a critical condition always dominates.
pub fn classify(m: &HealthMetrics) -> HealthStatus {
    let critical_error = m
        .errors
        .iter()
        .any(|e| e.severity == ErrorSeverity::Critical);

    if m.battery_level < CRITICAL_BATTERY
        || m.signal_strength < CRITICAL_SIGNAL
        || critical_error
        || m.temperature > CRITICAL_TEMPERATURE
    {
        return HealthStatus::Critical;
    }

    if m.battery_level < WARNING_BATTERY
        || m.signal_strength < WARNING_SIGNAL
        || m.memory_usage > WARNING_MEMORY
        || !m.errors.is_empty()
        || m.temperature > WARNING_TEMPERATURE
    {
        return HealthStatus::Warning;
    }

    if m.battery_level < MODERATE_BATTERY
        || m.signal_strength < MODERATE_SIGNAL
        || m.memory_usage > MODERATE_MEMORY
        || m.temperature > MODERATE_TEMPERATURE
    {
        return HealthStatus::Moderate;
    }

    HealthStatus::Healthy
}

/// Owner notification for a health status, if the status warrants one
fn health_notification(device: &Device, status: HealthStatus) -> Option<Notification> {
    let (kind, priority) = match status {
        HealthStatus::Critical => (NotificationKind::Error, Priority::High),
        HealthStatus::Warning => (NotificationKind::Warning, Priority::Medium),
        HealthStatus::Moderate | HealthStatus::Healthy => return None,
    };

    Some(Notification {
        user_id: device.owner.clone(),
        title: format!("Device Health Alert: {}", device.name),
        message: format!(
            "Your device {} has reported {} health status. Please check device details.",
            device.name, status
        ),
        kind,
        priority,
        action_required: true,
        action_link: format!("/iot/devices/{}", device.device_id),
        subject: Subject::Device(device.device_id.clone()),
        field: device.field.clone(),
    })
}

impl IotService {
    /// Stores a classified health check, points the device at it and
    /// notifies the owner for warning or critical results.
    #[instrument(skip(self, metrics))]
    pub async fn record_health_check(
        &self,
        device_id: &str,
        metrics: HealthMetrics,
    ) -> Result<HealthCheck> {
        validate_health(&metrics)?;

        let (device, check) = {
            let _guard = self.device_locks.lock(device_id).await;
            let mut device = self
                .load_device(device_id)
                .await
                .context("record health check")?;

            let now = Utc::now();
            let check = HealthCheck {
                id: Uuid::new_v4(),
                device_id: device.device_id.clone(),
                status: classify(&metrics),
                battery_level: metrics.battery_level,
                signal_strength: metrics.signal_strength,
                memory_usage: metrics.memory_usage,
                temperature: metrics.temperature,
                errors: metrics.errors,
                timestamp: now,
            };

            self.store
                .insert_health_check(&check)
                .await
                .context("record health check")?;

            device.last_health_check = Some(check.id);
            device.last_connection_date = Some(now);
            self.store
                .update_device(&device)
                .await
                .context("record health check")?;

            (device, check)
        };

        HEALTH_CHECKS_TOTAL
            .with_label_values(&[check.status.as_str()])
            .inc();

        match health_notification(&device, check.status) {
            Some(notification) => {
                warn!(status = %check.status, "Device reported degraded health");
                self.dispatch(notification).await;
            }
            None => info!(status = %check.status, "Health check recorded"),
        }

        Ok(check)
    }

    /// Health checks for a device, newest first (default page of 20).
    pub async fn get_device_health_history(
        &self,
        device_id: &str,
        options: HistoryOptions,
    ) -> Result<Vec<HealthCheck>> {
        let device = self
            .load_device(device_id)
            .await
            .context("get device health history")?;

        self.store
            .health_checks_for_device(&device.device_id, options.limit(), options.skip())
            .await
            .context("get device health history")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HealthError;

    fn healthy() -> HealthMetrics {
        HealthMetrics {
            battery_level: 60.0,
            signal_strength: 80.0,
            memory_usage: 40.0,
            temperature: 50.0,
            errors: vec![],
        }
    }

    fn error(severity: ErrorSeverity) -> HealthError {
        HealthError {
            severity,
            code: None,
            message: Some("sensor bus timeout".to_string()),
        }
    }

    #[test]
    fn test_healthy_baseline() {
        assert_eq!(classify(&healthy()), HealthStatus::Healthy);
    }

    #[test]
    fn test_each_critical_trigger() {
        let cases = [
            HealthMetrics {
                battery_level: 9.9,
                ..healthy()
            },
            HealthMetrics {
                signal_strength: 5.0,
                ..healthy()
            },
            HealthMetrics {
                temperature: 80.5,
                ..healthy()
            },
            HealthMetrics {
                errors: vec![error(ErrorSeverity::Critical)],
                ..healthy()
            },
        ];
        for m in cases {
            assert_eq!(classify(&m), HealthStatus::Critical, "{m:?}");
        }
    }

    #[test]
    fn test_each_warning_trigger() {
        let cases = [
            HealthMetrics {
                battery_level: 29.0,
                ..healthy()
            },
            HealthMetrics {
                signal_strength: 10.0,
                ..healthy()
            },
            HealthMetrics {
                memory_usage: 91.0,
                ..healthy()
            },
            HealthMetrics {
                temperature: 75.0,
                ..healthy()
            },
            HealthMetrics {
                errors: vec![error(ErrorSeverity::Info)],
                ..healthy()
            },
        ];
        for m in cases {
            assert_eq!(classify(&m), HealthStatus::Warning, "{m:?}");
        }
    }

    #[test]
    fn test_each_moderate_trigger() {
        let cases = [
            HealthMetrics {
                battery_level: 45.0,
                ..healthy()
            },
            HealthMetrics {
                signal_strength: 30.0,
                ..healthy()
            },
            HealthMetrics {
                memory_usage: 75.0,
                ..healthy()
            },
            HealthMetrics {
                temperature: 65.0,
                ..healthy()
            },
        ];
        for m in cases {
            assert_eq!(classify(&m), HealthStatus::Moderate, "{m:?}");
        }
    }

    #[test]
    fn test_bounds_are_strict() {
        let m = HealthMetrics {
            battery_level: 10.0,
            signal_strength: 30.0,
            memory_usage: 70.0,
            temperature: 60.0,
            errors: vec![],
        };
        // battery 10 is not critical but is below 30
        assert_eq!(classify(&m), HealthStatus::Warning);

        let m = HealthMetrics {
            battery_level: 50.0,
            signal_strength: 50.0,
            memory_usage: 70.0,
            temperature: 60.0,
            errors: vec![],
        };
        assert_eq!(classify(&m), HealthStatus::Healthy);
    }

    #[test]
    fn test_critical_wins_over_warning() {
        let m = HealthMetrics {
            battery_level: 5.0,
            memory_usage: 95.0,
            temperature: 75.0,
            errors: vec![error(ErrorSeverity::Warning)],
            ..healthy()
        };
        assert_eq!(classify(&m), HealthStatus::Critical);
    }

    #[test]
    fn test_notification_policy() {
        let device = Device {
            device_id: "dev-1".to_string(),
            name: "Pump controller".to_string(),
            device_type: "irrigation_controller".to_string(),
            description: None,
            manufacturer: None,
            model: None,
            api_key: String::new(),
            status: crate::model::DeviceStatus::Active,
            firmware_version: None,
            pending_firmware_update: None,
            owner: "user-9".to_string(),
            field: None,
            registration_date: Utc::now(),
            activation_date: None,
            last_connection_date: None,
            last_health_check: None,
        };

        let critical = health_notification(&device, HealthStatus::Critical).unwrap();
        assert_eq!(critical.kind, NotificationKind::Error);
        assert_eq!(critical.priority, Priority::High);
        assert_eq!(critical.user_id, "user-9");
        assert_eq!(critical.action_link, "/iot/devices/dev-1");
        assert!(critical.message.contains("critical"));

        let warning = health_notification(&device, HealthStatus::Warning).unwrap();
        assert_eq!(warning.priority, Priority::Medium);

        assert!(health_notification(&device, HealthStatus::Moderate).is_none());
        assert!(health_notification(&device, HealthStatus::Healthy).is_none());
    }
}
