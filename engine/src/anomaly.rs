use crate::errors::{Error, Result, ResultExt};
use crate::metrics::ANOMALIES_TOTAL;
use crate::model::{Alert, AlertKind, AlertStatus, Device};
use crate::notify::{Notification, NotificationKind, Priority, Subject};
use crate::service::IotService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Checks a calibrated value against a sensor's threshold band.
///
/// Bounds are exclusive: a value equal to a threshold is in band. The
/// lower bound is checked first, so a value breaching both (only possible
/// with min > max) reports `BelowThreshold`.
pub fn detect(value: f64, min: Option<f64>, max: Option<f64>) -> Option<(AlertKind, f64)> {
    if let Some(min) = min {
        if value < min {
            return Some((AlertKind::BelowThreshold, min));
        }
    }
    if let Some(max) = max {
        if value > max {
            return Some((AlertKind::AboveThreshold, max));
        }
    }
    None
}

/// One threshold breach found while processing a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub sensor_id: Uuid,
    pub sensor_name: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub timestamp: DateTime<Utc>,
}

fn anomaly_notification(device: &Device, anomaly: &Anomaly) -> Notification {
    Notification {
        user_id: device.owner.clone(),
        title: format!("Sensor Alert: {}", anomaly.sensor_name),
        message: format!(
            "{} has reported a value of {} which is {} the threshold of {}.",
            anomaly.sensor_name,
            anomaly.value,
            anomaly.kind.direction(),
            anomaly.threshold
        ),
        kind: NotificationKind::Warning,
        priority: Priority::High,
        action_required: true,
        action_link: format!("/sensors/{}", anomaly.sensor_id),
        subject: Subject::Sensor(anomaly.sensor_id.to_string()),
        field: device.field.clone(),
    }
}

impl IotService {
    /// Persists an active alert for the anomaly and notifies the device
    /// owner. Every breach gets its own alert; nothing is coalesced.
    pub(crate) async fn raise_alert(&self, device: &Device, anomaly: &Anomaly) -> Result<Alert> {
        let alert = Alert {
            id: Uuid::new_v4(),
            sensor_id: anomaly.sensor_id,
            device_id: device.device_id.clone(),
            kind: anomaly.kind,
            value: anomaly.value,
            threshold: anomaly.threshold,
            timestamp: anomaly.timestamp,
            status: AlertStatus::Active,
            resolved_by: None,
            resolved_at: None,
        };

        self.store.insert_alert(&alert).await?;
        ANOMALIES_TOTAL
            .with_label_values(&[anomaly.kind.as_str()])
            .inc();

        warn!(
            device_id = %device.device_id,
            sensor_id = %anomaly.sensor_id,
            value = anomaly.value,
            threshold = anomaly.threshold,
            "Sensor reading {} threshold",
            anomaly.kind.direction()
        );

        self.dispatch(anomaly_notification(device, anomaly)).await;
        Ok(alert)
    }

    /// Active alerts across every device the user owns, newest first.
    pub async fn get_active_alerts_for_owner(&self, owner_id: &str) -> Result<Vec<Alert>> {
        let device_ids: Vec<String> = self
            .store
            .devices_by_owner(owner_id)
            .await
            .context("get active alerts")?
            .into_iter()
            .map(|d| d.device_id)
            .collect();

        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        self.store
            .active_alerts_for_devices(&device_ids)
            .await
            .context("get active alerts")
    }

    /// Moves an alert between active, acknowledged and resolved. Leaving
    /// the active state stamps who did it and when.
    #[instrument(skip(self))]
    pub async fn update_alert_status(
        &self,
        alert_id: &str,
        status: AlertStatus,
        user_id: &str,
    ) -> Result<Alert> {
        let id = Uuid::parse_str(alert_id).map_err(|_| Error::not_found("alert", alert_id))?;
        let mut alert = self
            .store
            .get_alert(id)
            .await
            .context("update alert")?
            .ok_or_else(|| Error::not_found("alert", alert_id))?;

        alert.status = status;
        if matches!(status, AlertStatus::Acknowledged | AlertStatus::Resolved) {
            alert.resolved_by = Some(user_id.to_string());
            alert.resolved_at = Some(Utc::now());
        }

        self.store.update_alert(&alert).await.context("update alert")?;

        info!(status = %alert.status, "Alert status updated");
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundaries_are_not_anomalies() {
        assert_eq!(detect(10.0, Some(10.0), Some(50.0)), None);
        assert_eq!(detect(50.0, Some(10.0), Some(50.0)), None);
    }

    #[test]
    fn test_one_unit_outside_band() {
        assert_eq!(
            detect(9.0, Some(10.0), Some(50.0)),
            Some((AlertKind::BelowThreshold, 10.0))
        );
        assert_eq!(
            detect(51.0, Some(10.0), Some(50.0)),
            Some((AlertKind::AboveThreshold, 50.0))
        );
    }

    #[test]
    fn test_missing_bounds_are_ignored() {
        assert_eq!(detect(-1e9, None, Some(50.0)), None);
        assert_eq!(detect(1e9, Some(0.0), None), None);
        assert_eq!(detect(42.0, None, None), None);
    }

    #[test]
    fn test_below_wins_when_both_breached() {
        // Inverted band: 30 is below min 40 and above max 20
        assert_eq!(
            detect(30.0, Some(40.0), Some(20.0)),
            Some((AlertKind::BelowThreshold, 40.0))
        );
    }

    #[test]
    fn test_anomaly_notification_text() {
        let device = Device {
            device_id: "dev-abc".to_string(),
            name: "Station".to_string(),
            device_type: "weather_station".to_string(),
            description: None,
            manufacturer: None,
            model: None,
            api_key: String::new(),
            status: crate::model::DeviceStatus::Active,
            firmware_version: None,
            pending_firmware_update: None,
            owner: "user-1".to_string(),
            field: Some("field-3".to_string()),
            registration_date: Utc::now(),
            activation_date: None,
            last_connection_date: None,
            last_health_check: None,
        };
        let sensor_id = Uuid::new_v4();
        let anomaly = Anomaly {
            sensor_id,
            sensor_name: "Soil temp".to_string(),
            kind: AlertKind::AboveThreshold,
            value: 61.0,
            threshold: 50.0,
            timestamp: Utc::now(),
        };

        let n = anomaly_notification(&device, &anomaly);
        assert_eq!(n.title, "Sensor Alert: Soil temp");
        assert_eq!(
            n.message,
            "Soil temp has reported a value of 61 which is above the threshold of 50."
        );
        assert_eq!(n.action_link, format!("/sensors/{}", sensor_id));
        assert_eq!(n.priority, Priority::High);
        assert_eq!(n.field.as_deref(), Some("field-3"));
    }
}
