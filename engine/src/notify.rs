use crate::errors::{Error, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, QoS};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// What a notification is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Subject {
    Device(String),
    Sensor(String),
}

/// Message for a device owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub user_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub priority: Priority,
    pub action_required: bool,
    pub action_link: String,
    pub subject: Subject,
    pub field: Option<String>,
}

/// Delivery channel for owner notifications.
///
/// The engine treats delivery as fire-and-forget: an error returned here
/// is logged and counted but never undoes the operation that raised it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, n: Notification) -> Result<()> {
        info!(
            user_id = %n.user_id,
            priority = ?n.priority,
            link = %n.action_link,
            "{}: {}",
            n.title,
            n.message
        );
        Ok(())
    }
}

/// Publishes notifications as JSON on `<prefix>/<user_id>`
#[derive(Clone)]
pub struct MqttNotifier {
    client: AsyncClient,
    topic_prefix: String,
}

impl MqttNotifier {
    pub fn new(client: AsyncClient, topic_prefix: impl Into<String>) -> Self {
        Self {
            client,
            topic_prefix: topic_prefix.into(),
        }
    }

    fn topic_for(&self, user_id: &str) -> String {
        format!("{}/{}", self.topic_prefix.trim_end_matches('/'), user_id)
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let topic = self.topic_for(&notification.user_id);
        let payload = serde_json::to_vec(&notification)?;

        // try_publish keeps a full request queue from stalling the caller
        self.client
            .try_publish(&topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| {
                warn!(topic = %topic, "notification not queued: {}", e);
                Error::Notification(e.to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::MqttOptions;

    fn sample() -> Notification {
        Notification {
            user_id: "user-7".to_string(),
            title: "Sensor Alert: Soil gauge".to_string(),
            message: "Soil gauge has reported a value of 61 which is above the threshold of 50."
                .to_string(),
            kind: NotificationKind::Warning,
            priority: Priority::High,
            action_required: true,
            action_link: "/sensors/abc".to_string(),
            subject: Subject::Sensor("abc".to_string()),
            field: Some("field-1".to_string()),
        }
    }

    #[test]
    fn test_notification_wire_format() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["type"], "warning");
        assert_eq!(json["priority"], "high");
        assert_eq!(json["actionRequired"], true);
        assert_eq!(json["subject"]["kind"], "sensor");
        assert_eq!(json["subject"]["id"], "abc");
    }

    #[test]
    fn test_tracing_notifier_never_fails() {
        tokio_test::block_on(async {
            assert!(TracingNotifier.notify(sample()).await.is_ok());
        });
    }

    #[tokio::test]
    async fn test_mqtt_notifier_queues_on_user_topic() {
        let options = MqttOptions::new("notifier-test", "localhost", 1883);
        let (client, eventloop) = AsyncClient::new(options, 10);
        let notifier = MqttNotifier::new(client, "notifications/");

        assert_eq!(notifier.topic_for("user-7"), "notifications/user-7");
        assert!(notifier.notify(sample()).await.is_ok());
        drop(eventloop);
    }
}
