use crate::errors::{Error, Result};
use crate::metrics::{
    CHANNEL_FULL_TOTAL, INVALID_MESSAGES_TOTAL, MESSAGES_TOTAL, VALID_MESSAGES_TOTAL,
};
use crate::model::{ReadingInput, TelemetryBatch};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A decoded batch waiting for the ingest worker
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub device_id: String,
    pub readings: Vec<ReadingInput>,
}

/// Builds the client shared by ingestion and the MQTT notifier.
pub fn connect(broker: &str, port: u16, client_id: &str) -> (AsyncClient, EventLoop) {
    info!("Connecting to MQTT broker at {}:{}", broker, port);

    let mut mqtt_options = MqttOptions::new(client_id, broker, port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(false);

    AsyncClient::new(mqtt_options, 10000)
}

pub async fn run_mqtt(
    client: AsyncClient,
    mut eventloop: EventLoop,
    topic: String,
    tx: mpsc::Sender<IngestJob>,
) -> Result<()> {
    // Subscribe to telemetry topic with QoS 1
    client
        .subscribe(&topic, QoS::AtLeastOnce)
        .await
        .map_err(Error::Mqtt)?;

    info!("Subscribed to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    match process_message(&publish.topic, &publish.payload, &tx).await {
                        Ok(()) => {}
                        // Worker is gone; nothing downstream will ever drain again
                        Err(Error::ChannelSend) => return Err(Error::ChannelSend),
                        Err(e) => {
                            warn!("Dropping message on {}: {}", publish.topic, e);
                            INVALID_MESSAGES_TOTAL.inc();
                        }
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Device id from a `devices/<id>/data` style topic
fn device_id_from_topic(topic: &str) -> Option<&str> {
    let mut parts = topic.split('/');
    parts.next()?;
    parts.next().filter(|id| !id.is_empty())
}

/// Decodes a payload into a job. The payload's `deviceId` wins over the
/// topic segment, but the two must agree when both are present.
pub fn decode_batch(topic: &str, payload: &[u8]) -> Result<IngestJob> {
    let batch = serde_json::from_slice::<TelemetryBatch>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    let topic_id = device_id_from_topic(topic);
    let device_id = match (batch.device_id.as_deref(), topic_id) {
        (Some(body), Some(topic)) if body != topic => {
            return Err(Error::Validation(format!(
                "Payload device {} does not match topic device {}",
                body, topic
            )));
        }
        (Some(id), _) | (None, Some(id)) => id.to_string(),
        (None, None) => {
            return Err(Error::Validation("Device ID cannot be empty".to_string()));
        }
    };

    if device_id.trim().is_empty() {
        return Err(Error::Validation("Device ID cannot be empty".to_string()));
    }

    Ok(IngestJob {
        device_id,
        readings: batch.sensor_data,
    })
}

/// Process a single message
async fn process_message(topic: &str, payload: &[u8], tx: &mpsc::Sender<IngestJob>) -> Result<()> {
    let job = decode_batch(topic, payload)?;

    match tx.try_send(job) {
        Ok(()) => {
            VALID_MESSAGES_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Full(job)) => {
            CHANNEL_FULL_TOTAL.inc();
            debug!("Channel full, using blocking send");
            tokio::time::sleep(Duration::from_millis(1)).await;
            tx.send(job).await.map_err(|_| Error::ChannelSend)?;
            VALID_MESSAGES_TOTAL.inc();
            Ok(())
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            error!("Channel closed, cannot queue telemetry batch");
            Err(Error::ChannelSend)
        }
    }
}
