use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub sensor_id: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Payload published to `devices/<id>/data`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorBatch {
    pub device_id: String,
    pub sensor_data: Vec<Reading>,
}

impl SensorBatch {
    /// One reading per sensor; `outlier_share` of them land far outside the
    /// normal band so the engine has something to alert on.
    pub fn random(
        rng: &mut impl Rng,
        device_id: String,
        sensor_ids: &[String],
        outlier_share: f64,
    ) -> Self {
        let timestamp = Utc::now();
        let sensor_data = sensor_ids
            .iter()
            .map(|sensor_id| {
                let value = if rng.gen_bool(outlier_share) {
                    rng.gen_range(-50.0..100.0)
                } else {
                    rng.gen_range(15.0..35.0)
                };
                Reading {
                    sensor_id: sensor_id.clone(),
                    value,
                    timestamp,
                }
            })
            .collect();

        Self {
            device_id,
            sensor_data,
        }
    }

    pub fn topic(&self) -> String {
        format!("devices/{}/data", self.device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_wire_format() {
        let mut rng = rand::thread_rng();
        let sensors = vec!["7d0c3f52-1b7e-4f0e-9a51-3f4b1f1c2a10".to_string()];
        let batch = SensorBatch::random(&mut rng, "dev-abc".to_string(), &sensors, 0.0);

        assert_eq!(batch.topic(), "devices/dev-abc/data");

        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["deviceId"], "dev-abc");
        assert_eq!(json["sensorData"][0]["sensorId"], sensors[0].as_str());
        let value = json["sensorData"][0]["value"].as_f64().unwrap();
        assert!((15.0..35.0).contains(&value));
    }
}
