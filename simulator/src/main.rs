mod telemetry;

use clap::Parser;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use telemetry::SensorBatch;
use tracing::{error, info, warn};

/// Publishes synthetic sensor batches for a set of field devices
#[derive(Debug, Parser)]
#[command(name = "simulator")]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    /// Batches per second across all devices
    #[arg(long, env = "RATE", default_value_t = 1000)]
    rate: u64,

    /// Device ids to publish as; defaults to dev-0..dev-N
    #[arg(long, env = "DEVICE_IDS", value_delimiter = ',')]
    device_ids: Vec<String>,

    #[arg(long, env = "DEVICES", default_value_t = 100)]
    devices: usize,

    /// Registered sensor UUIDs included in every batch
    #[arg(long, env = "SENSOR_IDS", value_delimiter = ',')]
    sensor_ids: Vec<String>,

    #[arg(long, env = "OUTLIER_SHARE", default_value_t = 0.05)]
    outlier_share: f64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt::init();

    let device_ids = if args.device_ids.is_empty() {
        (0..args.devices.max(1)).map(|i| format!("dev-{}", i)).collect()
    } else {
        args.device_ids.clone()
    };

    let sensor_ids = if args.sensor_ids.is_empty() {
        warn!("No sensor ids given, generating random ones the engine will not know");
        (0..3).map(|_| uuid::Uuid::new_v4().to_string()).collect()
    } else {
        args.sensor_ids.clone()
    };

    let rate = args.rate.max(1);
    let outlier_share = args.outlier_share.clamp(0.0, 1.0);

    info!("Starting IoT Simulator");
    info!(
        "Broker: {}:{}, Rate: {} batch/s, Devices: {}, Sensors: {}",
        args.broker,
        args.port,
        rate,
        device_ids.len(),
        sensor_ids.len()
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish sensor batches");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;

    const BURST_SIZE: u64 = 200;
    let burst_interval = Duration::from_millis((BURST_SIZE * 1000) / rate);

    info!(
        "Publishing in bursts of {} batches every {:?}",
        BURST_SIZE, burst_interval
    );

    loop {
        let burst_start = std::time::Instant::now();

        for _ in 0..BURST_SIZE {
            let device_id = device_ids[(counter % device_ids.len() as u64) as usize].clone();
            let batch = SensorBatch::random(&mut rng, device_id, &sensor_ids, outlier_share);

            let payload = match serde_json::to_string(&batch) {
                Ok(p) => p,
                Err(e) => {
                    error!("Failed to serialize sensor batch: {}", e);
                    continue;
                }
            };

            match client
                .publish(batch.topic(), QoS::AtLeastOnce, false, payload)
                .await
            {
                Ok(_) => counter += 1,
                Err(e) => warn!("Failed to publish: {}", e),
            }
        }

        if counter % 10000 == 0 {
            info!("Published {} batches", counter);
        }

        let elapsed = burst_start.elapsed();
        if elapsed < burst_interval {
            tokio::time::sleep(burst_interval - elapsed).await;
        } else if elapsed > burst_interval * 2 {
            warn!(
                "Burst took {:?}, target was {:?}, broker may be overloaded",
                elapsed, burst_interval
            );
        }
    }
}
