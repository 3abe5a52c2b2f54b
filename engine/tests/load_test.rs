use chrono::Utc;
use iot_engine::model::{NewDevice, NewSensor, ReadingInput, TelemetryBatch};
use iot_engine::mqtt::IngestJob;
use iot_engine::notify::TracingNotifier;
use iot_engine::{worker, IotService, MemoryStore};
use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;
use uuid::Uuid;

fn random_batch(rng: &mut impl Rng, device_id: &str, sensors: &[Uuid]) -> TelemetryBatch {
    let sensor_data = sensors
        .iter()
        .map(|id| ReadingInput {
            sensor_id: id.to_string(),
            value: if rng.gen_bool(0.05) {
                rng.gen_range(-50.0..100.0)
            } else {
                rng.gen_range(15.0..35.0)
            },
            timestamp: Some(Utc::now()),
            metadata: None,
        })
        .collect();

    TelemetryBatch {
        device_id: Some(device_id.to_string()),
        sensor_data,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_pipeline_throughput_in_memory() {
    println!("\n🚀 Starting In-Process Pipeline Load Test");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let devices = 20;
    let batches_per_device = 250;
    let total_batches = devices * batches_per_device;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(IotService::new(store.clone(), Arc::new(TracingNotifier)));

    let mut sensors = Vec::new();
    for (name, max) in [("Temperature", 40.0), ("Humidity", 90.0)] {
        let sensor = service
            .create_sensor(NewSensor {
                name: name.to_string(),
                max_threshold: Some(max),
                ..Default::default()
            })
            .await
            .unwrap();
        sensors.push(sensor.id);
    }
    for d in 0..devices {
        service
            .register_device(NewDevice {
                device_id: Some(format!("load-dev-{}", d)),
                name: format!("Load device {}", d),
                owner: "load-owner".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
    }

    let (tx, rx) = mpsc::channel(1000);
    let worker = tokio::spawn(worker::run_ingest_worker(rx, service.clone(), 16, 5_000));

    let start = Instant::now();
    let mut rng = rand::thread_rng();
    for i in 0..total_batches {
        let device_id = format!("load-dev-{}", i % devices);
        let batch = random_batch(&mut rng, &device_id, &sensors);
        tx.send(IngestJob {
            device_id,
            readings: batch.sensor_data,
        })
        .await
        .unwrap();
    }
    drop(tx);
    worker.await.unwrap();
    let duration = start.elapsed();

    let stored = store.readings().await.len();
    let rate = total_batches as f64 / duration.as_secs_f64();

    println!("\n📈 Results:");
    println!("  Batches:        {}", total_batches);
    println!("  Readings:       {}", stored);
    println!("  Alerts:         {}", store.alerts().await.len());
    println!("  Duration:       {:.2}s", duration.as_secs_f64());
    println!("  Batch Rate:     {:.2} batch/s", rate);

    assert_eq!(stored, total_batches * sensors.len());
    assert!(rate >= 1000.0, "Throughput too low: {:.2} batch/s", rate);
}

#[tokio::test]
#[ignore]
async fn test_broker_publish_1000_batches_per_second() {
    println!("\n🚀 Starting Broker Load Test: 1000 batch/s");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let test_duration_secs = 10;
    let target_rate = 1000;
    let total_messages = test_duration_secs * target_rate;
    let sensors: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

    let mut mqtt_options = MqttOptions::new("load-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    sleep(Duration::from_millis(500)).await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;

    let burst_size = 100;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate as u64);
    let mut rng = rand::thread_rng();

    for batch_start in (0..total_messages).step_by(burst_size as usize) {
        for i in batch_start..std::cmp::min(batch_start + burst_size, total_messages) {
            let device_id = format!("load-test-dev-{}", i % 10);
            let batch = random_batch(&mut rng, &device_id, &sensors);
            let payload = serde_json::to_string(&batch).unwrap();

            match client
                .publish(
                    format!("devices/{}/data", device_id),
                    QoS::AtLeastOnce,
                    false,
                    payload,
                )
                .await
            {
                Ok(_) => sent_count += 1,
                Err(e) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
            }
        }

        sleep(delay_per_burst).await;
    }

    let duration = start.elapsed();
    let actual_rate = sent_count as f64 / duration.as_secs_f64();

    println!("\n📈 Results:");
    println!("  Total Sent:     {}", sent_count);
    println!("  Errors:         {}", error_count);
    println!("  Duration:       {:.2}s", duration.as_secs_f64());
    println!("  Actual Rate:    {:.2} batch/s", actual_rate);

    assert!(
        actual_rate >= 900.0,
        "Throughput too low: {:.2} batch/s (expected >= 900)",
        actual_rate
    );
    assert_eq!(error_count, 0, "Too many errors: {}", error_count);
}
