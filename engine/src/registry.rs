use crate::errors::{Result, ResultExt};
use crate::model::{Device, DeviceStatus, NewDevice};
use crate::service::IotService;
use crate::validate::validate_new_device;
use chrono::Utc;
use rand::RngCore;
use tracing::{info, instrument};

const DEVICE_ID_BYTES: usize = 8;
const API_KEY_BYTES: usize = 32;

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `dev-` followed by 16 hex characters
pub fn generate_device_id() -> String {
    format!("dev-{}", random_hex(DEVICE_ID_BYTES))
}

/// 64 hex characters
pub fn generate_api_key() -> String {
    random_hex(API_KEY_BYTES)
}

impl IotService {
    /// Persists a new device in the `registered` state with a fresh API key.
    /// Not idempotent: registering an existing id fails with `Conflict`.
    #[instrument(skip(self, input), fields(device_id = tracing::field::Empty))]
    pub async fn register_device(&self, input: NewDevice) -> Result<Device> {
        validate_new_device(&input)?;

        let device_id = input.device_id.unwrap_or_else(generate_device_id);
        tracing::Span::current().record("device_id", device_id.as_str());

        let device = Device {
            device_id,
            name: input.name,
            device_type: input.device_type,
            description: input.description,
            manufacturer: input.manufacturer,
            model: input.model,
            api_key: generate_api_key(),
            status: DeviceStatus::Registered,
            firmware_version: input.firmware_version,
            pending_firmware_update: None,
            owner: input.owner,
            field: input.field,
            registration_date: Utc::now(),
            activation_date: None,
            last_connection_date: None,
            last_health_check: None,
        };

        self.store
            .insert_device(&device)
            .await
            .context("register device")?;

        info!(owner = %device.owner, "Device registered");
        Ok(device)
    }

    #[instrument(skip(self))]
    pub async fn activate_device(&self, device_id: &str) -> Result<Device> {
        let _guard = self.device_locks.lock(device_id).await;
        let mut device = self.load_device(device_id).await.context("activate device")?;

        let now = Utc::now();
        device.status = DeviceStatus::Active;
        device.activation_date = Some(now);
        device.last_connection_date = Some(now);

        self.store
            .update_device(&device)
            .await
            .context("activate device")?;

        info!("Device activated");
        Ok(device)
    }

    /// Marks the device inactive; the connection date is left alone.
    #[instrument(skip(self))]
    pub async fn deactivate_device(&self, device_id: &str) -> Result<Device> {
        let _guard = self.device_locks.lock(device_id).await;
        let mut device = self
            .load_device(device_id)
            .await
            .context("deactivate device")?;

        device.status = DeviceStatus::Inactive;

        self.store
            .update_device(&device)
            .await
            .context("deactivate device")?;

        info!("Device deactivated");
        Ok(device)
    }

    pub async fn get_devices_by_field(&self, field_id: &str) -> Result<Vec<Device>> {
        self.store
            .devices_by_field(field_id)
            .await
            .context("get devices by field")
    }

    pub async fn get_devices_by_owner(&self, owner_id: &str) -> Result<Vec<Device>> {
        self.store
            .devices_by_owner(owner_id)
            .await
            .context("get devices by owner")
    }
}
