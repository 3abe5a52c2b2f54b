use crate::errors::{Error, Result, ResultExt};
use crate::model::{Device, FirmwareStatus, FirmwareUpdate};
use crate::service::IotService;
use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const FAILED_UPDATE_MESSAGE: &str = "Firmware update failed";

impl IotService {
    /// Starts a firmware update: none -> pending.
    ///
    /// A device holds at most one pending update. Starting another one
    /// while it is in flight fails with `InvalidState` instead of
    /// orphaning the earlier record.
    #[instrument(skip(self))]
    pub async fn update_firmware(&self, device_id: &str, new_version: &str) -> Result<Device> {
        if new_version.trim().is_empty() {
            return Err(Error::Validation("Firmware version cannot be empty".to_string()));
        }

        let _guard = self.device_locks.lock(device_id).await;
        let mut device = self.load_device(device_id).await.context("update firmware")?;

        if let Some(pending_id) = device.pending_firmware_update {
            match self
                .store
                .get_firmware_update(pending_id)
                .await
                .context("update firmware")?
            {
                Some(pending) if pending.status == FirmwareStatus::Pending => {
                    return Err(Error::InvalidState(format!(
                        "device {} already has pending firmware update {} to {}",
                        device_id, pending.id, pending.new_version
                    )));
                }
                // Pointer outlived its record (e.g. an earlier completion
                // stored the record but not the device); safe to replace.
                _ => warn!(%pending_id, "Replacing stale pending firmware pointer"),
            }
        }

        let update = FirmwareUpdate {
            id: Uuid::new_v4(),
            device_id: device.device_id.clone(),
            previous_version: device.firmware_version.clone(),
            new_version: new_version.to_string(),
            status: FirmwareStatus::Pending,
            initiated_at: Utc::now(),
            completed_at: None,
            installed_version: None,
            error_message: None,
        };

        self.store
            .insert_firmware_update(&update)
            .await
            .context("update firmware")?;

        device.pending_firmware_update = Some(update.id);
        self.store
            .update_device(&device)
            .await
            .context("update firmware")?;

        info!(
            update_id = %update.id,
            from = ?update.previous_version,
            to = %update.new_version,
            "Firmware update pending"
        );
        Ok(device)
    }

    /// Closes the pending update: pending -> completed | failed.
    ///
    /// Either way the device's pending pointer is cleared and its
    /// connection date refreshed; only a successful install changes the
    /// device's firmware version.
    #[instrument(skip(self))]
    pub async fn complete_firmware_update(
        &self,
        device_id: &str,
        installed_version: &str,
        success: bool,
    ) -> Result<Device> {
        let _guard = self.device_locks.lock(device_id).await;
        let mut device = self
            .load_device(device_id)
            .await
            .context("complete firmware update")?;

        let pending_id = device.pending_firmware_update.ok_or_else(|| {
            Error::InvalidState(format!("device {} has no pending firmware update", device_id))
        })?;

        let mut update = self
            .store
            .get_firmware_update(pending_id)
            .await
            .context("complete firmware update")?
            .ok_or_else(|| Error::not_found("firmware update", pending_id.to_string()))?;

        if update.status != FirmwareStatus::Pending {
            return Err(Error::InvalidState(format!(
                "firmware update {} is already {}",
                update.id, update.status
            )));
        }

        let now = Utc::now();
        update.completed_at = Some(now);
        if success {
            update.status = FirmwareStatus::Completed;
            update.installed_version = Some(installed_version.to_string());
        } else {
            update.status = FirmwareStatus::Failed;
            update.error_message = Some(FAILED_UPDATE_MESSAGE.to_string());
        }

        self.store
            .update_firmware_update(&update)
            .await
            .context("complete firmware update")?;

        if success {
            device.firmware_version = Some(installed_version.to_string());
        }
        device.pending_firmware_update = None;
        device.last_connection_date = Some(now);

        self.store
            .update_device(&device)
            .await
            .context("complete firmware update")?;

        if success {
            info!(
                update_id = %update.id,
                version = %installed_version,
                "Firmware update completed"
            );
        } else {
            warn!(update_id = %update.id, "Firmware update failed on device");
        }
        Ok(device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::model::NewDevice;
    use crate::notify::TracingNotifier;
    use crate::store::Store;
    use std::sync::Arc;

    async fn point_pending_at(store: &MemoryStore, update_id: Uuid) {
        let mut device = store.get_device("dev-fw").await.unwrap().unwrap();
        device.pending_firmware_update = Some(update_id);
        store.update_device(&device).await.unwrap();
    }

    async fn setup() -> (IotService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let svc = IotService::new(store.clone(), Arc::new(TracingNotifier));
        svc.register_device(NewDevice {
            device_id: Some("dev-fw".to_string()),
            name: "Gateway".to_string(),
            firmware_version: Some("1.0.0".to_string()),
            owner: "user-1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
        (svc, store)
    }

    #[tokio::test]
    async fn test_update_creates_pending_record() {
        let (svc, store) = setup().await;
        let device = svc.update_firmware("dev-fw", "1.1.0").await.unwrap();

        let updates = store.firmware_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(device.pending_firmware_update, Some(updates[0].id));
        assert_eq!(updates[0].status, FirmwareStatus::Pending);
        assert_eq!(updates[0].previous_version.as_deref(), Some("1.0.0"));
        assert_eq!(updates[0].new_version, "1.1.0");
    }

    #[tokio::test]
    async fn test_second_update_while_pending_is_rejected() {
        let (svc, store) = setup().await;
        svc.update_firmware("dev-fw", "1.1.0").await.unwrap();

        let err = svc.update_firmware("dev-fw", "1.2.0").await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(store.firmware_updates().await.len(), 1);
    }

    #[tokio::test]
    async fn test_complete_without_pending_is_invalid_state() {
        let (svc, _store) = setup().await;
        let err = svc
            .complete_firmware_update("dev-fw", "1.1.0", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let (svc, store) = setup().await;
        svc.update_firmware("dev-fw", "1.1.0").await.unwrap();

        let device = svc
            .complete_firmware_update("dev-fw", "1.1.0", true)
            .await
            .unwrap();
        assert_eq!(device.firmware_version.as_deref(), Some("1.1.0"));
        assert!(device.pending_firmware_update.is_none());
        assert!(device.last_connection_date.is_some());

        let update = &store.firmware_updates().await[0];
        assert_eq!(update.status, FirmwareStatus::Completed);
        assert_eq!(update.installed_version.as_deref(), Some("1.1.0"));
        assert!(update.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_failed_completion_keeps_version() {
        let (svc, store) = setup().await;
        svc.update_firmware("dev-fw", "1.1.0").await.unwrap();

        let device = svc
            .complete_firmware_update("dev-fw", "1.1.0", false)
            .await
            .unwrap();
        assert_eq!(device.firmware_version.as_deref(), Some("1.0.0"));
        assert!(device.pending_firmware_update.is_none());

        let update = &store.firmware_updates().await[0];
        assert_eq!(update.status, FirmwareStatus::Failed);
        assert_eq!(update.error_message.as_deref(), Some(FAILED_UPDATE_MESSAGE));
        assert!(update.installed_version.is_none());
    }

    #[tokio::test]
    async fn test_new_update_allowed_after_completion() {
        let (svc, store) = setup().await;
        svc.update_firmware("dev-fw", "1.1.0").await.unwrap();
        svc.complete_firmware_update("dev-fw", "1.1.0", true)
            .await
            .unwrap();

        let device = svc.update_firmware("dev-fw", "1.2.0").await.unwrap();
        assert!(device.pending_firmware_update.is_some());
        let updates = store.firmware_updates().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[1].previous_version.as_deref(), Some("1.1.0"));
    }

    #[tokio::test]
    async fn test_pointer_to_missing_record_is_replaced() {
        let (svc, store) = setup().await;
        point_pending_at(&store, Uuid::new_v4()).await;

        let device = svc.update_firmware("dev-fw", "1.1.0").await.unwrap();
        let updates = store.firmware_updates().await;
        assert_eq!(updates.len(), 1);
        assert_eq!(device.pending_firmware_update, Some(updates[0].id));
    }

    #[tokio::test]
    async fn test_pointer_to_closed_record_is_replaced() {
        let (svc, store) = setup().await;
        svc.update_firmware("dev-fw", "1.1.0").await.unwrap();
        svc.complete_firmware_update("dev-fw", "1.1.0", false)
            .await
            .unwrap();
        let failed = store.firmware_updates().await[0].id;
        point_pending_at(&store, failed).await;

        let device = svc.update_firmware("dev-fw", "1.2.0").await.unwrap();
        let pending = device.pending_firmware_update.unwrap();
        assert_ne!(pending, failed);

        let updates = store.firmware_updates().await;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, FirmwareStatus::Failed);
        assert_eq!(updates[1].id, pending);
        assert_eq!(updates[1].status, FirmwareStatus::Pending);
    }

    #[tokio::test]
    async fn test_complete_with_dangling_pointer_is_not_found() {
        let (svc, store) = setup().await;
        point_pending_at(&store, Uuid::new_v4()).await;

        let err = svc
            .complete_firmware_update("dev-fw", "1.1.0", true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::NotFound {
                entity: "firmware update",
                ..
            }
        ));

        let device = store.get_device("dev-fw").await.unwrap().unwrap();
        assert_eq!(device.firmware_version.as_deref(), Some("1.0.0"));
    }
}
