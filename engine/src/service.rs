use crate::errors::{Error, Result};
use crate::locks::KeyedLocks;
use crate::metrics::NOTIFICATION_FAILURES_TOTAL;
use crate::model::Device;
use crate::notify::{Notification, Notifier};
use crate::store::Store;
use std::sync::Arc;
use tracing::warn;

/// Device lifecycle and telemetry engine.
///
/// Operations are spread over the component modules (`registry`,
/// `firmware`, `health`, `calibration`, `anomaly`, `pipeline`); this type
/// only carries the injected collaborators and the sequencing state they
/// share.
pub struct IotService {
    pub(crate) store: Arc<dyn Store>,
    notifier: Arc<dyn Notifier>,
    pub(crate) device_locks: KeyedLocks,
    pub(crate) sensor_locks: KeyedLocks,
}

impl IotService {
    pub fn new(store: Arc<dyn Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            device_locks: KeyedLocks::new(),
            sensor_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) async fn load_device(&self, device_id: &str) -> Result<Device> {
        self.store
            .get_device(device_id)
            .await?
            .ok_or_else(|| Error::not_found("device", device_id))
    }

    /// Fire-and-forget delivery; failures are logged and counted only.
    pub(crate) async fn dispatch(&self, notification: Notification) {
        let user_id = notification.user_id.clone();
        if let Err(e) = self.notifier.notify(notification).await {
            NOTIFICATION_FAILURES_TOTAL.inc();
            warn!(user_id = %user_id, "Failed to deliver notification: {}", e);
        }
    }
}
