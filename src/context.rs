use std::sync::Arc;

use dnaas_api::config::{DeviceInventory, ServiceSettings};
use dnosutils::ssh::SshTimeouts;

use crate::executor::DeviceLocks;

/// Everything an operation needs, injected rather than global: the read-only
/// inventory, the service settings, and the per-device lock registry shared
/// by all executors in this process.
pub struct ServiceContext {
    pub inventory: DeviceInventory,
    pub settings: ServiceSettings,
    pub device_locks: Arc<DeviceLocks>,
}

impl ServiceContext {
    pub fn new(inventory: DeviceInventory, settings: ServiceSettings) -> Self {
        Self {
            inventory,
            settings,
            device_locks: Arc::new(DeviceLocks::new()),
        }
    }

    pub fn ssh_timeouts(&self) -> SshTimeouts {
        SshTimeouts {
            connect: self.settings.connect_timeout(),
            command: self.settings.command_timeout(),
        }
    }
}
