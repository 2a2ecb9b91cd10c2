mod error;
mod inventory;
mod service;

pub use error::InvalidConfigurationError;
pub use inventory::{Chassis, DeviceInfo, DeviceInventory, DeviceNameInfo, DeviceRole};
pub use service::{ServiceSettings, UserPolicy};
