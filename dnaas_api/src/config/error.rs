use serde::{Deserialize, Serialize};

use crate::primitives::vlan::InvalidVlanError;

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidConfigurationError {
    #[error("Device inventory contains no devices")]
    EmptyInventory,
    #[error("Device '{device}' appears more than once in the inventory")]
    DuplicateDevice { device: String },
    #[error("Device '{device}' has no credentials")]
    MissingCredentials { device: String },
    #[error("Invalid VLAN range: {0}")]
    InvalidVlanRange(#[from] InvalidVlanError),
    #[error("Parallelism bound must be at least 1")]
    InvalidMaxParallel,
    #[error("Invalid value '{value}' for '{variable}'")]
    InvalidEnvOverride { variable: String, value: String },
}
