use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::InvalidConfigurationError;
use crate::constants::{self, env_vars};
use crate::error::{DnaasError, InitializationError, ReportError, ValidationError};
use crate::primitives::vlan::{VlanId, VlanRangeSet};

/// Per-user editing policy. Users without an entry may assign nothing.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserPolicy {
    /// Admins bypass the VLAN-range check.
    #[serde(default)]
    pub admin: bool,

    /// VLAN ranges this user may assign and deploy.
    #[serde(default)]
    pub allowed_vlans: VlanRangeSet,
}

/// Service-wide settings, loaded from the settings file and overridden by
/// `DNAAS_*` environment variables.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSettings {
    pub inventory_path: PathBuf,
    pub datastore_path: PathBuf,

    /// Bound on concurrently serviced devices.
    pub max_parallel: usize,

    /// Per-command read timeout, in seconds.
    pub command_timeout_secs: u64,

    /// SSH connect timeout, in seconds.
    pub connect_timeout_secs: u64,

    /// VLAN ids in this range denote globally scoped bridge domains.
    pub global_vlan_range: VlanRangeSet,

    /// Editing policies keyed by user name.
    pub users: BTreeMap<String, UserPolicy>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            inventory_path: PathBuf::from(constants::DNAAS_INVENTORY_PATH),
            datastore_path: PathBuf::from(constants::DNAAS_DATASTORE_PATH),
            max_parallel: constants::DEFAULT_MAX_PARALLEL,
            command_timeout_secs: constants::DEFAULT_COMMAND_TIMEOUT_SECS,
            connect_timeout_secs: constants::DEFAULT_CONNECT_TIMEOUT_SECS,
            global_vlan_range: constants::DEFAULT_GLOBAL_VLAN_RANGE.parse().unwrap(),
            users: BTreeMap::new(),
        }
    }
}

impl ServiceSettings {
    /// Loads settings from a YAML file and applies environment overrides. A
    /// missing file yields the defaults; a malformed file is fatal.
    pub fn load(path: &Path) -> Result<Self, DnaasError> {
        let mut settings = if path.exists() {
            let contents =
                std::fs::read_to_string(path).structured(InitializationError::LoadSettings {
                    path: path.display().to_string(),
                })?;
            serde_yaml::from_str(&contents).structured(InitializationError::ParseSettings)?
        } else {
            Self::default()
        };
        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), DnaasError> {
        if let Ok(value) = std::env::var(env_vars::INVENTORY_PATH) {
            self.inventory_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var(env_vars::DATASTORE_PATH) {
            self.datastore_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var(env_vars::MAX_PARALLEL) {
            self.max_parallel = parse_env(env_vars::MAX_PARALLEL, &value)?;
        }
        if let Ok(value) = std::env::var(env_vars::COMMAND_TIMEOUT_SECS) {
            self.command_timeout_secs = parse_env(env_vars::COMMAND_TIMEOUT_SECS, &value)?;
        }
        if let Ok(value) = std::env::var(env_vars::CONNECT_TIMEOUT_SECS) {
            self.connect_timeout_secs = parse_env(env_vars::CONNECT_TIMEOUT_SECS, &value)?;
        }
        if let Ok(value) = std::env::var(env_vars::GLOBAL_VLAN_RANGE) {
            self.global_vlan_range = value.parse().map_err(|e| {
                DnaasError::new(ValidationError::InvalidConfiguration(
                    InvalidConfigurationError::InvalidVlanRange(e),
                ))
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), DnaasError> {
        if self.max_parallel == 0 {
            return Err(DnaasError::new(ValidationError::InvalidConfiguration(
                InvalidConfigurationError::InvalidMaxParallel,
            )));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Whether `user` may operate on `vlan`. Admins bypass the range check;
    /// unknown users are denied everything.
    pub fn permits(&self, user: &str, vlan: VlanId) -> bool {
        match self.users.get(user) {
            Some(policy) if policy.admin => true,
            Some(policy) => policy.allowed_vlans.contains(vlan),
            None => false,
        }
    }

    pub fn is_admin(&self, user: &str) -> bool {
        self.users.get(user).is_some_and(|p| p.admin)
    }
}

fn parse_env<T: std::str::FromStr>(variable: &str, value: &str) -> Result<T, DnaasError> {
    value.parse().map_err(|_| {
        DnaasError::new(ValidationError::InvalidConfiguration(
            InvalidConfigurationError::InvalidEnvOverride {
                variable: variable.to_string(),
                value: value.to_string(),
            },
        ))
    })
}
