use std::collections::BTreeMap;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::InvalidConfigurationError;
use crate::error::{DnaasError, InitializationError, ReportError, ValidationError};

lazy_static! {
    /// Fleet naming convention: `DNAAS-<ROLE>-<ROW><RACK>[-NCC<n>]`.
    static ref DEVICE_NAME: Regex =
        Regex::new(r"^DNAAS-(?P<role>[A-Z]+)-(?P<row>[A-Z])(?P<rack>\d+)(?:-NCC(?P<ncc>\d))?$")
            .unwrap();
}

#[derive(
    Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeviceRole {
    Leaf,
    Spine,
    Superspine,
}

/// Fields derived from a conforming device name. Non-conforming names are
/// allowed in the inventory; they simply carry no derived fields.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceNameInfo {
    pub role: Option<DeviceRole>,
    pub row: String,
    pub rack: String,
    /// Routing-engine variant for superspine chassis (`NCC0`, `NCC1`).
    pub ncc_variant: Option<u8>,
}

impl DeviceNameInfo {
    pub fn parse(name: &str) -> Option<Self> {
        let caps = DEVICE_NAME.captures(name)?;
        Some(Self {
            role: caps["role"].parse().ok(),
            row: caps["row"].to_string(),
            rack: caps["rack"].to_string(),
            ncc_variant: caps.name("ncc").map(|m| m.as_str().parse().unwrap()),
        })
    }
}

/// Returns the logical chassis name: the device name with any `-NCC<n>`
/// suffix removed.
pub fn chassis_name(device_name: &str) -> &str {
    match device_name.rfind("-NCC") {
        Some(idx) if DEVICE_NAME.is_match(device_name) => &device_name[..idx],
        _ => device_name,
    }
}

/// Connection details for one device, as listed in the inventory file.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    pub name: String,

    /// Management address.
    pub host: String,

    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    pub username: String,

    /// Plaintext password, or `env:<VAR>` to resolve from the environment at
    /// load time.
    pub password: String,

    /// Explicit role; derived from the name when omitted.
    #[serde(default)]
    pub role: Option<DeviceRole>,
}

fn default_ssh_port() -> u16 {
    22
}

impl DeviceInfo {
    /// The device's role, explicit or derived from its name.
    pub fn role(&self) -> Option<DeviceRole> {
        self.role
            .or_else(|| DeviceNameInfo::parse(&self.name).and_then(|i| i.role))
    }

    pub fn name_info(&self) -> Option<DeviceNameInfo> {
        DeviceNameInfo::parse(&self.name)
    }
}

/// A logical chassis, consolidating superspine `NCC0`/`NCC1` routing-engine
/// variants into one selectable entity. Non-chassis devices appear with an
/// empty variant list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Chassis {
    pub name: String,
    pub variants: Vec<String>,
    pub role: Option<DeviceRole>,
}

/// The device inventory, read-only after load.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeviceInventory {
    devices: BTreeMap<String, DeviceInfo>,
}

impl DeviceInventory {
    /// Loads the inventory from a YAML file. Any failure here is fatal to
    /// startup.
    pub fn load(path: &Path) -> Result<Self, DnaasError> {
        let contents = std::fs::read_to_string(path).structured(InitializationError::LoadInventory {
            path: path.display().to_string(),
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, DnaasError> {
        let listed: Vec<DeviceInfo> =
            serde_yaml::from_str(contents).structured(InitializationError::ParseInventory)?;

        if listed.is_empty() {
            return Err(DnaasError::new(ValidationError::InvalidConfiguration(
                InvalidConfigurationError::EmptyInventory,
            )));
        }

        let mut devices = BTreeMap::new();
        for mut device in listed {
            if device.username.is_empty() || device.password.is_empty() {
                return Err(DnaasError::new(ValidationError::InvalidConfiguration(
                    InvalidConfigurationError::MissingCredentials {
                        device: device.name,
                    },
                )));
            }

            if let Some(variable) = device.password.strip_prefix("env:") {
                device.password = std::env::var(variable).structured(
                    InitializationError::ResolvePasswordVariable {
                        device: device.name.clone(),
                        variable: variable.to_string(),
                    },
                )?;
            }

            let name = device.name.clone();
            if devices.insert(name.clone(), device).is_some() {
                return Err(DnaasError::new(ValidationError::InvalidConfiguration(
                    InvalidConfigurationError::DuplicateDevice { device: name },
                )));
            }
        }

        Ok(Self { devices })
    }

    pub fn get(&self, name: &str) -> Option<&DeviceInfo> {
        self.devices.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// The selectable chassis view: superspine NCC variants collapse into a
    /// single logical chassis keyed by the name without the suffix.
    pub fn chassis(&self) -> Vec<Chassis> {
        let mut by_chassis: BTreeMap<&str, Chassis> = BTreeMap::new();
        for device in self.devices.values() {
            let chassis = chassis_name(&device.name);
            let entry = by_chassis.entry(chassis).or_insert_with(|| Chassis {
                name: chassis.to_string(),
                variants: Vec::new(),
                role: device.role(),
            });
            if let Some(info) = device.name_info() {
                if let Some(ncc) = info.ncc_variant {
                    entry.variants.push(format!("NCC{ncc}"));
                }
            }
        }
        by_chassis.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    const SAMPLE_INVENTORY: &str = indoc! {r#"
        - name: DNAAS-LEAF-B14
          host: 10.10.14.1
          username: dnaas
          password: lab
        - name: DNAAS-LEAF-B15
          host: 10.10.15.1
          port: 2222
          username: dnaas
          password: lab
          role: leaf
        - name: DNAAS-SUPERSPINE-D04-NCC0
          host: 10.10.4.10
          username: dnaas
          password: lab
        - name: DNAAS-SUPERSPINE-D04-NCC1
          host: 10.10.4.10
          username: dnaas
          password: lab
    "#};

    #[test]
    fn test_load_and_roles() {
        let inventory = DeviceInventory::from_yaml(SAMPLE_INVENTORY).unwrap();
        assert_eq!(inventory.len(), 4);

        let b14 = inventory.get("DNAAS-LEAF-B14").unwrap();
        assert_eq!(b14.port, 22);
        assert_eq!(b14.role(), Some(DeviceRole::Leaf));

        let b15 = inventory.get("DNAAS-LEAF-B15").unwrap();
        assert_eq!(b15.port, 2222);

        assert!(inventory.get("DNAAS-LEAF-B99").is_none());
    }

    #[test]
    fn test_name_parsing() {
        let info = DeviceNameInfo::parse("DNAAS-SUPERSPINE-D04-NCC1").unwrap();
        assert_eq!(info.role, Some(DeviceRole::Superspine));
        assert_eq!(info.row, "D");
        assert_eq!(info.rack, "04");
        assert_eq!(info.ncc_variant, Some(1));

        let info = DeviceNameInfo::parse("DNAAS-LEAF-B14").unwrap();
        assert_eq!(info.ncc_variant, None);
        assert_eq!((info.row.as_str(), info.rack.as_str()), ("B", "14"));

        assert!(DeviceNameInfo::parse("core-router-1").is_none());
    }

    #[test]
    fn test_chassis_consolidation() {
        let inventory = DeviceInventory::from_yaml(SAMPLE_INVENTORY).unwrap();
        let chassis = inventory.chassis();
        assert_eq!(chassis.len(), 3);

        let superspine = chassis
            .iter()
            .find(|c| c.name == "DNAAS-SUPERSPINE-D04")
            .unwrap();
        assert_eq!(superspine.variants, vec!["NCC0", "NCC1"]);
        assert_eq!(superspine.role, Some(DeviceRole::Superspine));

        // Row/rack parse identically for all three name forms.
        for name in [
            "DNAAS-SUPERSPINE-D04",
            "DNAAS-SUPERSPINE-D04-NCC0",
            "DNAAS-SUPERSPINE-D04-NCC1",
        ] {
            let info = DeviceNameInfo::parse(name).unwrap();
            assert_eq!((info.row.as_str(), info.rack.as_str()), ("D", "04"));
        }
    }

    #[test]
    fn test_password_env_resolution() {
        std::env::set_var("DNAAS_TEST_PW", "secret");
        let inventory = DeviceInventory::from_yaml(indoc! {r#"
            - name: DNAAS-SPINE-A01
              host: 10.0.0.1
              username: dnaas
              password: env:DNAAS_TEST_PW
        "#})
        .unwrap();
        assert_eq!(inventory.get("DNAAS-SPINE-A01").unwrap().password, "secret");

        DeviceInventory::from_yaml(indoc! {r#"
            - name: DNAAS-SPINE-A01
              host: 10.0.0.1
              username: dnaas
              password: env:DNAAS_TEST_PW_UNSET
        "#})
        .unwrap_err();
    }

    #[test]
    fn test_duplicate_device_rejected() {
        DeviceInventory::from_yaml(indoc! {r#"
            - name: DNAAS-LEAF-B14
              host: 10.10.14.1
              username: dnaas
              password: lab
            - name: DNAAS-LEAF-B14
              host: 10.10.14.2
              username: dnaas
              password: lab
        "#})
        .unwrap_err();
    }
}
