use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::primitives::vlan::VlanId;

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InterfaceType {
    #[default]
    Physical,
    Subinterface,
    Bundle,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AdminStatus {
    Enabled,
    Disabled,
    #[default]
    Unknown,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum OperStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum InterfaceRole {
    Access,
    Uplink,
    Downlink,
    #[default]
    Unknown,
}

/// Splits `ge100-0/0/29.251` into `("ge100-0/0/29", Some(251))`. Names
/// without a numeric suffix come back whole.
pub fn split_subinterface(name: &str) -> (&str, Option<u16>) {
    match name.rsplit_once('.') {
        Some((base, suffix)) => match suffix.parse::<u16>() {
            Ok(vlan) => (base, Some(vlan)),
            Err(_) => (name, None),
        },
        None => (name, None),
    }
}

/// One interface as observed on one device.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    pub device_name: String,
    pub interface_name: String,
    pub interface_type: InterfaceType,
    pub admin_status: AdminStatus,
    pub oper_status: OperStatus,
    pub vlan_id: Option<VlanId>,
    pub outer_vlan: Option<VlanId>,
    pub inner_vlan: Option<VlanId>,
    pub l2_service_enabled: bool,
    pub role: InterfaceRole,
}

impl InterfaceRecord {
    pub fn new(device_name: impl Into<String>, interface_name: impl Into<String>) -> Self {
        let interface_name = interface_name.into();
        Self {
            device_name: device_name.into(),
            interface_type: classify_name(&interface_name),
            interface_name,
            ..Default::default()
        }
    }

    /// The physical or bundle base name, without any VLAN suffix.
    pub fn base_name(&self) -> &str {
        split_subinterface(&self.interface_name).0
    }

    /// The VLAN id encoded in the sub-interface suffix, if any.
    pub fn name_vlan(&self) -> Option<u16> {
        split_subinterface(&self.interface_name).1
    }

    /// A sub-interface VLAN in the name must equal the `vlan-id` attribute
    /// when both are present.
    pub fn name_matches_vlan(&self) -> bool {
        match (self.name_vlan(), self.vlan_id) {
            (Some(suffix), Some(vlan)) => suffix == vlan.get(),
            _ => true,
        }
    }
}

fn classify_name(name: &str) -> InterfaceType {
    let (base, suffix) = split_subinterface(name);
    if suffix.is_some() {
        InterfaceType::Subinterface
    } else if base.starts_with("bundle-") {
        InterfaceType::Bundle
    } else {
        InterfaceType::Physical
    }
}
