use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::model::interface::InterfaceRecord;
use crate::primitives::vlan::VlanId;

/// DNAAS service classification of a bridge domain by its tagging model.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DnaasType {
    /// Type 4A: every member carries a single `vlan-id` matching the
    /// service VLAN, with l2-service enabled.
    SingleTagged,
    /// Type 2A: constant outer tag, one inner tag shared by all members.
    QinqSingleInner,
    /// Type 1: constant outer tag, a range of inner tags across members.
    QinqInnerRange,
    #[default]
    Unknown,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TopologyType {
    P2p,
    P2mp,
    #[default]
    Unknown,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scope {
    Global,
    Local,
    #[default]
    Unknown,
}

/// Where a canonical record came from: the device-local names that merged
/// into it and the key they merged under.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationInfo {
    pub original_names: Vec<String>,
    pub consolidation_key: String,
    pub consolidated_count: usize,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryMetadata {
    pub discovered_at: Option<DateTime<Utc>>,
    pub devices_scanned: Vec<String>,
    /// Devices that failed entirely during the scan; the scan proceeds
    /// without them.
    pub devices_failed: Vec<String>,
    /// Non-fatal parse warnings attached to this record.
    pub warnings: Vec<String>,
}

/// A canonical bridge domain: one record per `(username, vlan_id)` pair,
/// consolidated from per-device fragments.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct BridgeDomain {
    pub name: String,
    pub username: Option<String>,
    pub vlan_id: Option<VlanId>,
    pub outer_vlan: Option<VlanId>,
    pub inner_vlan: Option<VlanId>,
    pub dnaas_type: DnaasType,
    pub topology_type: TopologyType,
    pub scope: Scope,
    pub admin_state: String,
    pub interfaces: Vec<InterfaceRecord>,
    pub consolidation_info: ConsolidationInfo,
    /// CLI lines observed for this service, in device order. Opaque to the
    /// engine; retained for operator inspection.
    pub raw_cli_config: Vec<String>,
    pub discovery_metadata: DiscoveryMetadata,
}

impl BridgeDomain {
    /// Member interfaces grouped by device, in stable device order.
    pub fn interfaces_by_device(&self) -> BTreeMap<&str, Vec<&InterfaceRecord>> {
        let mut grouped: BTreeMap<&str, Vec<&InterfaceRecord>> = BTreeMap::new();
        for iface in &self.interfaces {
            grouped
                .entry(iface.device_name.as_str())
                .or_default()
                .push(iface);
        }
        grouped
    }

    pub fn device_names(&self) -> Vec<&str> {
        self.interfaces_by_device().into_keys().collect()
    }

    /// Checks the tagging invariants: single-tagged members must carry the
    /// service VLAN; QinQ members must share the outer tag. Returns the
    /// offending interface names.
    pub fn tagging_violations(&self) -> Vec<&str> {
        match self.dnaas_type {
            DnaasType::SingleTagged => self
                .interfaces
                .iter()
                .filter(|i| i.vlan_id.is_some() && i.vlan_id != self.vlan_id)
                .map(|i| i.interface_name.as_str())
                .collect(),
            DnaasType::QinqSingleInner | DnaasType::QinqInnerRange => self
                .interfaces
                .iter()
                .filter(|i| i.outer_vlan.is_some() && i.outer_vlan != self.outer_vlan)
                .map(|i| i.interface_name.as_str())
                .collect(),
            DnaasType::Unknown => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::interface::InterfaceRecord;

    fn member(device: &str, name: &str, vlan: u16) -> InterfaceRecord {
        InterfaceRecord {
            vlan_id: Some(VlanId::new(vlan).unwrap()),
            l2_service_enabled: true,
            ..InterfaceRecord::new(device, name)
        }
    }

    #[test]
    fn test_grouping_and_violations() {
        let bd = BridgeDomain {
            name: "g_visaev_v253".into(),
            username: Some("visaev".into()),
            vlan_id: Some(VlanId::new(253).unwrap()),
            dnaas_type: DnaasType::SingleTagged,
            interfaces: vec![
                member("DNAAS-LEAF-B14", "ge100-0/0/29.253", 253),
                member("DNAAS-LEAF-B14", "ge100-0/0/30.253", 253),
                member("DNAAS-LEAF-B15", "bundle-60000.253", 253),
            ],
            ..Default::default()
        };

        let grouped = bd.interfaces_by_device();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["DNAAS-LEAF-B14"].len(), 2);
        assert!(bd.tagging_violations().is_empty());

        let mut stray = bd.clone();
        stray.interfaces[1].vlan_id = Some(VlanId::new(999).unwrap());
        assert_eq!(stray.tagging_violations(), vec!["ge100-0/0/30.253"]);
    }
}
