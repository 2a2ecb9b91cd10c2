//! Consolidation of per-device bridge-domain fragments into canonical
//! records keyed by `(username, vlan_id)`.
//!
//! Device-local names follow loose conventions (`g_<user>_v<vlan>_...`,
//! `l_<user>_<descriptor>`, `<user>_<vlan>_...`); fragments whose names
//! resolve to the same key describe the same logical service and merge into
//! one record. Fragments are sorted before merging so the result is
//! independent of scan order.

use lazy_static::lazy_static;
use regex::Regex;

use dnaas_api::model::{
    BridgeDomain, ConsolidationInfo, InterfaceRecord, Scope, TopologyType,
};
use dnaas_api::primitives::vlan::{VlanId, VlanRangeSet};

use crate::discovery::classify;

lazy_static! {
    /// `g_<user>_v<vlan>[...]` — global naming convention.
    static ref GLOBAL_NAME: Regex =
        Regex::new(r"^g_(?P<user>[A-Za-z0-9]+)_v(?P<vlan>\d+)(?:_.*)?$").unwrap();
    /// `l_<user>[_<descriptor>]` — local naming convention.
    static ref LOCAL_NAME: Regex =
        Regex::new(r"^l_(?P<user>[A-Za-z0-9]+)(?:_.*)?$").unwrap();
    /// `<user>_<vlan>[_...]` — bare convention still seen on older devices.
    static ref BARE_NAME: Regex =
        Regex::new(r"^(?P<user>[A-Za-z][A-Za-z0-9]*)_(?P<vlan>\d+)(?:_.*)?$").unwrap();
    /// `v<vlan>[_...]` — VLAN-only names.
    static ref VLAN_ONLY_NAME: Regex = Regex::new(r"^v(?P<vlan>\d+)(?:_.*)?$").unwrap();
}

/// One bridge domain as observed on one device.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BdFragment {
    pub device: String,
    pub name: String,
    pub admin_state: String,
    pub interfaces: Vec<InterfaceRecord>,
    pub raw_lines: Vec<String>,
    pub warnings: Vec<String>,
}

/// The `(username, vlan)` identity extracted from a device-local name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NameIdentity {
    pub username: Option<String>,
    pub vlan_id: Option<VlanId>,
}

impl NameIdentity {
    pub fn parse(name: &str) -> Self {
        if let Some(caps) = GLOBAL_NAME.captures(name) {
            return Self {
                username: Some(caps["user"].to_string()),
                vlan_id: caps["vlan"].parse().ok(),
            };
        }
        if let Some(caps) = LOCAL_NAME.captures(name) {
            return Self {
                username: Some(caps["user"].to_string()),
                vlan_id: None,
            };
        }
        if let Some(caps) = BARE_NAME.captures(name) {
            return Self {
                username: Some(caps["user"].to_string()),
                vlan_id: caps["vlan"].parse().ok(),
            };
        }
        if let Some(caps) = VLAN_ONLY_NAME.captures(name) {
            return Self {
                username: None,
                vlan_id: caps["vlan"].parse().ok(),
            };
        }
        Self::default()
    }

    /// The consolidation key, or `None` when the name carries neither a
    /// user nor a VLAN (such fragments stay under their original name).
    pub fn consolidation_key(&self) -> Option<String> {
        match (&self.username, self.vlan_id) {
            (Some(user), Some(vlan)) => Some(format!("{user}_v{vlan}")),
            (None, Some(vlan)) => Some(format!("unknown_user_v{vlan}")),
            (Some(user), None) => Some(format!("{user}_no_vlan")),
            (None, None) => None,
        }
    }
}

/// Merges fragments into canonical records. Deterministic for a fixed input
/// set: fragments are sorted by `(device, name)` and member interfaces by
/// `(device, name)` before the merge.
pub fn consolidate(
    mut fragments: Vec<BdFragment>,
    global_range: &VlanRangeSet,
) -> Vec<BridgeDomain> {
    fragments.sort_by(|a, b| (&a.device, &a.name).cmp(&(&b.device, &b.name)));

    // Group by key, preserving first-seen group order.
    let mut groups: Vec<(Option<String>, Vec<BdFragment>)> = Vec::new();
    for fragment in fragments {
        let key = NameIdentity::parse(&fragment.name).consolidation_key();
        match groups
            .iter_mut()
            .find(|(k, _)| k.is_some() && *k == key)
        {
            Some((_, members)) => members.push(fragment),
            None => groups.push((key, vec![fragment])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| merge_group(key, members, global_range))
        .collect()
}

fn merge_group(
    key: Option<String>,
    fragments: Vec<BdFragment>,
    global_range: &VlanRangeSet,
) -> BridgeDomain {
    let identity = fragments
        .iter()
        .map(|f| NameIdentity::parse(&f.name))
        .find(|i| i.username.is_some() || i.vlan_id.is_some())
        .unwrap_or_default();

    let mut interfaces: Vec<InterfaceRecord> = Vec::new();
    let mut raw_cli_config = Vec::new();
    let mut warnings = Vec::new();
    let mut original_names = Vec::new();
    let mut admin_state = String::new();

    for fragment in &fragments {
        original_names.push(fragment.name.clone());
        raw_cli_config.extend(fragment.raw_lines.iter().cloned());
        warnings.extend(fragment.warnings.iter().cloned());
        if admin_state.is_empty() && !fragment.admin_state.is_empty() {
            admin_state = fragment.admin_state.clone();
        }
        for iface in &fragment.interfaces {
            let duplicate = interfaces.iter().any(|existing| {
                existing.device_name == iface.device_name
                    && existing.interface_name == iface.interface_name
            });
            if !duplicate {
                interfaces.push(iface.clone());
            }
        }
    }
    interfaces.sort_by(|a, b| {
        (&a.device_name, &a.interface_name).cmp(&(&b.device_name, &b.interface_name))
    });

    let vlan_id = identity.vlan_id.or_else(|| {
        let vlans: std::collections::BTreeSet<VlanId> =
            interfaces.iter().filter_map(|i| i.vlan_id).collect();
        (vlans.len() == 1).then(|| vlans.into_iter().next().unwrap())
    });

    let scope = match vlan_id {
        Some(vlan) if global_range.contains(vlan) => Scope::Global,
        Some(_) => Scope::Local,
        None => Scope::Unknown,
    };

    // Global services get the canonical name; local ones keep the first
    // observed device-local name.
    let name = match (scope, &identity.username, vlan_id) {
        (Scope::Global, Some(user), Some(vlan)) => format!("g_{user}_v{vlan}"),
        _ => fragments[0].name.clone(),
    };

    let classification = classify::classify(&interfaces, vlan_id);

    let outer_vlan = first_common(&interfaces, |i| i.outer_vlan);
    let inner_vlan = first_common(&interfaces, |i| i.inner_vlan);

    BridgeDomain {
        name,
        username: identity.username,
        vlan_id,
        outer_vlan,
        inner_vlan,
        dnaas_type: classification.dnaas_type,
        topology_type: derive_topology(&interfaces),
        scope,
        admin_state,
        consolidation_info: ConsolidationInfo {
            consolidated_count: original_names.len(),
            consolidation_key: key.unwrap_or_else(|| fragments[0].name.clone()),
            original_names,
        },
        interfaces,
        raw_cli_config,
        discovery_metadata: dnaas_api::model::DiscoveryMetadata {
            warnings,
            ..Default::default()
        },
    }
}

fn first_common<F: Fn(&InterfaceRecord) -> Option<VlanId>>(
    interfaces: &[InterfaceRecord],
    f: F,
) -> Option<VlanId> {
    let values: std::collections::BTreeSet<VlanId> =
        interfaces.iter().filter_map(&f).collect();
    (values.len() == 1).then(|| values.into_iter().next().unwrap())
}

/// P2P iff exactly two devices carry access-role members; otherwise P2MP.
/// Unknown only when the record has no member interfaces at all.
fn derive_topology(interfaces: &[InterfaceRecord]) -> TopologyType {
    if interfaces.is_empty() {
        return TopologyType::Unknown;
    }
    let access_devices: std::collections::BTreeSet<&str> = interfaces
        .iter()
        .filter(|i| i.role == dnaas_api::model::InterfaceRole::Access)
        .map(|i| i.device_name.as_str())
        .collect();
    if access_devices.len() == 2 {
        TopologyType::P2p
    } else {
        TopologyType::P2mp
    }
}
