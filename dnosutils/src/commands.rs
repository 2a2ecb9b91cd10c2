//! Constructors for the DNOS command vocabulary.
//!
//! Write commands are emitted for global configuration mode only; mode
//! transitions (`configure`, `exit`) belong to the executor and never appear
//! inside a plan. Sub-interface suffixing happens in exactly one place so a
//! doubly-suffixed name cannot be constructed.

use dnaas_api::model::split_subinterface;
use dnaas_api::primitives::vlan::VlanId;

pub const CONFIGURE: &str = "configure";
pub const COMMIT_CHECK: &str = "commit check";
pub const COMMIT_AND_EXIT: &str = "commit and-exit";
pub const ROLLBACK: &str = "rollback";
pub const EXIT: &str = "exit";

/// Device response to `commit check` when the candidate configuration is
/// identical to the running one. A drift signal, not a success.
pub const NO_CHANGES_MARKER: &str = "no configuration changes were made";

pub fn commit_check_reports_no_changes(output: &str) -> bool {
    output.to_ascii_lowercase().contains(NO_CHANGES_MARKER)
}

#[derive(Debug, Eq, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("interface name '{name}' already carries a VLAN suffix")]
    AlreadySuffixed { name: String },
}

/// Appends the VLAN suffix to a base interface name. Rejects names that
/// already carry a numeric suffix.
pub fn subinterface_name(base: &str, vlan: VlanId) -> Result<String, CommandError> {
    match split_subinterface(base) {
        (_, Some(_)) => Err(CommandError::AlreadySuffixed {
            name: base.to_string(),
        }),
        (base, None) => Ok(format!("{base}.{vlan}")),
    }
}

/// QinQ sub-interface name `<base>.<outer>.<inner>`.
pub fn qinq_subinterface_name(
    base: &str,
    outer: VlanId,
    inner: VlanId,
) -> Result<String, CommandError> {
    match split_subinterface(base) {
        (_, Some(_)) => Err(CommandError::AlreadySuffixed {
            name: base.to_string(),
        }),
        (base, None) => Ok(format!("{base}.{outer}.{inner}")),
    }
}

// Read commands (discovery / drift).

pub fn show_bridge_domains() -> String {
    "show network-services bridge-domain | no-more".to_string()
}

pub fn show_bridge_domain(name: &str) -> String {
    format!("show network-services bridge-domain {name}")
}

pub fn show_interfaces() -> String {
    "show interfaces | no-more".to_string()
}

pub fn show_interfaces_matching(pattern: &str) -> String {
    format!("show interfaces | no-more | i {pattern}")
}

pub fn show_config_flat() -> String {
    "show config | fl".to_string()
}

pub fn show_config_flat_matching(pattern: &str) -> String {
    format!("show config | fl | i {pattern}")
}

// Write commands (deployment), global configuration mode.

pub fn bridge_domain_interface(bd: &str, subinterface: &str) -> String {
    format!("network-services bridge-domain instance {bd} interface {subinterface}")
}

pub fn bridge_domain_admin_state(bd: &str, enabled: bool) -> String {
    let state = if enabled { "enabled" } else { "disabled" };
    format!("network-services bridge-domain instance {bd} admin-state {state}")
}

pub fn interface_l2_service(subinterface: &str, enabled: bool) -> String {
    let state = if enabled { "enabled" } else { "disabled" };
    format!("interfaces {subinterface} l2-service {state}")
}

pub fn interface_vlan_id(subinterface: &str, vlan: VlanId) -> String {
    format!("interfaces {subinterface} vlan-id {vlan}")
}

pub fn interface_vlan_tags(subinterface: &str, outer: VlanId, inner: VlanId) -> String {
    format!("interfaces {subinterface} vlan-tags outer-tag {outer} inner-tag {inner}")
}

pub fn no_bridge_domain_interface(bd: &str, subinterface: &str) -> String {
    format!("no network-services bridge-domain instance {bd} interface {subinterface}")
}

pub fn no_interface(subinterface: &str) -> String {
    format!("no interfaces {subinterface}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_suffix_applied_once() {
        assert_eq!(
            subinterface_name("ge100-0/0/29", vlan(251)).unwrap(),
            "ge100-0/0/29.251"
        );
        assert_eq!(
            subinterface_name("bundle-60000", vlan(251)).unwrap(),
            "bundle-60000.251"
        );
        assert_eq!(
            subinterface_name("ge100-0/0/29.251", vlan(251)),
            Err(CommandError::AlreadySuffixed {
                name: "ge100-0/0/29.251".to_string()
            })
        );
        assert_eq!(
            qinq_subinterface_name("ge100-0/0/29.100", vlan(100), vlan(200)),
            Err(CommandError::AlreadySuffixed {
                name: "ge100-0/0/29.100".to_string()
            })
        );
    }

    #[test]
    fn test_single_tagged_add_block() {
        let subif = subinterface_name("ge100-0/0/31", vlan(251)).unwrap();
        assert_eq!(
            [
                bridge_domain_interface("g_visaev_v251", &subif),
                interface_l2_service(&subif, true),
                interface_vlan_id(&subif, vlan(251)),
            ],
            [
                "network-services bridge-domain instance g_visaev_v251 interface ge100-0/0/31.251",
                "interfaces ge100-0/0/31.251 l2-service enabled",
                "interfaces ge100-0/0/31.251 vlan-id 251",
            ]
        );
    }

    #[test]
    fn test_read_command_forms() {
        assert_eq!(
            show_interfaces_matching("ge100-0/0/31"),
            "show interfaces | no-more | i ge100-0/0/31"
        );
        assert_eq!(
            show_bridge_domain("g_visaev_v251"),
            "show network-services bridge-domain g_visaev_v251"
        );
    }

    #[test]
    fn test_no_changes_marker() {
        assert!(commit_check_reports_no_changes(
            "WARNING: No configuration changes were made.\n"
        ));
        assert!(!commit_check_reports_no_changes("commit check succeeded\n"));
    }
}
