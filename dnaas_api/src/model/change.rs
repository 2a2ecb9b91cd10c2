use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::primitives::vlan::VlanId;

/// One edit to a bridge domain's member set. Interface names here are base
/// names; the planner appends the VLAN suffix exactly once.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Change {
    AddInterface {
        device: String,
        interface: String,
        vlan_id: Option<VlanId>,
        #[serde(default)]
        outer_vlan: Option<VlanId>,
        #[serde(default)]
        inner_vlan: Option<VlanId>,
    },
    RemoveInterface {
        device: String,
        interface: String,
        vlan_id: Option<VlanId>,
    },
    ModifyInterface {
        device: String,
        interface: String,
        vlan_id: Option<VlanId>,
        #[serde(default)]
        outer_vlan: Option<VlanId>,
        #[serde(default)]
        inner_vlan: Option<VlanId>,
    },
    MoveInterface {
        from_device: String,
        to_device: String,
        interface: String,
        vlan_id: Option<VlanId>,
    },
}

impl Change {
    /// The devices this change touches.
    pub fn devices(&self) -> Vec<&str> {
        match self {
            Change::AddInterface { device, .. }
            | Change::RemoveInterface { device, .. }
            | Change::ModifyInterface { device, .. } => vec![device],
            Change::MoveInterface {
                from_device,
                to_device,
                ..
            } => vec![from_device, to_device],
        }
    }

    pub fn interface(&self) -> &str {
        match self {
            Change::AddInterface { interface, .. }
            | Change::RemoveInterface { interface, .. }
            | Change::ModifyInterface { interface, .. }
            | Change::MoveInterface { interface, .. } => interface,
        }
    }

    pub fn vlan_id(&self) -> Option<VlanId> {
        match self {
            Change::AddInterface { vlan_id, .. }
            | Change::RemoveInterface { vlan_id, .. }
            | Change::ModifyInterface { vlan_id, .. }
            | Change::MoveInterface { vlan_id, .. } => *vlan_id,
        }
    }
}

/// An ordered list of changes against one bridge domain, owned by the
/// holder of its active assignment.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct EditSession {
    pub id: Uuid,
    pub bridge_domain: String,
    pub user: String,
    pub changes: Vec<Change>,
}

impl EditSession {
    pub fn new(bridge_domain: impl Into<String>, user: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bridge_domain: bridge_domain.into(),
            user: user.into(),
            changes,
        }
    }
}

/// The per-device command lists derived from an edit session. The identical
/// plan runs through both deployment phases.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPlan {
    pub commands: BTreeMap<String, Vec<String>>,
}

impl DeploymentPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.values().all(|c| c.is_empty())
    }

    pub fn devices(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn push(&mut self, device: &str, command: String) {
        self.commands.entry(device.to_string()).or_default().push(command);
    }

    pub fn extend(&mut self, device: &str, commands: impl IntoIterator<Item = String>) {
        self.commands
            .entry(device.to_string())
            .or_default()
            .extend(commands);
    }

    /// Drops every command referencing `interface` on `device`. Used by the
    /// skip drift resolution.
    pub fn retain_without_interface(&mut self, device: &str, interface: &str) {
        if let Some(commands) = self.commands.get_mut(device) {
            commands.retain(|c| !c.contains(interface));
        }
        self.commands.retain(|_, c| !c.is_empty());
    }

    pub fn total_commands(&self) -> usize {
        self.commands.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_devices() {
        let change = Change::MoveInterface {
            from_device: "DNAAS-LEAF-B14".into(),
            to_device: "DNAAS-LEAF-B15".into(),
            interface: "ge100-0/0/29".into(),
            vlan_id: Some(VlanId::new(251).unwrap()),
        };
        assert_eq!(change.devices(), vec!["DNAAS-LEAF-B14", "DNAAS-LEAF-B15"]);
        assert_eq!(change.interface(), "ge100-0/0/29");
    }

    #[test]
    fn test_changes_yaml_form() {
        let parsed: Vec<Change> = serde_yaml::from_str(indoc::indoc! {r#"
            - op: add-interface
              device: DNAAS-LEAF-B15
              interface: ge100-0/0/31
              vlan_id: 251
            - op: remove-interface
              device: DNAAS-LEAF-B14
              interface: ge100-0/0/29
              vlan_id: 251
        "#})
        .unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].devices(), vec!["DNAAS-LEAF-B15"]);
        assert_eq!(parsed[1].vlan_id(), Some(VlanId::new(251).unwrap()));
    }

    #[test]
    fn test_plan_interface_retention() {
        let mut plan = DeploymentPlan::default();
        plan.extend(
            "DNAAS-LEAF-B15",
            [
                "network-services bridge-domain instance g_visaev_v251 interface ge100-0/0/31.251"
                    .to_string(),
                "interfaces ge100-0/0/31.251 l2-service enabled".to_string(),
                "interfaces ge100-0/0/31.251 vlan-id 251".to_string(),
            ],
        );
        plan.push(
            "DNAAS-LEAF-B14",
            "interfaces ge100-0/0/30.251 vlan-id 251".to_string(),
        );

        assert_eq!(plan.total_commands(), 4);
        plan.retain_without_interface("DNAAS-LEAF-B15", "ge100-0/0/31.251");
        assert_eq!(plan.total_commands(), 1);
        assert!(plan.commands.get("DNAAS-LEAF-B15").is_none());
    }
}
