//! Translation of an edit session into per-device DNOS command lists.
//!
//! The planner is pure: the same bridge domain and session always produce
//! the same plan, and the identical plan runs through both deployment
//! phases. Every command is a fully-qualified global-configuration-mode
//! line; mode transitions never appear here.

use log::debug;

use dnaas_api::error::{DnaasError, ValidationError};
use dnaas_api::model::{BridgeDomain, Change, DeploymentPlan, DnaasType, EditSession};
use dnaas_api::primitives::vlan::VlanId;
use dnosutils::commands::{self, CommandError};

/// A fully-resolved interface edit: base name plus the tags that apply.
struct EditSpec<'a> {
    interface: &'a str,
    vlan: VlanId,
    outer: Option<VlanId>,
    inner: Option<VlanId>,
}

/// Emits the command block for one edit, per service type. The adapter is
/// the only place the tagging model shows up in command form.
trait TypeAdapter {
    fn add_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError>;
    fn remove_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError>;

    fn modify_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError> {
        // Attribute lines only; membership is untouched.
        Ok(self.add_commands(bd_name, spec)?[1..].to_vec())
    }
}

struct SingleTaggedAdapter;

impl TypeAdapter for SingleTaggedAdapter {
    fn add_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError> {
        let subif = subinterface(spec.interface, spec.vlan)?;
        Ok(vec![
            commands::bridge_domain_interface(bd_name, &subif),
            commands::interface_l2_service(&subif, true),
            commands::interface_vlan_id(&subif, spec.vlan),
        ])
    }

    fn remove_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError> {
        let subif = subinterface(spec.interface, spec.vlan)?;
        Ok(vec![
            commands::no_bridge_domain_interface(bd_name, &subif),
            commands::no_interface(&subif),
        ])
    }
}

struct QinqAdapter;

impl TypeAdapter for QinqAdapter {
    fn add_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError> {
        let (outer, inner) = qinq_tags(spec)?;
        let subif = commands::qinq_subinterface_name(spec.interface, outer, inner)
            .map_err(already_suffixed)?;
        Ok(vec![
            commands::bridge_domain_interface(bd_name, &subif),
            commands::interface_l2_service(&subif, true),
            commands::interface_vlan_tags(&subif, outer, inner),
        ])
    }

    fn remove_commands(&self, bd_name: &str, spec: &EditSpec) -> Result<Vec<String>, DnaasError> {
        let (outer, inner) = qinq_tags(spec)?;
        let subif = commands::qinq_subinterface_name(spec.interface, outer, inner)
            .map_err(already_suffixed)?;
        Ok(vec![
            commands::no_bridge_domain_interface(bd_name, &subif),
            commands::no_interface(&subif),
        ])
    }
}

fn adapter_for(bd: &BridgeDomain) -> Result<&'static dyn TypeAdapter, DnaasError> {
    match bd.dnaas_type {
        DnaasType::SingleTagged => Ok(&SingleTaggedAdapter),
        DnaasType::QinqSingleInner | DnaasType::QinqInnerRange => Ok(&QinqAdapter),
        DnaasType::Unknown => Err(DnaasError::new(ValidationError::UnplannableType {
            bridge_domain: bd.name.clone(),
            dnaas_type: bd.dnaas_type.to_string(),
        })),
    }
}

fn subinterface(base: &str, vlan: VlanId) -> Result<String, DnaasError> {
    commands::subinterface_name(base, vlan).map_err(already_suffixed)
}

fn already_suffixed(e: CommandError) -> DnaasError {
    let CommandError::AlreadySuffixed { name } = e;
    DnaasError::new(ValidationError::AlreadySuffixed { interface: name })
}

fn qinq_tags(spec: &EditSpec) -> Result<(VlanId, VlanId), DnaasError> {
    match (spec.outer, spec.inner) {
        (Some(outer), Some(inner)) => Ok((outer, inner)),
        _ => Err(DnaasError::new(ValidationError::MissingVlan {
            interface: spec.interface.to_string(),
        })),
    }
}

fn resolve_spec<'a>(
    bd: &BridgeDomain,
    interface: &'a str,
    vlan_id: Option<VlanId>,
    outer: Option<VlanId>,
    inner: Option<VlanId>,
) -> Result<EditSpec<'a>, DnaasError> {
    let vlan = vlan_id.or(bd.vlan_id).ok_or_else(|| {
        DnaasError::new(ValidationError::MissingVlan {
            interface: interface.to_string(),
        })
    })?;
    Ok(EditSpec {
        interface,
        vlan,
        outer: outer.or(bd.outer_vlan),
        inner: inner.or(bd.inner_vlan),
    })
}

/// The changes that would actually alter the stored record. Adds of members
/// already present and removes of members already absent drop out, so a
/// session replanned after a sync shrinks to what is still missing.
pub fn effective_changes<'a>(bd: &BridgeDomain, session: &'a EditSession) -> Vec<&'a Change> {
    session
        .changes
        .iter()
        .filter(|change| match change {
            Change::AddInterface {
                device,
                interface,
                vlan_id,
                ..
            } => {
                let vlan = (*vlan_id).or(bd.vlan_id);
                !bd.interfaces.iter().any(|member| {
                    &member.device_name == device
                        && member.base_name() == interface.as_str()
                        && member.vlan_id == vlan
                })
            }
            Change::RemoveInterface {
                device, interface, ..
            } => bd.interfaces.iter().any(|member| {
                &member.device_name == device && member.base_name() == interface.as_str()
            }),
            Change::ModifyInterface { .. } | Change::MoveInterface { .. } => true,
        })
        .collect()
}

/// Builds the per-device plan for the session. Changes already reflected on
/// the canonical record are omitted; an empty result is a valid plan that
/// deploys nothing.
pub fn build_plan(bd: &BridgeDomain, session: &EditSession) -> Result<DeploymentPlan, DnaasError> {
    let adapter = adapter_for(bd)?;
    let mut plan = DeploymentPlan::default();

    for change in effective_changes(bd, session) {
        match change {
            Change::AddInterface {
                device,
                interface,
                vlan_id,
                outer_vlan,
                inner_vlan,
            } => {
                let spec = resolve_spec(bd, interface, *vlan_id, *outer_vlan, *inner_vlan)?;
                plan.extend(device, adapter.add_commands(&bd.name, &spec)?);
            }
            Change::RemoveInterface {
                device,
                interface,
                vlan_id,
            } => {
                let spec = resolve_spec(bd, interface, *vlan_id, None, None)?;
                plan.extend(device, adapter.remove_commands(&bd.name, &spec)?);
            }
            Change::ModifyInterface {
                device,
                interface,
                vlan_id,
                outer_vlan,
                inner_vlan,
            } => {
                let spec = resolve_spec(bd, interface, *vlan_id, *outer_vlan, *inner_vlan)?;
                plan.extend(device, adapter.modify_commands(&bd.name, &spec)?);
            }
            Change::MoveInterface {
                from_device,
                to_device,
                interface,
                vlan_id,
            } => {
                let spec = resolve_spec(bd, interface, *vlan_id, None, None)?;
                plan.extend(from_device, adapter.remove_commands(&bd.name, &spec)?);
                plan.extend(to_device, adapter.add_commands(&bd.name, &spec)?);
            }
        }
    }

    debug!(
        "Planned {} command(s) across {} device(s) for '{}'",
        plan.total_commands(),
        plan.commands.len(),
        bd.name
    );
    Ok(plan)
}

/// The inverse plan for devices that already committed, generated on
/// partial commit failure for operator action. Never executed
/// automatically.
pub fn build_rollback_plan(
    bd: &BridgeDomain,
    session: &EditSession,
    committed_devices: &[&str],
) -> Result<DeploymentPlan, DnaasError> {
    let adapter = adapter_for(bd)?;
    let mut plan = DeploymentPlan::default();

    for change in &session.changes {
        match change {
            Change::AddInterface {
                device,
                interface,
                vlan_id,
                outer_vlan,
                inner_vlan,
            } if committed_devices.contains(&device.as_str()) => {
                let spec = resolve_spec(bd, interface, *vlan_id, *outer_vlan, *inner_vlan)?;
                plan.extend(device, adapter.remove_commands(&bd.name, &spec)?);
            }
            Change::RemoveInterface {
                device,
                interface,
                vlan_id,
            } if committed_devices.contains(&device.as_str()) => {
                let spec = resolve_spec(bd, interface, *vlan_id, None, None)?;
                plan.extend(device, adapter.add_commands(&bd.name, &spec)?);
            }
            Change::MoveInterface {
                from_device,
                to_device,
                interface,
                vlan_id,
            } => {
                let spec = resolve_spec(bd, interface, *vlan_id, None, None)?;
                if committed_devices.contains(&from_device.as_str()) {
                    plan.extend(from_device, adapter.add_commands(&bd.name, &spec)?);
                }
                if committed_devices.contains(&to_device.as_str()) {
                    plan.extend(to_device, adapter.remove_commands(&bd.name, &spec)?);
                }
            }
            _ => {}
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use dnaas_api::error::ErrorKind;
    use dnaas_api::model::InterfaceRecord;

    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    fn single_tagged_bd(name: &str, id: u16) -> BridgeDomain {
        BridgeDomain {
            name: name.to_string(),
            vlan_id: Some(vlan(id)),
            dnaas_type: DnaasType::SingleTagged,
            ..Default::default()
        }
    }

    fn add(device: &str, interface: &str, id: u16) -> Change {
        Change::AddInterface {
            device: device.to_string(),
            interface: interface.to_string(),
            vlan_id: Some(vlan(id)),
            outer_vlan: None,
            inner_vlan: None,
        }
    }

    /// Adding one interface emits the three-line block for that device
    /// only.
    #[test]
    fn test_single_tagged_add() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![add("DNAAS-LEAF-B15", "ge100-0/0/31", 251)],
        );

        let plan = build_plan(&bd, &session).unwrap();
        assert_eq!(plan.commands.len(), 1);
        assert_eq!(
            plan.commands["DNAAS-LEAF-B15"],
            vec![
                "network-services bridge-domain instance g_visaev_v251 interface ge100-0/0/31.251",
                "interfaces ge100-0/0/31.251 l2-service enabled",
                "interfaces ge100-0/0/31.251 vlan-id 251",
            ]
        );
    }

    #[test]
    fn test_plan_is_pure() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![
                add("DNAAS-LEAF-B15", "ge100-0/0/31", 251),
                add("DNAAS-LEAF-B14", "ge100-0/0/29", 251),
            ],
        );
        assert_eq!(
            build_plan(&bd, &session).unwrap(),
            build_plan(&bd, &session).unwrap()
        );
    }

    #[test]
    fn test_already_suffixed_rejected() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![add("DNAAS-LEAF-B15", "ge100-0/0/31.251", 251)],
        );
        let err = build_plan(&bd, &session).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::AlreadySuffixed { .. })
        ));
    }

    #[test]
    fn test_vlan_falls_back_to_service_vlan() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![Change::AddInterface {
                device: "DNAAS-LEAF-B15".to_string(),
                interface: "ge100-0/0/31".to_string(),
                vlan_id: None,
                outer_vlan: None,
                inner_vlan: None,
            }],
        );
        let plan = build_plan(&bd, &session).unwrap();
        assert!(plan.commands["DNAAS-LEAF-B15"][2].ends_with("vlan-id 251"));
    }

    #[test]
    fn test_unknown_type_unplannable() {
        let bd = BridgeDomain {
            name: "mystery".to_string(),
            ..Default::default()
        };
        let session = EditSession::new("mystery", "visaev", Vec::new());
        let err = build_plan(&bd, &session).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::UnplannableType { .. })
        ));
    }

    #[test]
    fn test_qinq_add() {
        let bd = BridgeDomain {
            name: "g_oalfasi_v100".to_string(),
            vlan_id: Some(vlan(100)),
            outer_vlan: Some(vlan(100)),
            inner_vlan: Some(vlan(200)),
            dnaas_type: DnaasType::QinqSingleInner,
            ..Default::default()
        };
        let session = EditSession::new(
            "g_oalfasi_v100",
            "oalfasi",
            vec![Change::AddInterface {
                device: "DNAAS-LEAF-B14".to_string(),
                interface: "bundle-60000".to_string(),
                vlan_id: None,
                outer_vlan: None,
                inner_vlan: None,
            }],
        );
        let plan = build_plan(&bd, &session).unwrap();
        assert_eq!(
            plan.commands["DNAAS-LEAF-B14"][2],
            "interfaces bundle-60000.100.200 vlan-tags outer-tag 100 inner-tag 200"
        );
    }

    #[test]
    fn test_move_touches_both_devices() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![Change::MoveInterface {
                from_device: "DNAAS-LEAF-B14".to_string(),
                to_device: "DNAAS-LEAF-B15".to_string(),
                interface: "ge100-0/0/29".to_string(),
                vlan_id: None,
            }],
        );
        let plan = build_plan(&bd, &session).unwrap();
        assert!(plan.commands["DNAAS-LEAF-B14"][0].starts_with("no network-services"));
        assert!(plan.commands["DNAAS-LEAF-B15"][0].starts_with("network-services"));
    }

    /// A change already reflected on the record drops out, so a replanned
    /// session can shrink to nothing.
    #[test]
    fn test_satisfied_add_drops_out() {
        let mut bd = single_tagged_bd("g_visaev_v251", 251);
        let mut member = InterfaceRecord::new("DNAAS-LEAF-B15", "ge100-0/0/31.251");
        member.vlan_id = Some(vlan(251));
        member.l2_service_enabled = true;
        bd.interfaces.push(member);

        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![add("DNAAS-LEAF-B15", "ge100-0/0/31", 251)],
        );
        let plan = build_plan(&bd, &session).unwrap();
        assert!(plan.is_empty());

        // Removing a member that is absent is likewise a no-op.
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![Change::RemoveInterface {
                device: "DNAAS-LEAF-B14".to_string(),
                interface: "ge100-0/0/29".to_string(),
                vlan_id: None,
            }],
        );
        assert!(build_plan(&bd, &session).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_plan_inverts_committed_devices_only() {
        let bd = single_tagged_bd("g_visaev_v251", 251);
        let session = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![
                add("DNAAS-LEAF-B14", "ge100-0/0/29", 251),
                add("DNAAS-LEAF-B15", "ge100-0/0/31", 251),
            ],
        );

        let rollback = build_rollback_plan(&bd, &session, &["DNAAS-LEAF-B14"]).unwrap();
        assert_eq!(rollback.commands.len(), 1);
        assert_eq!(
            rollback.commands["DNAAS-LEAF-B14"],
            vec![
                "no network-services bridge-domain instance g_visaev_v251 interface ge100-0/0/29.251",
                "no interfaces ge100-0/0/29.251",
            ]
        );
    }
}
