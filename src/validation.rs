//! Pre-deployment validation: every check here runs before any device is
//! contacted.

use std::collections::HashSet;

use log::debug;

use dnaas_api::error::{DnaasError, ValidationError};
use dnaas_api::model::{split_subinterface, BridgeDomain, EditSession};

use crate::context::ServiceContext;
use crate::datastore::DataStore;

/// Validates an edit session against the inventory, the interface
/// inventory, and the holder's VLAN policy:
///
/// - every referenced device is in the inventory;
/// - every referenced interface exists on the named device;
/// - every VLAN touched is within the user's permitted ranges;
/// - no interface is claimed by two changes in the same session.
pub fn validate_session(
    ctx: &ServiceContext,
    store: &DataStore,
    bd: &BridgeDomain,
    session: &EditSession,
) -> Result<(), DnaasError> {
    let mut claimed: HashSet<(String, String)> = HashSet::new();

    for change in &session.changes {
        let base = split_subinterface(change.interface()).0.to_string();

        for device in change.devices() {
            if !ctx.inventory.contains(device) {
                return Err(DnaasError::new(ValidationError::UnknownDevice {
                    device: device.to_string(),
                }));
            }
            if !store.interface_exists(device, &base)? {
                return Err(DnaasError::new(ValidationError::UnknownInterface {
                    device: device.to_string(),
                    interface: base.clone(),
                }));
            }
            if !claimed.insert((device.to_string(), base.clone())) {
                return Err(DnaasError::new(ValidationError::DuplicateInterfaceClaim {
                    device: device.to_string(),
                    interface: base.clone(),
                }));
            }
        }

        if let Some(vlan) = change.vlan_id().or(bd.vlan_id) {
            if !ctx.settings.permits(&session.user, vlan) {
                return Err(DnaasError::new(ValidationError::VlanNotPermitted {
                    user: session.user.clone(),
                    vlan: vlan.get(),
                }));
            }
        }
    }

    debug!(
        "Session '{}' for '{}' validated: {} change(s)",
        session.id,
        session.bridge_domain,
        session.changes.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use dnaas_api::config::{DeviceInventory, ServiceSettings, UserPolicy};
    use dnaas_api::error::ErrorKind;
    use dnaas_api::model::{Change, DnaasType, InterfaceRecord};
    use dnaas_api::primitives::vlan::VlanId;

    use super::*;

    fn context() -> ServiceContext {
        let inventory = DeviceInventory::from_yaml(indoc::indoc! {r#"
            - name: DNAAS-LEAF-B14
              host: 192.0.2.14
              username: dnaas
              password: lab
            - name: DNAAS-LEAF-B15
              host: 192.0.2.15
              username: dnaas
              password: lab
        "#})
        .unwrap();
        let mut settings = ServiceSettings::default();
        settings.users.insert(
            "visaev".to_string(),
            UserPolicy {
                admin: false,
                allowed_vlans: "250-260".parse().unwrap(),
            },
        );
        ServiceContext::new(inventory, settings)
    }

    fn store_with_interfaces() -> DataStore {
        let store = DataStore::open_in_memory().unwrap();
        store
            .upsert_device_interfaces(
                "DNAAS-LEAF-B15",
                &[InterfaceRecord::new("DNAAS-LEAF-B15", "ge100-0/0/31")],
            )
            .unwrap();
        store
    }

    fn bd() -> BridgeDomain {
        BridgeDomain {
            name: "g_visaev_v251".to_string(),
            vlan_id: Some(VlanId::new(251).unwrap()),
            dnaas_type: DnaasType::SingleTagged,
            ..Default::default()
        }
    }

    fn add_change(device: &str, interface: &str, vlan: Option<u16>) -> Change {
        Change::AddInterface {
            device: device.to_string(),
            interface: interface.to_string(),
            vlan_id: vlan.map(|v| VlanId::new(v).unwrap()),
            outer_vlan: None,
            inner_vlan: None,
        }
    }

    fn session(changes: Vec<Change>) -> EditSession {
        EditSession::new("g_visaev_v251", "visaev", changes)
    }

    #[test]
    fn test_valid_session_passes() {
        let ctx = context();
        let store = store_with_interfaces();
        validate_session(
            &ctx,
            &store,
            &bd(),
            &session(vec![add_change("DNAAS-LEAF-B15", "ge100-0/0/31", Some(251))]),
        )
        .unwrap();
    }

    #[test]
    fn test_unknown_device_rejected() {
        let ctx = context();
        let store = store_with_interfaces();
        let err = validate_session(
            &ctx,
            &store,
            &bd(),
            &session(vec![add_change("DNAAS-LEAF-B99", "ge100-0/0/31", Some(251))]),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::UnknownDevice { .. })
        ));
    }

    #[test]
    fn test_unknown_interface_rejected() {
        let ctx = context();
        let store = store_with_interfaces();
        let err = validate_session(
            &ctx,
            &store,
            &bd(),
            &session(vec![add_change("DNAAS-LEAF-B15", "ge100-0/0/77", Some(251))]),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::UnknownInterface { .. })
        ));
    }

    #[test]
    fn test_forbidden_vlan_rejected() {
        let ctx = context();
        let store = store_with_interfaces();
        let err = validate_session(
            &ctx,
            &store,
            &bd(),
            &session(vec![add_change("DNAAS-LEAF-B15", "ge100-0/0/31", Some(640))]),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::VlanNotPermitted { vlan: 640, .. })
        ));
    }

    #[test]
    fn test_duplicate_claim_rejected() {
        let ctx = context();
        let store = store_with_interfaces();
        let err = validate_session(
            &ctx,
            &store,
            &bd(),
            &session(vec![
                add_change("DNAAS-LEAF-B15", "ge100-0/0/31", Some(251)),
                add_change("DNAAS-LEAF-B15", "ge100-0/0/31", Some(252)),
            ]),
        )
        .unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::DuplicateInterfaceClaim { .. })
        ));
    }
}
