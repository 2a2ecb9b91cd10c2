//! The workspace state machine: exclusive ownership of a bridge domain by
//! one user at a time.
//!
//! States per bridge domain: available → assigned(user) → released →
//! available. Assignment requires the user's VLAN policy to admit the
//! domain's VLAN; editing requires holding the active assignment. The
//! at-most-one-active invariant itself is enforced by the datastore's
//! partial unique index.

use log::info;

use dnaas_api::error::{DnaasError, ReportError, ValidationError};

use crate::context::ServiceContext;
use crate::datastore::DataStore;

/// Assigns `bd_name` to `user` for exclusive editing.
///
/// Fails when the domain is unknown, already assigned, or outside the
/// user's permitted VLAN ranges. A domain without a VLAN id is assignable
/// by admins only.
pub fn assign(
    ctx: &ServiceContext,
    store: &DataStore,
    bd_name: &str,
    user: &str,
    reason: Option<&str>,
) -> Result<(), DnaasError> {
    let bd = store
        .get_bridge_domain(bd_name)?
        .structured(ValidationError::UnknownBridgeDomain {
            bridge_domain: bd_name.to_string(),
        })?;

    let permitted = match bd.vlan_id {
        Some(vlan) => ctx.settings.permits(user, vlan),
        None => ctx.settings.is_admin(user),
    };
    if !permitted {
        return Err(DnaasError::new(ValidationError::VlanNotPermitted {
            user: user.to_string(),
            vlan: bd.vlan_id.map(|v| v.get()).unwrap_or_default(),
        }));
    }

    store.acquire_assignment(bd_name, user, reason)?;
    info!("Bridge domain '{bd_name}' assigned to '{user}'");
    Ok(())
}

/// Releases the active assignment held by `user`.
pub fn release(store: &DataStore, bd_name: &str, user: &str) -> Result<(), DnaasError> {
    store.release_assignment(bd_name, user)?;
    info!("Bridge domain '{bd_name}' released by '{user}'");
    Ok(())
}

/// Permits an edit or deployment only for the holder of the active
/// assignment.
pub fn ensure_holder(store: &DataStore, bd_name: &str, user: &str) -> Result<(), DnaasError> {
    match store.active_holder(bd_name)? {
        Some(holder) if holder == user => Ok(()),
        _ => Err(DnaasError::new(ValidationError::PermissionDenied {
            bridge_domain: bd_name.to_string(),
            user: user.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use dnaas_api::config::{DeviceInventory, ServiceSettings, UserPolicy};
    use dnaas_api::error::{ErrorKind, PersistenceError};
    use dnaas_api::model::{BridgeDomain, DnaasType};
    use dnaas_api::primitives::vlan::VlanId;

    use super::*;

    fn context() -> ServiceContext {
        let inventory = DeviceInventory::from_yaml(indoc::indoc! {r#"
            - name: DNAAS-LEAF-B14
              host: 192.0.2.14
              username: dnaas
              password: lab
        "#})
        .unwrap();
        let mut settings = ServiceSettings::default();
        settings.users.insert(
            "user-a".to_string(),
            UserPolicy {
                admin: false,
                allowed_vlans: "100-199".parse().unwrap(),
            },
        );
        settings.users.insert(
            "user-b".to_string(),
            UserPolicy {
                admin: false,
                allowed_vlans: "100-199".parse().unwrap(),
            },
        );
        ServiceContext::new(inventory, settings)
    }

    fn store_with_bd(name: &str, vlan: u16) -> DataStore {
        let store = DataStore::open_in_memory().unwrap();
        store
            .upsert_bridge_domain(&BridgeDomain {
                name: name.to_string(),
                vlan_id: Some(VlanId::new(vlan).unwrap()),
                dnaas_type: DnaasType::SingleTagged,
                ..Default::default()
            })
            .unwrap();
        store
    }

    /// Concurrent claims: the second assign fails, edits by the loser are
    /// denied until the winner releases.
    #[test]
    fn test_assignment_conflict() {
        let ctx = context();
        let store = store_with_bd("g_oalfasi_v100", 100);

        assign(&ctx, &store, "g_oalfasi_v100", "user-a", None).unwrap();
        let err = assign(&ctx, &store, "g_oalfasi_v100", "user-b", None).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Persistence(PersistenceError::AlreadyAssigned { .. })
        ));

        let err = ensure_holder(&store, "g_oalfasi_v100", "user-b").unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::PermissionDenied { .. })
        ));
        ensure_holder(&store, "g_oalfasi_v100", "user-a").unwrap();

        release(&store, "g_oalfasi_v100", "user-a").unwrap();
        assign(&ctx, &store, "g_oalfasi_v100", "user-b", Some("after release")).unwrap();
        ensure_holder(&store, "g_oalfasi_v100", "user-b").unwrap();
    }

    #[test]
    fn test_vlan_policy_gates_assignment() {
        let ctx = context();
        let store = store_with_bd("g_visaev_v640", 640);

        let err = assign(&ctx, &store, "g_visaev_v640", "user-a", None).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::VlanNotPermitted { vlan: 640, .. })
        ));
    }

    #[test]
    fn test_unknown_bridge_domain() {
        let ctx = context();
        let store = DataStore::open_in_memory().unwrap();
        let err = assign(&ctx, &store, "g_missing_v1", "user-a", None).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::Validation(ValidationError::UnknownBridgeDomain { .. })
        ));
    }
}
