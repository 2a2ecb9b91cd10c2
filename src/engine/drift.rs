//! Drift detection and resolution.
//!
//! A device answering `commit check` with "no configuration changes" told us
//! our view of it is wrong: the interface we are about to configure is
//! already there. The resolver classifies the event and applies the holder's
//! chosen resolution — rediscover and reconcile, skip the offending
//! interface, force the commands, or abort.

use std::str::FromStr;

use log::{info, warn};

use dnaas_api::error::{DnaasError, DnaasResultExt, DriftError};
use dnaas_api::model::{BridgeDomain, DeploymentPlan, EditSession};
use dnaas_api::status::{
    DeviceOutcome, DeviceReport, DriftEvent, DriftKind, DriftSeverity, DriftSource,
};
use dnosutils::commands;

use crate::context::ServiceContext;
use crate::datastore::DataStore;
use crate::discovery::{classify, BdFragment, DiscoveryEngine};
use crate::engine::plan;
use crate::executor::CancelToken;

/// The four resolutions offered to the assignment holder.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum DriftResolution {
    /// Rediscover the affected device, reconcile the datastore, replan.
    Sync,
    /// Drop the offending interface from the plan and continue.
    Skip,
    /// Send the commands anyway. May cause device errors; used sparingly.
    Override,
    /// Fail the deployment.
    #[default]
    Abort,
}

impl FromStr for DriftResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "skip" => Ok(Self::Skip),
            "override" => Ok(Self::Override),
            "abort" => Ok(Self::Abort),
            other => Err(format!("unknown drift resolution '{other}'")),
        }
    }
}

/// What the resolver decided the deployment should do next.
#[derive(Clone, Debug, PartialEq)]
pub enum DriftOutcome {
    /// Run commit-check again with this (possibly replanned) plan.
    Recheck(DeploymentPlan),
    /// Proceed to commit with this plan as checked.
    Proceed(DeploymentPlan),
    /// Nothing left to deploy; conclude as committed with zero commands.
    Concluded,
}

/// Builds one drift event per device that reported no changes, naming the
/// interfaces the session was adding there.
pub fn events_from_check(
    session: &EditSession,
    check_results: &[&DeviceReport],
) -> Vec<DriftEvent> {
    check_results
        .iter()
        .filter(|r| r.outcome == DeviceOutcome::NoChange)
        .map(|report| {
            let interface = session
                .changes
                .iter()
                .filter(|c| c.devices().contains(&report.device.as_str()))
                .map(|c| c.interface().to_string())
                .next();
            DriftEvent {
                kind: DriftKind::InterfaceAlreadyConfigured,
                device_name: report.device.clone(),
                interface_name: interface.clone(),
                detection_source: DriftSource::CommitCheck,
                severity: DriftSeverity::Warning,
                expected: match &interface {
                    Some(name) => format!("'{name}' not yet configured"),
                    None => "candidate configuration differs from running".to_string(),
                },
                observed: format!(
                    "device '{}' reported '{}'",
                    report.device,
                    commands::NO_CHANGES_MARKER
                ),
            }
        })
        .collect()
}

pub struct DriftHandler<'a> {
    ctx: &'a ServiceContext,
    resolution: DriftResolution,
}

impl<'a> DriftHandler<'a> {
    pub fn new(ctx: &'a ServiceContext, resolution: DriftResolution) -> Self {
        Self { ctx, resolution }
    }

    /// Applies the configured resolution to the drift events observed
    /// during commit-check.
    pub fn resolve(
        &self,
        store: &DataStore,
        bd: &mut BridgeDomain,
        session: &EditSession,
        plan: DeploymentPlan,
        events: &[DriftEvent],
        cancel: &CancelToken,
    ) -> Result<DriftOutcome, DnaasError> {
        match self.resolution {
            DriftResolution::Abort => {
                let device = events
                    .first()
                    .map(|e| e.device_name.clone())
                    .unwrap_or_default();
                Err(DnaasError::new(DriftError::AbortedOnDrift { device }))
            }
            DriftResolution::Override => {
                warn!("Drift overridden; sending checked commands unchanged");
                Ok(DriftOutcome::Proceed(plan))
            }
            DriftResolution::Skip => {
                let mut plan = plan;
                for event in events {
                    if let Some(interface) = &event.interface_name {
                        info!(
                            "Skipping '{}' on '{}' per drift resolution",
                            interface, event.device_name
                        );
                        plan.retain_without_interface(&event.device_name, interface);
                    } else {
                        // Nothing specific to skip; drop the device's block.
                        plan.commands.remove(&event.device_name);
                    }
                }
                if plan.is_empty() {
                    Ok(DriftOutcome::Concluded)
                } else {
                    Ok(DriftOutcome::Proceed(plan))
                }
            }
            DriftResolution::Sync => self.sync(store, bd, session, events, cancel),
        }
    }

    /// The sync resolution: targeted rediscovery of each drifted device,
    /// reconciliation of the canonical record, then a replan. The record
    /// update is one transaction per bridge domain; a failed sync leaves
    /// the datastore as it was.
    fn sync(
        &self,
        store: &DataStore,
        bd: &mut BridgeDomain,
        session: &EditSession,
        events: &[DriftEvent],
        cancel: &CancelToken,
    ) -> Result<DriftOutcome, DnaasError> {
        let discovery = DiscoveryEngine::new(self.ctx);

        for event in events {
            let pattern = event
                .interface_name
                .as_deref()
                .map(dnaas_api::model::split_subinterface)
                .map(|(base, _)| base);

            let fragment = self
                .scan_any_name(&discovery, &event.device_name, bd, pattern, cancel)
                .message("targeted rediscovery for drift sync")?;

            match fragment {
                Some(fragment) => reconcile_fragment(bd, &event.device_name, fragment),
                None => warn!(
                    "Drifted device '{}' no longer reports '{}'",
                    event.device_name, bd.name
                ),
            }
        }

        // Reclassify with the reconciled member set before replanning.
        let classification = classify::classify(&bd.interfaces, bd.vlan_id);
        bd.dnaas_type = classification.dnaas_type;

        if let Err(e) = store.upsert_bridge_domain(bd) {
            warn!("Persisting reconciled '{}' failed: {e:?}", bd.name);
            return Err(DnaasError::new(DriftError::SyncPersistFailed {
                bridge_domain: bd.name.clone(),
            }));
        }

        let replanned = plan::build_plan(bd, session)?;
        if replanned.is_empty() {
            info!(
                "Replan after sync is empty; '{}' already matches the request",
                bd.name
            );
            return Ok(DriftOutcome::Concluded);
        }
        Ok(DriftOutcome::Recheck(replanned))
    }

    /// The device may know the domain under the canonical name or one of
    /// the device-local names it consolidated from.
    fn scan_any_name(
        &self,
        discovery: &DiscoveryEngine,
        device: &str,
        bd: &BridgeDomain,
        pattern: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Option<BdFragment>, DnaasError> {
        if let Some(fragment) = discovery.targeted_scan(device, &bd.name, pattern, cancel)? {
            return Ok(Some(fragment));
        }
        for name in &bd.consolidation_info.original_names {
            if name != &bd.name {
                if let Some(fragment) = discovery.targeted_scan(device, name, pattern, cancel)? {
                    return Ok(Some(fragment));
                }
            }
        }
        Ok(None)
    }
}

/// Folds a rediscovered device fragment into the canonical record: members
/// observed on the device replace the record's view of that device.
fn reconcile_fragment(bd: &mut BridgeDomain, device: &str, fragment: BdFragment) {
    for observed in fragment.interfaces {
        match bd.interfaces.iter_mut().find(|member| {
            member.device_name == device && member.interface_name == observed.interface_name
        }) {
            Some(member) => *member = observed,
            None => {
                info!(
                    "Reconciling '{}': adding observed member '{}' on '{}'",
                    bd.name, observed.interface_name, device
                );
                bd.interfaces.push(observed);
            }
        }
    }
    bd.interfaces.sort_by(|a, b| {
        (&a.device_name, &a.interface_name).cmp(&(&b.device_name, &b.interface_name))
    });
}

#[cfg(test)]
mod tests {
    use dnaas_api::model::{Change, DnaasType, InterfaceRecord, InterfaceRole};
    use dnaas_api::primitives::vlan::VlanId;

    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    fn no_change_report(device: &str) -> DeviceReport {
        DeviceReport {
            device: device.to_string(),
            outcome: DeviceOutcome::NoChange,
            captures: Vec::new(),
        }
    }

    fn session_adding(device: &str, interface: &str, id: u16) -> EditSession {
        EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![Change::AddInterface {
                device: device.to_string(),
                interface: interface.to_string(),
                vlan_id: Some(vlan(id)),
                outer_vlan: None,
                inner_vlan: None,
            }],
        )
    }

    #[test]
    fn test_events_name_device_and_interface() {
        let session = session_adding("DNAAS-LEAF-B15", "ge100-0/0/31", 251);
        let reports = vec![no_change_report("DNAAS-LEAF-B15")];
        let refs: Vec<&DeviceReport> = reports.iter().collect();

        let events = events_from_check(&session, &refs);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, DriftKind::InterfaceAlreadyConfigured);
        assert_eq!(events[0].device_name, "DNAAS-LEAF-B15");
        assert_eq!(events[0].interface_name.as_deref(), Some("ge100-0/0/31"));
        assert_eq!(events[0].detection_source, DriftSource::CommitCheck);
        assert!(events[0].observed.contains("no configuration changes"));
    }

    #[test]
    fn test_reconcile_updates_and_adds_members() {
        let mut bd = BridgeDomain {
            name: "g_visaev_v251".to_string(),
            vlan_id: Some(vlan(251)),
            dnaas_type: DnaasType::SingleTagged,
            ..Default::default()
        };

        let mut observed = InterfaceRecord::new("DNAAS-LEAF-B15", "ge100-0/0/31.251");
        observed.vlan_id = Some(vlan(251));
        observed.l2_service_enabled = true;
        observed.role = InterfaceRole::Access;

        reconcile_fragment(
            &mut bd,
            "DNAAS-LEAF-B15",
            BdFragment {
                device: "DNAAS-LEAF-B15".to_string(),
                name: "g_visaev_v251".to_string(),
                admin_state: "enabled".to_string(),
                interfaces: vec![observed.clone()],
                ..Default::default()
            },
        );
        assert_eq!(bd.interfaces.len(), 1);
        assert_eq!(bd.interfaces[0], observed);

        // Re-reconciling the same member updates in place.
        let mut updated = observed.clone();
        updated.l2_service_enabled = false;
        reconcile_fragment(
            &mut bd,
            "DNAAS-LEAF-B15",
            BdFragment {
                device: "DNAAS-LEAF-B15".to_string(),
                name: "g_visaev_v251".to_string(),
                admin_state: "enabled".to_string(),
                interfaces: vec![updated.clone()],
                ..Default::default()
            },
        );
        assert_eq!(bd.interfaces.len(), 1);
        assert!(!bd.interfaces[0].l2_service_enabled);
    }

    #[test]
    fn test_resolution_parsing() {
        assert_eq!("sync".parse::<DriftResolution>(), Ok(DriftResolution::Sync));
        assert_eq!(
            "OVERRIDE".parse::<DriftResolution>(),
            Ok(DriftResolution::Override)
        );
        assert!("retry".parse::<DriftResolution>().is_err());
    }
}
