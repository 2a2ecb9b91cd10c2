//! The deployment engine: validate, plan, commit-check everywhere, resolve
//! drift, then commit.
//!
//! The protocol discipline lives here: what passes check is what gets
//! committed, a "no changes" answer is drift rather than success, and a
//! protocol error during check aborts before any device commits. Partial
//! commit failures are recorded with the exact committed/failed split and a
//! rollback plan for operator action — never executed automatically.

use chrono::Utc;
use log::{debug, error, info, warn};

use dnaas_api::error::{
    ConcurrencyError, DnaasError, ProtocolError, ReportError, ValidationError,
};
use dnaas_api::model::{BridgeDomain, Change, EditSession, InterfaceRecord};
use dnaas_api::status::{
    BdDeploymentStatus, DeploymentRecord, DeploymentStage, DeviceOutcome, DeviceReport,
};
use dnosutils::commands;

use crate::context::ServiceContext;
use crate::datastore::DataStore;
use crate::executor::{CancelToken, ExecMode, Executor};
use crate::{validation, workspace};

pub mod drift;
pub mod plan;

pub use drift::{DriftHandler, DriftOutcome, DriftResolution};

/// Bound on sync-and-replan rounds within one deployment.
const MAX_REPLANS: usize = 2;

pub struct DeploymentEngine<'a> {
    ctx: &'a ServiceContext,
    resolution: DriftResolution,
}

impl<'a> DeploymentEngine<'a> {
    pub fn new(ctx: &'a ServiceContext, resolution: DriftResolution) -> Self {
        Self { ctx, resolution }
    }

    /// Runs the full two-phase deployment for an edit session and returns
    /// the persisted record. `dry_run` stops after planning.
    pub fn deploy(
        &self,
        store: &DataStore,
        session: &EditSession,
        dry_run: bool,
        cancel: &CancelToken,
    ) -> Result<DeploymentRecord, DnaasError> {
        let mut bd = store
            .get_bridge_domain(&session.bridge_domain)?
            .structured(ValidationError::UnknownBridgeDomain {
                bridge_domain: session.bridge_domain.clone(),
            })?;

        // Exclusive-editing and per-change validation run before any device
        // is contacted.
        workspace::ensure_holder(store, &bd.name, &session.user)?;
        validation::validate_session(self.ctx, store, &bd, session)?;

        let mut current_plan = plan::build_plan(&bd, session)?;
        let mut record = DeploymentRecord::new(bd.name.clone(), session.id, current_plan.clone());
        store.record_deployment(&record)?;

        if dry_run {
            info!(
                "Dry run: {} command(s) across {} device(s) for '{}'",
                current_plan.total_commands(),
                current_plan.commands.len(),
                bd.name
            );
            return Ok(record);
        }

        if current_plan.is_empty() {
            return self.conclude_empty(store, &mut record);
        }

        let executor = Executor::new(self.ctx);

        // Commit-check stage, re-entered after each drift sync.
        let mut replans = 0;
        loop {
            info!(
                "Commit-check of '{}' on {} device(s)",
                bd.name,
                current_plan.commands.len()
            );
            let results =
                executor.execute_parallel(&current_plan.commands, ExecMode::CommitCheck, cancel)?;
            record.plan = current_plan.clone();
            record.check_results = results.into_values().collect();
            store.record_deployment(&record)?;

            if record.check_results.iter().any(|r| r.outcome.is_cancelled()) {
                return self.abort(store, &mut record, "commit-check cancelled");
            }

            if let Some(failed) = record.check_results.iter().find(|r| r.outcome.is_error()) {
                let detail = outcome_detail(failed);
                let device = failed.device.clone();
                self.abort(store, &mut record, "commit-check failed")?;
                return Err(DnaasError::new(ProtocolError::CommitCheckFailed {
                    device,
                    detail,
                }));
            }

            let drifted: Vec<&DeviceReport> = record
                .check_results
                .iter()
                .filter(|r| r.outcome == DeviceOutcome::NoChange)
                .collect();
            if drifted.is_empty() {
                record.stage = DeploymentStage::CheckOk;
                store.record_deployment(&record)?;
                break;
            }

            // Drift path: classify, persist the events, hand off.
            let events = drift::events_from_check(session, &drifted);
            for event in &events {
                warn!(
                    "Drift on '{}': {} ({:?})",
                    event.device_name, event.observed, event.kind
                );
                store.append_drift_event(Some(&record.deployment_id), event)?;
            }
            record.drift_events.extend(events.iter().cloned());
            store.record_deployment(&record)?;

            let handler = DriftHandler::new(self.ctx, self.resolution);
            let outcome =
                match handler.resolve(store, &mut bd, session, current_plan, &events, cancel) {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        self.abort(store, &mut record, "drift resolution failed")?;
                        return Err(e);
                    }
                };

            match outcome {
                DriftOutcome::Concluded => {
                    return self.conclude_empty(store, &mut record);
                }
                DriftOutcome::Proceed(plan) => {
                    current_plan = plan;
                    record.plan = current_plan.clone();
                    record.stage = DeploymentStage::CheckOk;
                    store.record_deployment(&record)?;
                    break;
                }
                DriftOutcome::Recheck(plan) => {
                    replans += 1;
                    if replans > MAX_REPLANS {
                        self.abort(store, &mut record, "replan limit reached")?;
                        return Err(DnaasError::new(ConcurrencyError::DeadlineExceeded {
                            phase: "drift replan".to_string(),
                        }));
                    }
                    debug!("Re-entering commit-check with replanned commands");
                    current_plan = plan;
                }
            }
        }

        // Commit stage: the checked plan, verbatim.
        info!(
            "Committing '{}' on {} device(s)",
            bd.name,
            current_plan.commands.len()
        );
        let results = executor.execute_parallel(&current_plan.commands, ExecMode::Commit, cancel)?;
        record.commit_results = results.into_values().collect();
        record.ended_at = Some(Utc::now());

        let committed: Vec<String> = record
            .committed_devices()
            .iter()
            .map(|d| d.to_string())
            .collect();
        let troubled = record.commit_results.len() - committed.len();

        if troubled == 0 {
            record.stage = DeploymentStage::Committed;
            store.record_deployment(&record)?;

            apply_session(&mut bd, session);
            store.upsert_bridge_domain(&bd)?;
            store.set_deployment_status(&bd.name, BdDeploymentStatus::Deployed, record.ended_at)?;
            info!("Deployment of '{}' committed on all devices", bd.name);
        } else if committed.is_empty() {
            record.stage = DeploymentStage::Aborted;
            store.record_deployment(&record)?;
            error!(
                "Deployment of '{}' aborted; no device committed ({troubled} failed)",
                bd.name
            );
        } else {
            // Partial fleet failure: committed devices stay committed, the
            // record carries the split and the inverse commands.
            record.stage = DeploymentStage::Failed;
            let committed_refs: Vec<&str> = committed.iter().map(String::as_str).collect();
            record.rollback_plan = Some(plan::build_rollback_plan(&bd, session, &committed_refs)?);
            store.record_deployment(&record)?;
            error!(
                "Deployment of '{}' failed: committed on {:?}, failed on {:?}; rollback plan recorded",
                bd.name,
                committed,
                record.failed_devices()
            );
        }

        Ok(record)
    }

    /// Concludes a deployment whose remaining change set is empty: nothing
    /// to send, stage `committed` with zero commands.
    fn conclude_empty(
        &self,
        store: &DataStore,
        record: &mut DeploymentRecord,
    ) -> Result<DeploymentRecord, DnaasError> {
        info!(
            "Nothing to deploy for '{}'; concluding with zero commands",
            record.bridge_domain
        );
        record.stage = DeploymentStage::Committed;
        record.ended_at = Some(Utc::now());
        store.record_deployment(record)?;
        Ok(record.clone())
    }

    fn abort(
        &self,
        store: &DataStore,
        record: &mut DeploymentRecord,
        why: &str,
    ) -> Result<DeploymentRecord, DnaasError> {
        warn!("Deployment of '{}' aborted: {why}", record.bridge_domain);
        record.stage = DeploymentStage::Aborted;
        record.ended_at = Some(Utc::now());
        store.record_deployment(record)?;
        Ok(record.clone())
    }
}

fn outcome_detail(report: &DeviceReport) -> String {
    match &report.outcome {
        DeviceOutcome::Error { detail, .. } => detail.clone(),
        other => format!("{other:?}"),
    }
}

/// Applies a committed session to the canonical record so the datastore
/// reflects the fleet.
fn apply_session(bd: &mut BridgeDomain, session: &EditSession) {
    for change in &session.changes {
        match change {
            Change::AddInterface {
                device,
                interface,
                vlan_id,
                outer_vlan,
                inner_vlan,
            } => {
                add_member(bd, device, interface, *vlan_id, *outer_vlan, *inner_vlan);
            }
            Change::RemoveInterface {
                device, interface, ..
            } => {
                bd.interfaces.retain(|member| {
                    !(member.device_name == *device && member.base_name() == interface.as_str())
                });
            }
            Change::ModifyInterface {
                device,
                interface,
                vlan_id,
                outer_vlan,
                inner_vlan,
            } => {
                if let Some(member) = bd.interfaces.iter_mut().find(|member| {
                    member.device_name == *device && member.base_name() == interface.as_str()
                }) {
                    member.vlan_id = vlan_id.or(member.vlan_id);
                    member.outer_vlan = outer_vlan.or(member.outer_vlan);
                    member.inner_vlan = inner_vlan.or(member.inner_vlan);
                }
            }
            Change::MoveInterface {
                from_device,
                to_device,
                interface,
                vlan_id,
            } => {
                bd.interfaces.retain(|member| {
                    !(member.device_name == *from_device
                        && member.base_name() == interface.as_str())
                });
                add_member(bd, to_device, interface, *vlan_id, None, None);
            }
        }
    }
    bd.interfaces.sort_by(|a, b| {
        (&a.device_name, &a.interface_name).cmp(&(&b.device_name, &b.interface_name))
    });
}

fn add_member(
    bd: &mut BridgeDomain,
    device: &str,
    interface: &str,
    vlan_id: Option<dnaas_api::primitives::vlan::VlanId>,
    outer: Option<dnaas_api::primitives::vlan::VlanId>,
    inner: Option<dnaas_api::primitives::vlan::VlanId>,
) {
    let Some(vlan) = vlan_id.or(bd.vlan_id) else {
        warn!("Cannot record member '{interface}' on '{device}': no VLAN id");
        return;
    };
    let Ok(name) = commands::subinterface_name(interface, vlan) else {
        // Already validated by the planner; a suffixed name here is a bug.
        warn!("Skipping member record for suffixed name '{interface}'");
        return;
    };

    let already = bd
        .interfaces
        .iter()
        .any(|member| member.device_name == device && member.interface_name == name);
    if already {
        return;
    }

    let mut member = InterfaceRecord::new(device, name);
    member.vlan_id = Some(vlan);
    member.outer_vlan = outer.or(bd.outer_vlan);
    member.inner_vlan = inner.or(bd.inner_vlan);
    member.l2_service_enabled = true;
    member.role = dnaas_api::model::InterfaceRole::Access;
    bd.interfaces.push(member);
}

#[cfg(test)]
mod tests {
    use dnaas_api::model::DnaasType;
    use dnaas_api::primitives::vlan::VlanId;

    use super::*;

    fn vlan(id: u16) -> VlanId {
        VlanId::new(id).unwrap()
    }

    #[test]
    fn test_apply_session_add_and_remove() {
        let mut bd = BridgeDomain {
            name: "g_visaev_v251".to_string(),
            vlan_id: Some(vlan(251)),
            dnaas_type: DnaasType::SingleTagged,
            ..Default::default()
        };

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
        apply_session(&mut bd, &session);
        assert_eq!(bd.interfaces.len(), 1);
        assert_eq!(bd.interfaces[0].interface_name, "ge100-0/0/31.251");
        assert_eq!(bd.interfaces[0].vlan_id, Some(vlan(251)));
        assert!(bd.interfaces[0].l2_service_enabled);

        // Applying the same session twice does not duplicate the member.
        apply_session(&mut bd, &session);
        assert_eq!(bd.interfaces.len(), 1);

        let removal = EditSession::new(
            "g_visaev_v251",
            "visaev",
            vec![Change::RemoveInterface {
                device: "DNAAS-LEAF-B15".to_string(),
                interface: "ge100-0/0/31".to_string(),
                vlan_id: None,
            }],
        );
        apply_session(&mut bd, &removal);
        assert!(bd.interfaces.is_empty());
    }

    #[test]
    fn test_apply_session_move() {
        let mut bd = BridgeDomain {
            name: "g_visaev_v251".to_string(),
            vlan_id: Some(vlan(251)),
            dnaas_type: DnaasType::SingleTagged,
            ..Default::default()
        };
        apply_session(
            &mut bd,
            &EditSession::new(
                "g_visaev_v251",
                "visaev",
                vec![Change::AddInterface {
                    device: "DNAAS-LEAF-B14".to_string(),
                    interface: "ge100-0/0/29".to_string(),
                    vlan_id: None,
                    outer_vlan: None,
                    inner_vlan: None,
                }],
            ),
        );

        apply_session(
            &mut bd,
            &EditSession::new(
                "g_visaev_v251",
                "visaev",
                vec![Change::MoveInterface {
                    from_device: "DNAAS-LEAF-B14".to_string(),
                    to_device: "DNAAS-LEAF-B15".to_string(),
                    interface: "ge100-0/0/29".to_string(),
                    vlan_id: None,
                }],
            ),
        );
        assert_eq!(bd.interfaces.len(), 1);
        assert_eq!(bd.interfaces[0].device_name, "DNAAS-LEAF-B15");
    }
}
