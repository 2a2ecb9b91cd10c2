use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

use crate::model::DeploymentPlan;

/// Stage of a deployment record. `CheckOk` means every device passed
/// commit-check; `Failed` covers partial commits (the record lists which
/// devices committed).
#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DeploymentStage {
    #[default]
    Planned,
    CheckOk,
    Committed,
    Failed,
    Aborted,
}

/// State of an assignment row. An assignment stays `Assigned` across
/// deployments of the same holder and only leaves the state on release.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum AssignmentStatus {
    #[default]
    Assigned,
    Released,
}

/// Deployment state recorded on the bridge-domain row itself.
#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum BdDeploymentStatus {
    #[default]
    Discovered,
    Pending,
    Deployed,
    /// A later full scan no longer observed this record on any device.
    Stale,
}

#[derive(
    Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DriftKind {
    InterfaceAlreadyConfigured,
    BridgeDomainAlreadyExists,
    VlanConflict,
    ConfigurationMismatch,
}

#[derive(
    Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DriftSource {
    CommitCheck,
    DeploymentFailure,
    Validation,
}

#[derive(
    Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DriftSeverity {
    Info,
    #[default]
    Warning,
    Critical,
}

/// A divergence between the datastore's view of a device and the device's
/// actual configuration.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub kind: DriftKind,
    pub device_name: String,
    pub interface_name: Option<String>,
    pub detection_source: DriftSource,
    pub severity: DriftSeverity,
    pub expected: String,
    pub observed: String,
}

/// Captured output of one command on one device.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CommandCapture {
    pub command: String,
    pub output: String,
}

/// Outcome of one device's run in one execution mode. Error details carry
/// the normalized category string of the underlying error kind.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviceOutcome {
    /// Query or dry-run succeeded.
    Ok,
    /// Commit-check: the candidate configuration would change the device.
    WouldChange,
    /// Commit-check: the device reported no configuration changes. A drift
    /// signal, not a success.
    NoChange,
    /// Commit applied and persisted.
    Committed,
    Error { category: String, detail: String },
    Cancelled,
}

impl DeviceOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, DeviceOutcome::Error { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeviceOutcome::Cancelled)
    }
}

/// Per-device result of one execution phase.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub device: String,
    pub outcome: DeviceOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub captures: Vec<CommandCapture>,
}

/// The full record of one deployment attempt, persisted stage by stage.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployment_id: Uuid,
    pub bridge_domain: String,
    pub session_id: Uuid,
    pub stage: DeploymentStage,
    pub plan: DeploymentPlan,
    #[serde(default)]
    pub check_results: Vec<DeviceReport>,
    #[serde(default)]
    pub commit_results: Vec<DeviceReport>,
    #[serde(default)]
    pub drift_events: Vec<DriftEvent>,
    /// Inverse commands per committed device, generated on partial commit
    /// failure. Never executed automatically.
    #[serde(default)]
    pub rollback_plan: Option<DeploymentPlan>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    pub fn new(bridge_domain: impl Into<String>, session_id: Uuid, plan: DeploymentPlan) -> Self {
        Self {
            deployment_id: Uuid::new_v4(),
            bridge_domain: bridge_domain.into(),
            session_id,
            stage: DeploymentStage::Planned,
            plan,
            check_results: Vec::new(),
            commit_results: Vec::new(),
            drift_events: Vec::new(),
            rollback_plan: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn committed_devices(&self) -> Vec<&str> {
        self.commit_results
            .iter()
            .filter(|r| matches!(r.outcome, DeviceOutcome::Committed))
            .map(|r| r.device.as_str())
            .collect()
    }

    pub fn failed_devices(&self) -> Vec<&str> {
        self.commit_results
            .iter()
            .filter(|r| r.outcome.is_error())
            .map(|r| r.device.as_str())
            .collect()
    }
}
