//! Per-device command execution in four modes, fanned out across the fleet.
//!
//! The executor is the boundary where transport and device errors are
//! normalized into the error taxonomy: callers above it never see raw SSH or
//! parse errors. Within a device, command order is preserved exactly as
//! supplied; across devices no ordering is guaranteed.

use std::collections::BTreeMap;

use log::{debug, info, warn};

use dnaas_api::error::DnaasError;
use dnaas_api::status::{CommandCapture, DeviceOutcome, DeviceReport};
use dnosutils::commands;
use dnosutils::ssh::{detect_error, DeviceErrorKind, SshError, SshSession};

use crate::context::ServiceContext;

pub mod cancel;
pub mod parallel;

pub use cancel::CancelToken;
pub use parallel::DeviceLocks;

/// Execution modes. `CommitCheck` and `Commit` enter configuration mode;
/// `Query` never transitions modes on the device; `DryRun` never opens a
/// session at all.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecMode {
    Query,
    DryRun,
    CommitCheck,
    Commit,
}

pub struct Executor<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> Executor<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Runs `plan` with one worker per device, bounded by the configured
    /// parallelism. Per-device failures are independent; the result map
    /// always contains one report per planned device.
    pub fn execute_parallel(
        &self,
        plan: &BTreeMap<String, Vec<String>>,
        mode: ExecMode,
        cancel: &CancelToken,
    ) -> Result<BTreeMap<String, DeviceReport>, DnaasError> {
        let devices: Vec<String> = plan.keys().cloned().collect();
        debug!(
            "Executing {:?} across {} device(s), parallelism {}",
            mode,
            devices.len(),
            self.ctx.settings.max_parallel
        );
        parallel::fan_out(&devices, self.ctx.settings.max_parallel, |device| {
            self.run_device(device, &plan[device], mode, cancel)
        })
    }

    /// One device, one session, serialized against any other operation on
    /// the same device.
    fn run_device(
        &self,
        device: &str,
        commands: &[String],
        mode: ExecMode,
        cancel: &CancelToken,
    ) -> DeviceReport {
        if mode == ExecMode::DryRun {
            return DeviceReport {
                device: device.to_string(),
                outcome: DeviceOutcome::Ok,
                captures: commands
                    .iter()
                    .map(|c| CommandCapture {
                        command: c.clone(),
                        output: String::new(),
                    })
                    .collect(),
            };
        }

        let lock = self.ctx.device_locks.for_device(device);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        if cancel.is_cancelled() {
            return cancelled(device, Vec::new());
        }

        let Some(info) = self.ctx.inventory.get(device) else {
            return error_report(
                device,
                "validation",
                format!("device '{device}' is not in the inventory"),
            );
        };

        let mut session = match SshSession::open(info, self.ctx.ssh_timeouts()) {
            Ok(session) => session,
            Err(e) => return connectivity_report(device, &e),
        };

        let report = match mode {
            ExecMode::Query => self.query(&mut session, device, commands, cancel),
            ExecMode::CommitCheck => self.commit_check(&mut session, device, commands, cancel),
            ExecMode::Commit => self.commit(&mut session, device, commands, cancel),
            ExecMode::DryRun => unreachable!("handled above"),
        };
        session.close();
        report
    }

    fn query(
        &self,
        session: &mut SshSession,
        device: &str,
        commands: &[String],
        cancel: &CancelToken,
    ) -> DeviceReport {
        let mut captures = Vec::with_capacity(commands.len());
        for command in commands {
            if cancel.is_cancelled() {
                return cancelled(device, captures);
            }
            let output = match session.send(command, None) {
                Ok(output) => output,
                Err(e) => return connectivity_report(device, &e),
            };
            if let Some((kind, line)) = detect_error(&output) {
                return protocol_report(device, command, kind, &line);
            }
            captures.push(CommandCapture {
                command: command.clone(),
                output,
            });
        }
        DeviceReport {
            device: device.to_string(),
            outcome: DeviceOutcome::Ok,
            captures,
        }
    }

    /// Applies the command list in configuration mode, issues `commit
    /// check`, and leaves the device untouched: the candidate is rolled back
    /// and configuration mode exited whatever the outcome.
    fn commit_check(
        &self,
        session: &mut SshSession,
        device: &str,
        commands: &[String],
        cancel: &CancelToken,
    ) -> DeviceReport {
        let (captures, early) = self.apply_in_config_mode(session, device, commands, cancel);
        if let Some(report) = early {
            return report;
        }

        let check_output = match session.send(commands::COMMIT_CHECK, None) {
            Ok(output) => output,
            Err(e) => {
                abandon_config_mode(session);
                return connectivity_report(device, &e);
            }
        };

        let outcome = if let Some((_, line)) = detect_error(&check_output) {
            DeviceOutcome::Error {
                category: "protocol".to_string(),
                detail: format!("commit-check failed on '{device}': {line}"),
            }
        } else if commands::commit_check_reports_no_changes(&check_output) {
            info!("Device '{device}' reports no configuration changes; drift signal");
            DeviceOutcome::NoChange
        } else {
            DeviceOutcome::WouldChange
        };

        abandon_config_mode(session);
        let mut captures = captures;
        captures.push(CommandCapture {
            command: commands::COMMIT_CHECK.to_string(),
            output: check_output,
        });
        DeviceReport {
            device: device.to_string(),
            outcome,
            captures,
        }
    }

    /// Applies the command list and commits. On any device-side failure the
    /// session is rolled out of configuration mode before it is closed.
    fn commit(
        &self,
        session: &mut SshSession,
        device: &str,
        commands: &[String],
        cancel: &CancelToken,
    ) -> DeviceReport {
        let (captures, early) = self.apply_in_config_mode(session, device, commands, cancel);
        if let Some(report) = early {
            return report;
        }

        let commit_output = match session.send(commands::COMMIT_AND_EXIT, None) {
            Ok(output) => output,
            Err(e) => {
                abandon_config_mode(session);
                return connectivity_report(device, &e);
            }
        };

        if let Some((_, line)) = detect_error(&commit_output) {
            abandon_config_mode(session);
            return DeviceReport {
                device: device.to_string(),
                outcome: DeviceOutcome::Error {
                    category: "protocol".to_string(),
                    detail: format!("commit failed on '{device}': {line}"),
                },
                captures,
            };
        }

        let mut captures = captures;
        captures.push(CommandCapture {
            command: commands::COMMIT_AND_EXIT.to_string(),
            output: commit_output,
        });
        DeviceReport {
            device: device.to_string(),
            outcome: DeviceOutcome::Committed,
            captures,
        }
    }

    /// Enters configuration mode and applies the commands in order. Returns
    /// the captures so far, plus an early report if anything failed — in
    /// which case the device has already been rolled back out of
    /// configuration mode.
    fn apply_in_config_mode(
        &self,
        session: &mut SshSession,
        device: &str,
        commands: &[String],
        cancel: &CancelToken,
    ) -> (Vec<CommandCapture>, Option<DeviceReport>) {
        if let Err(e) = session.enter_config() {
            return (Vec::new(), Some(connectivity_report(device, &e)));
        }

        let mut captures = Vec::with_capacity(commands.len());
        for command in commands {
            if cancel.is_cancelled() {
                abandon_config_mode(session);
                return (Vec::new(), Some(cancelled(device, captures)));
            }
            let output = match session.send(command, None) {
                Ok(output) => output,
                Err(e) => {
                    abandon_config_mode(session);
                    return (Vec::new(), Some(connectivity_report(device, &e)));
                }
            };
            if let Some((kind, line)) = detect_error(&output) {
                abandon_config_mode(session);
                return (
                    Vec::new(),
                    Some(protocol_report(device, command, kind, &line)),
                );
            }
            captures.push(CommandCapture {
                command: command.clone(),
                output,
            });
        }
        (captures, None)
    }
}

/// Best-effort exit from configuration mode: roll back the candidate, then
/// leave. Failures are logged and swallowed; the session is about to be
/// closed either way.
fn abandon_config_mode(session: &mut SshSession) {
    if !session.in_config_mode() {
        return;
    }
    if let Err(e) = session.send(commands::ROLLBACK, None) {
        warn!(
            "Rollback on '{}' failed while leaving configuration mode: {e}",
            session.device()
        );
    }
    if let Err(e) = session.exit_config() {
        warn!(
            "Exit from configuration mode failed on '{}': {e}",
            session.device()
        );
    }
}

fn cancelled(device: &str, captures: Vec<CommandCapture>) -> DeviceReport {
    DeviceReport {
        device: device.to_string(),
        outcome: DeviceOutcome::Cancelled,
        captures,
    }
}

fn error_report(device: &str, category: &str, detail: String) -> DeviceReport {
    DeviceReport {
        device: device.to_string(),
        outcome: DeviceOutcome::Error {
            category: category.to_string(),
            detail,
        },
        captures: Vec::new(),
    }
}

fn connectivity_report(device: &str, e: &SshError) -> DeviceReport {
    error_report(device, "connectivity", format!("{e} on device '{device}'"))
}

fn protocol_report(
    device: &str,
    command: &str,
    kind: DeviceErrorKind,
    line: &str,
) -> DeviceReport {
    let detail = match kind {
        DeviceErrorKind::Syntax => format!("syntax error on '{device}' for '{command}': {line}"),
        DeviceErrorKind::AccessDenied => {
            format!("access denied on '{device}' for '{command}': {line}")
        }
        DeviceErrorKind::InvalidValue => {
            format!("invalid value on '{device}' for '{command}': {line}")
        }
        DeviceErrorKind::General => {
            format!("device '{device}' rejected '{command}': {line}")
        }
    };
    error_report(device, "protocol", detail)
}

#[cfg(test)]
mod tests {
    use dnaas_api::config::{DeviceInventory, ServiceSettings};

    use super::*;
    use crate::context::ServiceContext;

    fn test_context() -> ServiceContext {
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
        ServiceContext::new(inventory, ServiceSettings::default())
    }

    #[test]
    fn test_dry_run_renders_without_sessions() {
        let ctx = test_context();
        let executor = Executor::new(&ctx);
        let plan = maplit::btreemap! {
            "DNAAS-LEAF-B15".to_string() => vec![
                "interfaces ge100-0/0/31.251 l2-service enabled".to_string(),
                "interfaces ge100-0/0/31.251 vlan-id 251".to_string(),
            ],
        };

        let results = executor
            .execute_parallel(&plan, ExecMode::DryRun, &CancelToken::new())
            .unwrap();
        let report = &results["DNAAS-LEAF-B15"];
        assert_eq!(report.outcome, DeviceOutcome::Ok);
        assert_eq!(report.captures.len(), 2);
        assert_eq!(
            report.captures[1].command,
            "interfaces ge100-0/0/31.251 vlan-id 251"
        );
    }

    #[test]
    fn test_unknown_device_is_a_validation_error() {
        let ctx = test_context();
        let executor = Executor::new(&ctx);
        let plan = maplit::btreemap! {
            "DNAAS-LEAF-B99".to_string() => vec!["show version".to_string()],
        };

        let results = executor
            .execute_parallel(&plan, ExecMode::Query, &CancelToken::new())
            .unwrap();
        match &results["DNAAS-LEAF-B99"].outcome {
            DeviceOutcome::Error { category, detail } => {
                assert_eq!(category, "validation");
                assert!(detail.contains("DNAAS-LEAF-B99"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_pre_cancelled_token_sends_nothing() {
        let ctx = test_context();
        let executor = Executor::new(&ctx);
        let cancel = CancelToken::new();
        cancel.cancel();

        let plan = maplit::btreemap! {
            "DNAAS-LEAF-B14".to_string() => vec!["show version".to_string()],
        };

        let results = executor
            .execute_parallel(&plan, ExecMode::Query, &cancel)
            .unwrap();
        assert_eq!(results["DNAAS-LEAF-B14"].outcome, DeviceOutcome::Cancelled);
        assert!(results["DNAAS-LEAF-B14"].captures.is_empty());
    }

    #[test]
    fn test_protocol_report_names_device_and_command() {
        let report = protocol_report(
            "DNAAS-LEAF-B15",
            "interfaces ge100-0/0/31.251 vlan-id 251",
            DeviceErrorKind::InvalidValue,
            "ERROR: invalid-value",
        );
        match report.outcome {
            DeviceOutcome::Error { category, detail } => {
                assert_eq!(category, "protocol");
                assert!(detail.contains("DNAAS-LEAF-B15"));
                assert!(detail.contains("vlan-id 251"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
}
