//! Device-wide discovery: scan the fleet, parse per-device state into
//! fragments, consolidate into canonical bridge domains, and persist.
//!
//! Fan-out across devices is bounded and failure-tolerant: a slow or
//! unreachable device is recorded in the scan report and does not block the
//! rest of the fleet. The consolidation step is single-threaded and
//! deterministic for a fixed set of fragments.

use chrono::Utc;
use log::{debug, info, warn};

use dnaas_api::error::{DnaasError, ProtocolError, ReportError};
use dnaas_api::model::{InterfaceRecord, InterfaceRole};
use dnaas_api::status::{DeviceOutcome, DeviceReport};
use dnosutils::commands;
use dnosutils::flat_config::{self, FlatConfig};
use dnosutils::show_bridge_domain::{self, BdShowEntry};
use dnosutils::show_interfaces;
use dnosutils::ssh;

use crate::context::ServiceContext;
use crate::datastore::DataStore;
use crate::executor::{CancelToken, ExecMode, Executor};

pub mod classify;
pub mod consolidate;

pub use consolidate::{BdFragment, NameIdentity};

/// Outcome of a full scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanReport {
    pub bridge_domains: usize,
    pub devices_scanned: Vec<String>,
    pub devices_failed: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct DiscoveryEngine<'a> {
    ctx: &'a ServiceContext,
}

impl<'a> DiscoveryEngine<'a> {
    pub fn new(ctx: &'a ServiceContext) -> Self {
        Self { ctx }
    }

    /// Scans the fleet (or the given subset), consolidates, and persists one
    /// bridge domain per transaction. Stale marking only happens after a
    /// complete, fully successful scan.
    pub fn full_scan(
        &self,
        store: &DataStore,
        device_filter: Option<&[String]>,
        cancel: &CancelToken,
    ) -> Result<ScanReport, DnaasError> {
        let devices: Vec<String> = match device_filter {
            Some(filter) => self
                .ctx
                .inventory
                .names()
                .filter(|n| filter.iter().any(|f| f == n))
                .map(str::to_string)
                .collect(),
            None => self.ctx.inventory.names().map(str::to_string).collect(),
        };
        info!("Starting discovery scan of {} device(s)", devices.len());

        for device in &devices {
            let Some(info) = self.ctx.inventory.get(device) else {
                continue;
            };
            if !ssh::probe(&info.host, info.port, self.ctx.settings.connect_timeout()) {
                warn!("Device '{device}' is unreachable; the scan will proceed without it");
            }
        }

        let plan = devices
            .iter()
            .map(|d| {
                (
                    d.clone(),
                    vec![
                        commands::show_bridge_domains(),
                        commands::show_interfaces(),
                        commands::show_config_flat(),
                    ],
                )
            })
            .collect();

        let executor = Executor::new(self.ctx);
        let results = executor.execute_parallel(&plan, ExecMode::Query, cancel)?;

        let mut report = ScanReport::default();
        let mut fragments = Vec::new();

        for (device, device_report) in &results {
            match &device_report.outcome {
                DeviceOutcome::Ok => {
                    let (device_fragments, interfaces, mut warnings) =
                        parse_device_captures(device, device_report);
                    if let Err(e) = store.upsert_device_interfaces(device, &interfaces) {
                        warn!("Failed to persist interface inventory of '{device}': {e:?}");
                        warnings.push(format!("interface inventory of '{device}' not persisted"));
                    }
                    debug!(
                        "Device '{}': {} bridge-domain fragment(s), {} interface(s)",
                        device,
                        device_fragments.len(),
                        interfaces.len()
                    );
                    fragments.extend(device_fragments);
                    report.warnings.extend(warnings);
                    report.devices_scanned.push(device.clone());
                }
                outcome => {
                    warn!("Device '{device}' failed during discovery: {outcome:?}");
                    report.devices_failed.push(device.clone());
                }
            }
        }

        let consolidated =
            consolidate::consolidate(fragments, &self.ctx.settings.global_vlan_range);
        let discovered_at = Utc::now();

        let mut seen = Vec::new();
        for mut bd in consolidated {
            bd.discovery_metadata.discovered_at = Some(discovered_at);
            bd.discovery_metadata.devices_scanned = report.devices_scanned.clone();
            bd.discovery_metadata.devices_failed = report.devices_failed.clone();

            // One bridge domain per transaction: a failure here loses this
            // record only.
            match store.upsert_bridge_domain(&bd) {
                Ok(_) => {
                    seen.push(bd.name.clone());
                    report.bridge_domains += 1;
                }
                Err(e) => {
                    warn!("Failed to persist bridge domain '{}': {e:?}", bd.name);
                    report
                        .warnings
                        .push(format!("bridge domain '{}' not persisted", bd.name));
                }
            }
        }

        if device_filter.is_none() && report.devices_failed.is_empty() && !cancel.is_cancelled() {
            let stale = store.mark_stale_missing(&seen)?;
            if stale > 0 {
                info!("Marked {stale} previously discovered bridge domain(s) stale");
            }
        }

        info!(
            "Discovery finished: {} bridge domain(s) across {} device(s), {} failed",
            report.bridge_domains,
            report.devices_scanned.len(),
            report.devices_failed.len()
        );
        Ok(report)
    }

    /// Minimal rediscovery of one bridge domain on one device, as used by
    /// the drift resolver. Returns `None` when the device no longer has the
    /// domain.
    pub fn targeted_scan(
        &self,
        device: &str,
        bd_name: &str,
        interface_pattern: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Option<BdFragment>, DnaasError> {
        info!("Targeted scan of '{bd_name}' on '{device}'");
        let interface_command = match interface_pattern {
            Some(pattern) => commands::show_interfaces_matching(pattern),
            None => commands::show_interfaces(),
        };
        let plan = [(
            device.to_string(),
            vec![commands::show_bridge_domain(bd_name), interface_command],
        )]
        .into_iter()
        .collect();

        let executor = Executor::new(self.ctx);
        let results = executor.execute_parallel(&plan, ExecMode::Query, cancel)?;
        let device_report = &results[device];

        match &device_report.outcome {
            DeviceOutcome::Ok => {}
            DeviceOutcome::Cancelled => {
                return Err(DnaasError::new(
                    dnaas_api::error::ConcurrencyError::Cancelled {
                        phase: "targeted scan".to_string(),
                    },
                ))
            }
            outcome => {
                return Err(anyhow::anyhow!("{outcome:?}")).structured(
                    ProtocolError::DeviceError {
                        device: device.to_string(),
                        command: commands::show_bridge_domain(bd_name),
                        detail: "targeted scan failed".to_string(),
                    },
                )
            }
        }

        let entries = show_bridge_domain::parse(&device_report.captures[0].output)
            .structured(ProtocolError::DeviceError {
                device: device.to_string(),
                command: device_report.captures[0].command.clone(),
                detail: "unparsable bridge-domain capture".to_string(),
            })?;
        let Some(entry) = entries.into_iter().find(|e| e.name == bd_name) else {
            return Ok(None);
        };

        let interfaces =
            show_interfaces::parse_filtered(device, &device_report.captures[1].output)
                .unwrap_or_else(|e| {
                    warn!("Interface capture on '{device}' was unparsable: {e}");
                    Vec::new()
                });

        Ok(Some(build_fragment(device, &entry, &interfaces, None)))
    }
}

/// Parses one device's three discovery captures into bridge-domain
/// fragments plus the device's interface inventory. Parse problems surface
/// as warnings, never as scan failures.
fn parse_device_captures(
    device: &str,
    report: &DeviceReport,
) -> (Vec<BdFragment>, Vec<InterfaceRecord>, Vec<String>) {
    let mut warnings = Vec::new();

    let entries = match report
        .captures
        .first()
        .map(|c| show_bridge_domain::parse(&c.output))
    {
        Some(Ok(entries)) => entries,
        Some(Err(e)) => {
            warnings.push(format!("'{device}': bridge-domain capture unparsable: {e}"));
            Vec::new()
        }
        None => Vec::new(),
    };

    let interfaces = match report
        .captures
        .get(1)
        .map(|c| show_interfaces::parse(device, &c.output))
    {
        Some(Ok(interfaces)) => interfaces,
        Some(Err(e)) => {
            warnings.push(format!("'{device}': interface capture unparsable: {e}"));
            Vec::new()
        }
        None => Vec::new(),
    };

    let flat = report.captures.get(2).map(|c| flat_config::parse(&c.output));
    if let Some(flat) = &flat {
        for parse_warning in &flat.warnings {
            warnings.push(format!(
                "'{device}' line {}: {} ('{}')",
                parse_warning.line_number, parse_warning.reason, parse_warning.line
            ));
        }
    }

    let fragments = entries
        .iter()
        .map(|entry| build_fragment(device, entry, &interfaces, flat.as_ref()))
        .collect();

    (fragments, interfaces, warnings)
}

/// Builds one fragment from a bridge-domain entry, enriching each member
/// with the interface table and the flattened configuration.
fn build_fragment(
    device: &str,
    entry: &BdShowEntry,
    interfaces: &[InterfaceRecord],
    flat: Option<&FlatConfig>,
) -> BdFragment {
    let mut members = Vec::new();
    for ifname in &entry.interfaces {
        let mut record = interfaces
            .iter()
            .find(|i| &i.interface_name == ifname)
            .cloned()
            .unwrap_or_else(|| InterfaceRecord::new(device, ifname.clone()));

        if let Some(flat_iface) = flat.and_then(|f| f.interfaces.get(ifname)) {
            if record.vlan_id.is_none() {
                record.vlan_id = flat_iface.vlan_id;
            }
            record.outer_vlan = record.outer_vlan.or(flat_iface.outer_vlan);
            record.inner_vlan = record.inner_vlan.or(flat_iface.inner_vlan);
            if let Some(l2) = flat_iface.l2_service_enabled {
                record.l2_service_enabled = l2;
            }
        }
        // Member sub-interfaces are the access edge of the service.
        record.role = InterfaceRole::Access;
        members.push(record);
    }

    let raw_lines = flat
        .map(|f| {
            f.raw_lines
                .iter()
                .filter(|line| {
                    line.contains(&entry.name)
                        || entry.interfaces.iter().any(|i| line.contains(i.as_str()))
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default();

    BdFragment {
        device: device.to_string(),
        name: entry.name.clone(),
        admin_state: entry.admin_state.clone(),
        interfaces: members,
        raw_lines,
        warnings: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use dnaas_api::primitives::vlan::VlanId;
    use dnaas_api::status::CommandCapture;

    use super::*;

    fn query_report(device: &str, captures: Vec<(&str, &str)>) -> DeviceReport {
        DeviceReport {
            device: device.to_string(),
            outcome: DeviceOutcome::Ok,
            captures: captures
                .into_iter()
                .map(|(command, output)| CommandCapture {
                    command: command.to_string(),
                    output: output.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_parse_device_captures_end_to_end() {
        let bd_capture = indoc! {"
            | Name            | Admin state | Interfaces       |
            +-----------------+-------------+------------------+
            | g_visaev_v251   | enabled     | ge100-0/0/31.251 |
        "};
        let if_capture = indoc! {"
            | Interface             | Admin   | Operational | VLAN |
            +-----------------------+---------+-------------+------+
            | ge100-0/0/31          | enabled | up          |      |
            | ge100-0/0/31.251 (L2) | enabled | up          | 251  |
        "};
        let flat_capture = indoc! {"
            interfaces ge100-0/0/31.251 vlan-id 251
            interfaces ge100-0/0/31.251 l2-service enabled
            network-services bridge-domain instance g_visaev_v251 interface ge100-0/0/31.251
        "};

        let report = query_report(
            "DNAAS-LEAF-B15",
            vec![
                ("show network-services bridge-domain | no-more", bd_capture),
                ("show interfaces | no-more", if_capture),
                ("show config | fl", flat_capture),
            ],
        );

        let (fragments, interfaces, warnings) = parse_device_captures("DNAAS-LEAF-B15", &report);
        assert!(warnings.is_empty());
        assert_eq!(interfaces.len(), 2);
        assert_eq!(fragments.len(), 1);

        let fragment = &fragments[0];
        assert_eq!(fragment.name, "g_visaev_v251");
        assert_eq!(fragment.interfaces.len(), 1);

        let member = &fragment.interfaces[0];
        assert_eq!(member.interface_name, "ge100-0/0/31.251");
        assert_eq!(member.vlan_id, Some(VlanId::new(251).unwrap()));
        assert!(member.l2_service_enabled);
        assert_eq!(member.role, InterfaceRole::Access);

        assert_eq!(fragment.raw_lines.len(), 3);
    }

    #[test]
    fn test_unparsable_capture_becomes_warning() {
        let report = query_report(
            "DNAAS-LEAF-B15",
            vec![
                ("show network-services bridge-domain | no-more", ""),
                ("show interfaces | no-more", "completely unexpected text"),
                ("show config | fl", ""),
            ],
        );
        let (fragments, interfaces, warnings) = parse_device_captures("DNAAS-LEAF-B15", &report);
        assert!(fragments.is_empty());
        assert!(interfaces.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("interface capture unparsable"));
    }

    #[test]
    fn test_member_without_interface_row_is_kept_bare() {
        let entry = BdShowEntry {
            name: "g_visaev_v251".to_string(),
            admin_state: "enabled".to_string(),
            interfaces: vec!["ge100-0/0/40.251".to_string()],
        };
        let fragment = build_fragment("DNAAS-LEAF-B15", &entry, &[], None);
        assert_eq!(fragment.interfaces.len(), 1);
        assert_eq!(fragment.interfaces[0].interface_name, "ge100-0/0/40.251");
        // VLAN can still be derived from the name suffix downstream.
        assert_eq!(fragment.interfaces[0].name_vlan(), Some(251));
    }
}
