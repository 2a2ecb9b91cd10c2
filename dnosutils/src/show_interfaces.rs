//! Parser for the tabular `show interfaces | no-more` output.
//!
//! The table is pipe-delimited with a header row naming the columns; column
//! widths vary between software trains, so cells are located by header name
//! rather than position. Sub-interfaces carrying L2 services are marked with
//! `(L2)` next to the name.

use std::collections::HashMap;

use anyhow::{Context, Error};
use log::warn;

use dnaas_api::model::{AdminStatus, InterfaceRecord, OperStatus};
use dnaas_api::primitives::vlan::VlanId;

use crate::capture::clean_capture;

const L2_MARKER: &str = "(L2)";

/// Parses a `show interfaces` capture into interface records for `device`.
///
/// Tolerates banners, blank lines, pagination artifacts, and column-width
/// variation. Rows whose interface cell is empty are skipped.
pub fn parse(device: &str, output: &str) -> Result<Vec<InterfaceRecord>, Error> {
    let cleaned = clean_capture(output);
    let mut columns: Option<HashMap<String, usize>> = None;
    let mut records = Vec::new();

    for line in cleaned.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.contains('|') || is_separator(trimmed) {
            continue;
        }

        let cells: Vec<&str> = split_row(trimmed);
        if columns.is_none() {
            if cells.iter().any(|c| c.eq_ignore_ascii_case("interface")) {
                columns = Some(header_index(&cells));
            }
            continue;
        }
        let columns = columns.as_ref().unwrap();

        match parse_row(device, &cells, columns) {
            Some(record) => records.push(record),
            None => continue,
        }
    }

    if columns.is_none() {
        // A capture with no table at all is a device-side anomaly worth
        // surfacing to the caller rather than an empty success.
        anyhow::ensure!(
            cleaned.trim().is_empty(),
            "no interface table header found in capture"
        );
    }

    Ok(records)
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '+' | '-' | '|' | ' '))
}

fn split_row(line: &str) -> Vec<&str> {
    line.trim_matches('|').split('|').map(str::trim).collect()
}

fn header_index(cells: &[&str]) -> HashMap<String, usize> {
    cells
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.to_ascii_lowercase(), idx))
        .collect()
}

fn cell<'a>(cells: &'a [&str], columns: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    columns
        .get(name)
        .and_then(|&idx| cells.get(idx))
        .copied()
        .filter(|c| !c.is_empty())
}

fn parse_row(
    device: &str,
    cells: &[&str],
    columns: &HashMap<String, usize>,
) -> Option<InterfaceRecord> {
    let name_cell = cell(cells, columns, "interface")?;
    let l2_service = name_cell.contains(L2_MARKER);
    let name = name_cell.replace(L2_MARKER, "").trim().to_string();
    if name.is_empty() {
        return None;
    }

    let mut record = InterfaceRecord::new(device, name);
    record.l2_service_enabled = l2_service;

    if let Some(admin) = cell(cells, columns, "admin") {
        record.admin_status = admin.parse().unwrap_or(AdminStatus::Unknown);
    }
    if let Some(oper) = cell(cells, columns, "operational") {
        record.oper_status = oper.parse().unwrap_or(OperStatus::Unknown);
    }

    record.vlan_id = match cell(cells, columns, "vlan") {
        Some(raw) => match raw.parse::<VlanId>() {
            Ok(vlan) => Some(vlan),
            Err(_) => {
                warn!(
                    "Unparsable VLAN cell '{}' for interface '{}' on '{}'",
                    raw, record.interface_name, device
                );
                None
            }
        },
        // Fall back to the sub-interface suffix.
        None => record
            .name_vlan()
            .and_then(|suffix| VlanId::new(suffix).ok()),
    };

    Some(record)
}

/// Convenience over [`parse`] for captures filtered with `| i <pattern>`,
/// where the header may have been filtered out. Falls back to the default
/// column layout when no header row survives.
pub fn parse_filtered(device: &str, output: &str) -> Result<Vec<InterfaceRecord>, Error> {
    let cleaned = clean_capture(output);
    let has_header = cleaned
        .lines()
        .any(|l| l.contains('|') && l.to_ascii_lowercase().contains("interface"));
    if has_header {
        return parse(device, &cleaned);
    }

    let synthetic = format!(
        "| Interface | Admin | Operational | Speed | MTU | VLAN | MAC address |\n{cleaned}"
    );
    parse(device, &synthetic).context("parsing filtered interface capture")
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use dnaas_api::model::InterfaceType;

    use super::*;

    const SAMPLE: &str = indoc! {"
        dnaas-leaf-b15 interfaces summary

        | Interface             | Admin    | Operational | Speed | MTU  | VLAN | MAC address       |
        +-----------------------+----------+-------------+-------+------+------+-------------------+
        | ge100-0/0/29          | enabled  | up          | 100G  | 9100 |      | 38:0e:4d:a1:00:29 |
        | ge100-0/0/29.251 (L2) | enabled  | up          |       |      | 251  |                   |
        | ge100-0/0/31          | enabled  | down        | 100G  | 9100 |      | 38:0e:4d:a1:00:31 |
        | bundle-60000          | enabled  | up          | 200G  | 9100 |      |                   |
        | bundle-60000.253 (L2) | enabled  | up          |       |      | 253  |                   |
        | mgmt0                 | disabled | down        | 1G    | 1500 |      | 38:0e:4d:a1:00:99 |
    "};

    #[test]
    fn test_parse_table() {
        let records = parse("DNAAS-LEAF-B15", SAMPLE).unwrap();
        assert_eq!(records.len(), 6);

        let sub = records
            .iter()
            .find(|r| r.interface_name == "ge100-0/0/29.251")
            .unwrap();
        assert!(sub.l2_service_enabled);
        assert_eq!(sub.interface_type, InterfaceType::Subinterface);
        assert_eq!(sub.vlan_id, Some(VlanId::new(251).unwrap()));
        assert_eq!(sub.admin_status, AdminStatus::Enabled);
        assert_eq!(sub.oper_status, OperStatus::Up);

        let physical = records
            .iter()
            .find(|r| r.interface_name == "ge100-0/0/31")
            .unwrap();
        assert!(!physical.l2_service_enabled);
        assert_eq!(physical.oper_status, OperStatus::Down);
        assert_eq!(physical.vlan_id, None);

        let bundle = records
            .iter()
            .find(|r| r.interface_name == "bundle-60000")
            .unwrap();
        assert_eq!(bundle.interface_type, InterfaceType::Bundle);
    }

    #[test]
    fn test_vlan_from_suffix_when_column_empty() {
        let capture = indoc! {"
            | Interface             | Admin   | Operational | VLAN |
            +-----------------------+---------+-------------+------+
            | ge100-0/0/29.640 (L2) | enabled | up          |      |
        "};
        let records = parse("DNAAS-LEAF-B14", capture).unwrap();
        assert_eq!(records[0].vlan_id, Some(VlanId::new(640).unwrap()));
    }

    #[test]
    fn test_pagination_tolerated() {
        let paginated = SAMPLE.replace(
            "| ge100-0/0/31",
            "--More--\u{8}\u{8}| ge100-0/0/31",
        );
        assert_eq!(
            parse("DNAAS-LEAF-B15", &paginated).unwrap(),
            parse("DNAAS-LEAF-B15", SAMPLE).unwrap()
        );
    }

    #[test]
    fn test_filtered_capture_without_header() {
        let capture = "| ge100-0/0/31.251 (L2) | enabled  | up |  |  | 251 |  |\n";
        let records = parse_filtered("DNAAS-LEAF-B15", capture).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].vlan_id, Some(VlanId::new(251).unwrap()));
        assert!(records[0].l2_service_enabled);
    }

    #[test]
    fn test_empty_capture_rejected() {
        parse("DNAAS-LEAF-B15", "garbage with no table\n").unwrap_err();
        assert!(parse("DNAAS-LEAF-B15", "").unwrap().is_empty());
    }
}
