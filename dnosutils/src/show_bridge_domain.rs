//! Parser for `show network-services bridge-domain` output.
//!
//! Two shapes exist: the fleet summary table (one row per bridge domain with
//! its member interfaces) and the per-domain detail block returned when a
//! name is given. Both yield the same entry type: name, admin state, and the
//! ordered member interface list.

use anyhow::{bail, Error};

use crate::capture::clean_capture;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BdShowEntry {
    pub name: String,
    pub admin_state: String,
    /// Member interface names, in device order.
    pub interfaces: Vec<String>,
}

/// Parses either output shape into entries. Unrecognized captures fail; a
/// capture that is only banners and blank lines yields no entries.
pub fn parse(output: &str) -> Result<Vec<BdShowEntry>, Error> {
    let cleaned = clean_capture(output);
    if cleaned.contains("Bridge domain:") {
        parse_detail_blocks(&cleaned)
    } else if cleaned.lines().any(|l| l.contains('|')) {
        parse_summary_table(&cleaned)
    } else {
        // Only banners and free text; nothing configured.
        Ok(Vec::new())
    }
}

/// Detail blocks:
///
/// ```text
/// Bridge domain: g_visaev_v253_Spirent
///   Admin state: enabled
///   Interfaces:
///     ge100-0/0/29.253
///     bundle-60000.253
/// ```
fn parse_detail_blocks(cleaned: &str) -> Result<Vec<BdShowEntry>, Error> {
    let mut entries: Vec<BdShowEntry> = Vec::new();
    let mut in_interface_list = false;

    for line in cleaned.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(name) = trimmed.strip_prefix("Bridge domain:") {
            entries.push(BdShowEntry {
                name: name.trim().to_string(),
                ..Default::default()
            });
            in_interface_list = false;
        } else if let Some(state) = trimmed.strip_prefix("Admin state:") {
            let Some(current) = entries.last_mut() else {
                bail!("admin state line before any bridge domain: '{trimmed}'");
            };
            current.admin_state = state.trim().to_string();
            in_interface_list = false;
        } else if trimmed == "Interfaces:" {
            if entries.is_empty() {
                bail!("interface list before any bridge domain");
            }
            in_interface_list = true;
        } else if in_interface_list {
            let Some(current) = entries.last_mut() else {
                unreachable!("interface list flag requires an entry");
            };
            current.interfaces.push(trimmed.to_string());
        }
        // Other detail lines (VLAN counters, MAC table sizes) are ignored.
    }

    Ok(entries)
}

/// Summary table:
///
/// ```text
/// | Name                  | Admin state | Interfaces                          |
/// +-----------------------+-------------+-------------------------------------+
/// | g_visaev_v253_Spirent | enabled     | ge100-0/0/29.253, ge100-0/0/30.253  |
/// ```
fn parse_summary_table(cleaned: &str) -> Result<Vec<BdShowEntry>, Error> {
    let mut entries = Vec::new();
    let mut saw_header = false;

    for line in cleaned.lines() {
        let trimmed = line.trim();
        if !trimmed.contains('|') || is_separator(trimmed) {
            continue;
        }

        let cells: Vec<&str> = trimmed
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();

        if !saw_header {
            if cells.first().is_some_and(|c| c.eq_ignore_ascii_case("name")) {
                saw_header = true;
                continue;
            }
            bail!("bridge-domain table has no header row");
        }

        let [name, admin_state, interfaces] = cells.as_slice() else {
            bail!("malformed bridge-domain row: '{trimmed}'");
        };
        if name.is_empty() {
            continue;
        }
        entries.push(BdShowEntry {
            name: name.to_string(),
            admin_state: admin_state.to_string(),
            interfaces: interfaces
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }

    Ok(entries)
}

fn is_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '+' | '-' | '|' | ' '))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn test_summary_table() {
        let capture = indoc! {"
            Bridge domains on dnaas-leaf-b14: 2

            | Name                  | Admin state | Interfaces                         |
            +-----------------------+-------------+------------------------------------+
            | g_visaev_v253_Spirent | enabled     | ge100-0/0/29.253, ge100-0/0/30.253 |
            | visaev_253_test       | enabled     | bundle-60000.253                   |
        "};
        let entries = parse(capture).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "g_visaev_v253_Spirent");
        assert_eq!(
            entries[0].interfaces,
            vec!["ge100-0/0/29.253", "ge100-0/0/30.253"]
        );
        assert_eq!(entries[1].interfaces, vec!["bundle-60000.253"]);
    }

    #[test]
    fn test_detail_block() {
        let capture = indoc! {"
            Bridge domain: g_visaev_v251
              Admin state: enabled
              MAC table size: 32
              Interfaces:
                ge100-0/0/31.251
                ge100-0/0/32.251
        "};
        let entries = parse(capture).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].admin_state, "enabled");
        assert_eq!(
            entries[0].interfaces,
            vec!["ge100-0/0/31.251", "ge100-0/0/32.251"]
        );
    }

    #[test]
    fn test_multiple_detail_blocks() {
        let capture = indoc! {"
            Bridge domain: g_visaev_v251
              Admin state: enabled
              Interfaces:
                ge100-0/0/31.251

            Bridge domain: l_oalfasi_lab
              Admin state: disabled
              Interfaces:
                ge100-0/0/40.640
        "};
        let entries = parse(capture).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].name, "l_oalfasi_lab");
        assert_eq!(entries[1].admin_state, "disabled");
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("no bridge domains configured\n").unwrap().is_empty());
    }

    #[test]
    fn test_pagination_tolerated() {
        let capture = "Bridge domain: g_visaev_v251\r\n  Admin state: enabled\r\n--More--\u{8}\u{8}  Interfaces:\r\n    ge100-0/0/31.251\r\n";
        let entries = parse(capture).unwrap();
        assert_eq!(entries[0].interfaces, vec!["ge100-0/0/31.251"]);
    }
}
