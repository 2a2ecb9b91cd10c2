//! Parser for the flattened CLI configuration (`show config | fl`).
//!
//! Each line is one fully-qualified statement. The grammar recognized here
//! is the subset the service manages:
//!
//! ```text
//! network-services bridge-domain instance <bd>
//! network-services bridge-domain instance <bd> admin-state <state>
//! network-services bridge-domain instance <bd> interface <ifname>
//! interfaces <ifname> vlan-id <v>
//! interfaces <ifname> l2-service <enabled|disabled>
//! interfaces <ifname> vlan-tags outer-tag <o> inner-tag <i>
//! ```
//!
//! Lines under these prefixes with an unknown continuation produce a
//! structured warning, never a silent drop; lines outside the managed
//! prefixes are ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dnaas_api::primitives::vlan::VlanId;

use crate::capture::clean_capture;

const BD_PREFIX: &str = "network-services bridge-domain instance ";
const IF_PREFIX: &str = "interfaces ";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub line_number: usize,
    pub line: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlatBridgeDomain {
    pub name: String,
    pub admin_state: Option<String>,
    /// Member interfaces in configuration order.
    pub interfaces: Vec<String>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlatInterface {
    pub name: String,
    pub vlan_id: Option<VlanId>,
    pub l2_service_enabled: Option<bool>,
    pub outer_vlan: Option<VlanId>,
    pub inner_vlan: Option<VlanId>,
}

/// The managed slice of one device's flattened configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FlatConfig {
    pub bridge_domains: BTreeMap<String, FlatBridgeDomain>,
    pub interfaces: BTreeMap<String, FlatInterface>,
    pub warnings: Vec<ParseWarning>,
    /// The managed lines as observed, in capture order.
    pub raw_lines: Vec<String>,
}

pub fn parse(output: &str) -> FlatConfig {
    let cleaned = clean_capture(output);
    let mut config = FlatConfig::default();

    for (idx, line) in cleaned.lines().enumerate() {
        let line_number = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix(BD_PREFIX) {
            config.raw_lines.push(trimmed.to_string());
            parse_bridge_domain_line(&mut config, line_number, trimmed, rest);
        } else if let Some(rest) = trimmed.strip_prefix(IF_PREFIX) {
            parse_interface_line(&mut config, line_number, trimmed, rest);
        }
        // Anything else is outside the managed grammar.
    }

    config
}

fn parse_bridge_domain_line(config: &mut FlatConfig, line_number: usize, line: &str, rest: &str) {
    let mut tokens = rest.split_whitespace();
    let Some(name) = tokens.next() else {
        warn(config, line_number, line, "missing bridge-domain name");
        return;
    };

    let entry = config
        .bridge_domains
        .entry(name.to_string())
        .or_insert_with(|| FlatBridgeDomain {
            name: name.to_string(),
            ..Default::default()
        });

    match (tokens.next(), tokens.next(), tokens.next()) {
        // Bare instance declaration.
        (None, _, _) => {}
        (Some("admin-state"), Some(state), None) => {
            entry.admin_state = Some(state.to_string());
        }
        (Some("interface"), Some(ifname), None) => {
            let ifname = ifname.to_string();
            if !entry.interfaces.contains(&ifname) {
                entry.interfaces.push(ifname);
            }
        }
        _ => warn(
            config,
            line_number,
            line,
            "unknown bridge-domain statement",
        ),
    }
}

fn parse_interface_line(config: &mut FlatConfig, line_number: usize, line: &str, rest: &str) {
    let mut tokens = rest.split_whitespace();
    let Some(name) = tokens.next() else {
        warn(config, line_number, line, "missing interface name");
        return;
    };

    // Only attribute statements are managed; bare interface declarations and
    // physical-layer settings are outside the grammar.
    let attributes: Vec<&str> = tokens.collect();
    if attributes.is_empty() {
        return;
    }

    let managed = matches!(attributes[0], "vlan-id" | "l2-service" | "vlan-tags");
    if !managed {
        return;
    }
    config.raw_lines.push(line.to_string());

    let entry = config
        .interfaces
        .entry(name.to_string())
        .or_insert_with(|| FlatInterface {
            name: name.to_string(),
            ..Default::default()
        });

    match attributes.as_slice() {
        ["vlan-id", value] => match value.parse::<VlanId>() {
            Ok(vlan) => entry.vlan_id = Some(vlan),
            Err(e) => warn(config, line_number, line, &e.to_string()),
        },
        ["l2-service", "enabled"] => entry.l2_service_enabled = Some(true),
        ["l2-service", "disabled"] => entry.l2_service_enabled = Some(false),
        ["vlan-tags", "outer-tag", outer, "inner-tag", inner] => {
            match (outer.parse::<VlanId>(), inner.parse::<VlanId>()) {
                (Ok(outer), Ok(inner)) => {
                    entry.outer_vlan = Some(outer);
                    entry.inner_vlan = Some(inner);
                }
                _ => warn(config, line_number, line, "unparsable vlan-tags values"),
            }
        }
        _ => warn(config, line_number, line, "unknown interface statement"),
    }
}

fn warn(config: &mut FlatConfig, line_number: usize, line: &str, reason: &str) {
    config.warnings.push(ParseWarning {
        line_number,
        line: line.to_string(),
        reason: reason.to_string(),
    });
}
