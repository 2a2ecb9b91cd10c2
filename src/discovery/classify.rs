//! DNAAS service-type classification.
//!
//! Pure and deterministic: the same member set always classifies the same
//! way, regardless of member order. No I/O happens here.

use std::collections::BTreeSet;

use dnaas_api::model::{DnaasType, InterfaceRecord};
use dnaas_api::primitives::vlan::VlanId;

/// The classifier's verdict. `confidence` is 1.0 for a rule match and the
/// matching-member fraction for `Unknown`.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub dnaas_type: DnaasType,
    pub confidence: f64,
}

/// Classifies a bridge domain's member set against the service VLAN.
///
/// Rules, in order: single-tagged when every member carries only a matching
/// `vlan-id` with l2-service enabled; QinQ when members carry `vlan-tags`
/// with a constant outer tag (single-inner vs. inner-range decided by the
/// distinct inner tags); otherwise unknown. Bundle members classify by the
/// same tagging rules as physical ones.
pub fn classify(members: &[InterfaceRecord], service_vlan: Option<VlanId>) -> Classification {
    if members.is_empty() {
        return Classification {
            dnaas_type: DnaasType::Unknown,
            confidence: 0.0,
        };
    }

    let tagged: Vec<&InterfaceRecord> = members
        .iter()
        .filter(|m| m.outer_vlan.is_some() || m.inner_vlan.is_some())
        .collect();

    if tagged.is_empty() {
        let target = service_vlan.or_else(|| single_common_vlan(members));
        let matching = members
            .iter()
            .filter(|m| m.l2_service_enabled && m.vlan_id.is_some() && m.vlan_id == target)
            .count();
        if target.is_some() && matching == members.len() {
            return Classification {
                dnaas_type: DnaasType::SingleTagged,
                confidence: 1.0,
            };
        }
        return Classification {
            dnaas_type: DnaasType::Unknown,
            confidence: matching as f64 / members.len() as f64,
        };
    }

    // QinQ path: the outer tag must be constant across every tagged member.
    let outers: BTreeSet<VlanId> = tagged.iter().filter_map(|m| m.outer_vlan).collect();
    let inners: BTreeSet<VlanId> = tagged.iter().filter_map(|m| m.inner_vlan).collect();

    if tagged.len() == members.len() && outers.len() == 1 && !inners.is_empty() {
        let dnaas_type = if inners.len() == 1 {
            DnaasType::QinqSingleInner
        } else {
            DnaasType::QinqInnerRange
        };
        return Classification {
            dnaas_type,
            confidence: 1.0,
        };
    }

    Classification {
        dnaas_type: DnaasType::Unknown,
        confidence: tagged.len() as f64 / members.len() as f64,
    }
}

/// The single VLAN shared by all members, when there is exactly one.
fn single_common_vlan(members: &[InterfaceRecord]) -> Option<VlanId> {
    let vlans: BTreeSet<VlanId> = members.iter().filter_map(|m| m.vlan_id).collect();
    match vlans.len() {
        1 => vlans.into_iter().next(),
        _ => None,
    }
}
