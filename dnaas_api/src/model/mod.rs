mod bridge_domain;
mod change;
mod interface;

pub use bridge_domain::{
    BridgeDomain, ConsolidationInfo, DiscoveryMetadata, DnaasType, Scope, TopologyType,
};
pub use change::{Change, DeploymentPlan, EditSession};
pub use interface::{
    split_subinterface, AdminStatus, InterfaceRecord, InterfaceRole, InterfaceType, OperStatus,
};
