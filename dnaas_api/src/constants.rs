/// Default location of the persistent datastore.
pub const DNAAS_DATASTORE_PATH: &str = "/var/lib/dnaas/datastore.sqlite";

/// Default location of the device inventory file.
pub const DNAAS_INVENTORY_PATH: &str = "/etc/dnaas/inventory.yaml";

/// Default location of the service settings file.
pub const DNAAS_SETTINGS_PATH: &str = "/etc/dnaas/settings.yaml";

/// Default location of the background JSONL log.
pub const DNAAS_BACKGROUND_LOG_PATH: &str = "/var/log/dnaas/dnaas-background.log";

/// Default bound on concurrently serviced devices.
pub const DEFAULT_MAX_PARALLEL: usize = 10;

/// Default per-command read timeout, in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default SSH connect timeout, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default VLAN range treated as globally scoped services.
pub const DEFAULT_GLOBAL_VLAN_RANGE: &str = "100-999";

/// Environment variables recognized by the service. Each overrides the
/// corresponding settings-file field.
pub mod env_vars {
    pub const INVENTORY_PATH: &str = "DNAAS_INVENTORY_PATH";
    pub const SETTINGS_PATH: &str = "DNAAS_SETTINGS_PATH";
    pub const DATASTORE_PATH: &str = "DNAAS_DATASTORE_PATH";
    pub const MAX_PARALLEL: &str = "DNAAS_MAX_PARALLEL";
    pub const COMMAND_TIMEOUT_SECS: &str = "DNAAS_COMMAND_TIMEOUT_SECS";
    pub const CONNECT_TIMEOUT_SECS: &str = "DNAAS_CONNECT_TIMEOUT_SECS";
    pub const GLOBAL_VLAN_RANGE: &str = "DNAAS_GLOBAL_VLAN_RANGE";
}
