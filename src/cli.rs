use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::engine::DriftResolution;
use crate::DNAAS_VERSION;

#[derive(Parser, Debug)]
#[clap(version = DNAAS_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Path to the service settings file
    #[arg(global = true, short, long)]
    pub settings: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the settings and device inventory without touching devices
    Validate,

    /// TCP-probe the SSH port of one device, or the whole inventory
    Probe {
        /// Device name; probes every inventory device when omitted
        device: Option<String>,
    },

    /// Scan devices, consolidate bridge domains, and persist them
    Discover {
        /// Restrict the scan to these devices (repeatable)
        #[clap(long = "device")]
        devices: Vec<String>,
    },

    /// List known bridge domains
    List {
        /// Only bridge domains assigned to this user
        #[clap(long)]
        user: Option<String>,
    },

    /// Show one bridge domain in full
    Show {
        /// Canonical bridge-domain name
        bridge_domain: String,
    },

    /// Assign a bridge domain to a user for exclusive editing
    Assign {
        bridge_domain: String,

        #[clap(long)]
        user: String,

        #[clap(long)]
        reason: Option<String>,
    },

    /// Release a bridge domain held by a user
    Release {
        bridge_domain: String,

        #[clap(long)]
        user: String,
    },

    /// Deploy an edit session against the fleet
    Deploy {
        bridge_domain: String,

        #[clap(long)]
        user: String,

        /// YAML file with the ordered change list
        #[clap(long)]
        changes: PathBuf,

        /// Plan only; no device interaction
        #[clap(long)]
        dry_run: bool,

        /// Resolution applied when commit-check reports drift
        #[clap(long, default_value = "abort")]
        on_drift: DriftResolution,
    },
}
