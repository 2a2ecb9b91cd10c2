use std::path::{Path, PathBuf};

use clap::Parser;
use log::{error, info, warn};

use dnaas::cli::{Cli, Commands};
use dnaas::context::ServiceContext;
use dnaas::datastore::DataStore;
use dnaas::discovery::DiscoveryEngine;
use dnaas::engine::DeploymentEngine;
use dnaas::executor::CancelToken;
use dnaas::{logging, workspace};
use dnaas_api::config::{DeviceInventory, ServiceSettings};
use dnaas_api::constants;
use dnaas_api::error::{DnaasError, ReportError, ValidationError};
use dnaas_api::model::{Change, EditSession};
use dnaas_api::status::DeploymentStage;
use dnosutils::ssh;

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(
        cli.verbosity,
        Path::new(constants::DNAAS_BACKGROUND_LOG_PATH),
    ) {
        eprintln!("Failed to set up logging: {e:?}");
        std::process::exit(1);
    }

    if let Err(e) = run(cli) {
        error!("{e:?}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), DnaasError> {
    let settings_path = cli
        .settings
        .or_else(|| {
            std::env::var(constants::env_vars::SETTINGS_PATH)
                .ok()
                .map(PathBuf::from)
        })
        .unwrap_or_else(|| PathBuf::from(constants::DNAAS_SETTINGS_PATH));
    let settings = ServiceSettings::load(&settings_path)?;
    let inventory = DeviceInventory::load(&settings.inventory_path)?;
    let ctx = ServiceContext::new(inventory, settings);
    let cancel = CancelToken::new();

    match cli.command {
        Commands::Validate => {
            info!(
                "Settings and inventory valid: {} device(s), {} chassis",
                ctx.inventory.len(),
                ctx.inventory.chassis().len()
            );
            Ok(())
        }

        Commands::Probe { device } => {
            let names: Vec<String> = match device {
                Some(name) => vec![name],
                None => ctx.inventory.names().map(str::to_string).collect(),
            };
            for name in names {
                let Some(info) = ctx.inventory.get(&name) else {
                    return Err(DnaasError::new(ValidationError::UnknownDevice {
                        device: name,
                    }));
                };
                let reachable = ssh::probe(&info.host, info.port, ctx.settings.connect_timeout());
                println!(
                    "{:<28} {}:{:<5} {}",
                    info.name,
                    info.host,
                    info.port,
                    if reachable { "reachable" } else { "UNREACHABLE" }
                );
            }
            Ok(())
        }

        Commands::Discover { devices } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            let filter = (!devices.is_empty()).then_some(devices.as_slice());
            let report = DiscoveryEngine::new(&ctx).full_scan(&store, filter, &cancel)?;

            println!(
                "Discovered {} bridge domain(s) from {} device(s)",
                report.bridge_domains,
                report.devices_scanned.len()
            );
            for device in &report.devices_failed {
                warn!("Device '{device}' failed during the scan");
            }
            for warning in &report.warnings {
                warn!("{warning}");
            }
            Ok(())
        }

        Commands::List { user } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            let summaries = store.list_bridge_domains(user.as_deref())?;
            println!(
                "{:<24} {:<10} {:<6} {:<18} {:<8} {:<10} {}",
                "NAME", "USER", "VLAN", "TYPE", "SCOPE", "STATUS", "ASSIGNED TO"
            );
            for s in summaries {
                println!(
                    "{:<24} {:<10} {:<6} {:<18} {:<8} {:<10} {}",
                    s.name,
                    s.username.unwrap_or_default(),
                    s.vlan_id.map(|v| v.to_string()).unwrap_or_default(),
                    s.dnaas_type,
                    s.scope,
                    s.deployment_status,
                    s.assigned_to.unwrap_or_default(),
                );
            }
            Ok(())
        }

        Commands::Show { bridge_domain } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            let bd = store.get_bridge_domain(&bridge_domain)?.structured(
                ValidationError::UnknownBridgeDomain {
                    bridge_domain: bridge_domain.clone(),
                },
            )?;
            let rendered = serde_yaml::to_string(&bd)
                .structured(dnaas_api::error::InternalError::Internal(
                    "bridge domain is not renderable",
                ))?;
            println!("{rendered}");
            Ok(())
        }

        Commands::Assign {
            bridge_domain,
            user,
            reason,
        } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            workspace::assign(&ctx, &store, &bridge_domain, &user, reason.as_deref())?;
            println!("'{bridge_domain}' assigned to '{user}'");
            Ok(())
        }

        Commands::Release {
            bridge_domain,
            user,
        } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            workspace::release(&store, &bridge_domain, &user)?;
            println!("'{bridge_domain}' released");
            Ok(())
        }

        Commands::Deploy {
            bridge_domain,
            user,
            changes,
            dry_run,
            on_drift,
        } => {
            let store = DataStore::open(&ctx.settings.datastore_path)?;
            let contents =
                std::fs::read_to_string(&changes).structured(ValidationError::LoadChanges {
                    path: changes.display().to_string(),
                })?;
            let changes: Vec<Change> =
                serde_yaml::from_str(&contents).structured(ValidationError::LoadChanges {
                    path: changes.display().to_string(),
                })?;
            let session = EditSession::new(bridge_domain, user, changes);

            let engine = DeploymentEngine::new(&ctx, on_drift);
            let record = engine.deploy(&store, &session, dry_run, &cancel)?;

            if dry_run {
                for (device, commands) in &record.plan.commands {
                    println!("{device}:");
                    for command in commands {
                        println!("  {command}");
                    }
                }
                return Ok(());
            }

            println!(
                "Deployment {} finished in stage '{}'",
                record.deployment_id, record.stage
            );
            match record.stage {
                DeploymentStage::Committed => {}
                DeploymentStage::Failed => {
                    println!("  committed: {:?}", record.committed_devices());
                    println!("  failed:    {:?}", record.failed_devices());
                    if record.rollback_plan.is_some() {
                        println!("  a rollback plan was recorded for operator action");
                    }
                }
                _ => println!("  see the deployment record for details"),
            }
            Ok(())
        }
    }
}
