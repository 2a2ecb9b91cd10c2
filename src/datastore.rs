//! The persistent datastore: bridge domains, their member interfaces, the
//! per-device interface inventory, assignments, deployments, and drift
//! events.
//!
//! All writes go through explicit transactions. Discovery uses one
//! transaction per bridge domain so a failure on one record does not lose
//! previously persisted ones. The canonical record is stored whole as a
//! structured blob alongside the normalized columns used for querying.

use std::path::Path;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use log::{debug, info};
use sqlite::State;

use dnaas_api::error::{
    DnaasError, InitializationError, PersistenceError, ReportError, ValidationError,
};
use dnaas_api::model::{BridgeDomain, InterfaceRecord};
use dnaas_api::status::{BdDeploymentStatus, DeploymentRecord, DriftEvent};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS bridge_domains (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        source TEXT NOT NULL DEFAULT 'discovered',
        username TEXT,
        vlan_id INTEGER,
        outer_vlan INTEGER,
        inner_vlan INTEGER,
        topology_type TEXT NOT NULL,
        dnaas_type TEXT NOT NULL,
        scope TEXT NOT NULL,
        configuration_data TEXT NOT NULL,
        raw_cli_config TEXT NOT NULL,
        discovery_data TEXT NOT NULL,
        deployment_status TEXT NOT NULL DEFAULT 'discovered',
        deployed_at TEXT,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
    "CREATE TABLE IF NOT EXISTS bridge_domain_interfaces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bridge_domain_id INTEGER NOT NULL REFERENCES bridge_domains(id) ON DELETE CASCADE,
        device_name TEXT NOT NULL,
        interface_name TEXT NOT NULL,
        interface_type TEXT NOT NULL,
        vlan_id INTEGER,
        admin_status TEXT NOT NULL,
        oper_status TEXT NOT NULL,
        l2_service_enabled INTEGER NOT NULL DEFAULT 0,
        discovered_at TEXT NOT NULL,
        UNIQUE (bridge_domain_id, device_name, interface_name)
    )",
    "CREATE TABLE IF NOT EXISTS device_interfaces (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_name TEXT NOT NULL,
        interface_name TEXT NOT NULL,
        interface_type TEXT NOT NULL,
        vlan_id INTEGER,
        admin_status TEXT NOT NULL,
        oper_status TEXT NOT NULL,
        l2_service_enabled INTEGER NOT NULL DEFAULT 0,
        discovered_at TEXT NOT NULL,
        UNIQUE (device_name, interface_name)
    )",
    "CREATE TABLE IF NOT EXISTS assignments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        bridge_domain_id INTEGER NOT NULL REFERENCES bridge_domains(id),
        user_id TEXT NOT NULL,
        reason TEXT,
        status TEXT NOT NULL DEFAULT 'assigned',
        assigned_at TEXT NOT NULL,
        released_at TEXT
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_assignments_active
        ON assignments (bridge_domain_id) WHERE status = 'assigned'",
    "CREATE TABLE IF NOT EXISTS deployments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        deployment_id TEXT NOT NULL UNIQUE,
        bridge_domain_id INTEGER NOT NULL REFERENCES bridge_domains(id),
        session_id TEXT NOT NULL,
        stage TEXT NOT NULL,
        plan TEXT NOT NULL,
        per_device_results TEXT NOT NULL DEFAULT '{}',
        started_at TEXT NOT NULL,
        ended_at TEXT
    )",
    "CREATE TABLE IF NOT EXISTS drift_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        deployment_id INTEGER REFERENCES deployments(id),
        kind TEXT NOT NULL,
        device_name TEXT NOT NULL,
        interface_name TEXT,
        detection_source TEXT NOT NULL,
        severity TEXT NOT NULL,
        expected TEXT NOT NULL,
        observed TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT (datetime('now'))
    )",
];

/// One row of the bridge-domain listing, with the active assignment joined
/// in.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BdSummary {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
    pub vlan_id: Option<i64>,
    pub dnaas_type: String,
    pub topology_type: String,
    pub scope: String,
    pub deployment_status: String,
    pub assigned_to: Option<String>,
}

pub struct DataStore {
    db: Option<sqlite::Connection>,
}

impl DataStore {
    pub fn open(path: &Path) -> Result<Self, DnaasError> {
        info!("Loading datastore from {}", path.display());
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).structured(InitializationError::DatastoreOpen {
                    path: path.display().to_string(),
                })?;
            }
        }
        let db = sqlite::open(path).structured(InitializationError::DatastoreOpen {
            path: path.display().to_string(),
        })?;
        Self::initialize(db)
    }

    /// An in-memory datastore, for tests.
    pub fn open_in_memory() -> Result<Self, DnaasError> {
        let db = sqlite::open(":memory:").structured(InitializationError::DatastoreOpen {
            path: ":memory:".to_string(),
        })?;
        Self::initialize(db)
    }

    fn initialize(db: sqlite::Connection) -> Result<Self, DnaasError> {
        db.execute("PRAGMA foreign_keys = ON")
            .structured(InitializationError::DatastoreInit)?;
        for statement in SCHEMA {
            db.execute(statement)
                .structured(InitializationError::DatastoreInit)?;
        }
        Ok(Self { db: Some(db) })
    }

    fn db(&self) -> Result<&sqlite::Connection, DnaasError> {
        self.db
            .as_ref()
            .structured(PersistenceError::DatastoreClosed)
    }

    /// Close the connection to the datastore. Any further use fails.
    pub fn close(&mut self) {
        self.db = None;
    }

    /// Runs `f` inside an immediate transaction, rolling back on failure.
    fn in_transaction<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&sqlite::Connection) -> Result<T, DnaasError>,
    ) -> Result<T, DnaasError> {
        let db = self.db()?;
        db.execute("BEGIN IMMEDIATE")
            .structured(PersistenceError::Transaction { operation })?;
        match f(db) {
            Ok(value) => {
                db.execute("COMMIT")
                    .structured(PersistenceError::Transaction { operation })?;
                Ok(value)
            }
            Err(e) => {
                // Preserve the original failure even if the rollback fails.
                let _ = db.execute("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Upserts one canonical bridge domain together with its member
    /// interfaces, atomically. Returns the row id.
    pub fn upsert_bridge_domain(&self, bd: &BridgeDomain) -> Result<i64, DnaasError> {
        const OP: &str = "upsert bridge domain";
        let configuration_data = serde_json::to_string(bd).structured(PersistenceError::Serialize {
            what: "bridge domain",
        })?;
        let raw_cli_config =
            serde_json::to_string(&bd.raw_cli_config).structured(PersistenceError::Serialize {
                what: "raw CLI config",
            })?;
        let discovery_data = serde_json::to_string(&bd.discovery_metadata).structured(
            PersistenceError::Serialize {
                what: "discovery metadata",
            },
        )?;

        self.in_transaction(OP, |db| {
            let mut statement = db
                .prepare(
                    "INSERT INTO bridge_domains (
                        name, username, vlan_id, outer_vlan, inner_vlan,
                        topology_type, dnaas_type, scope,
                        configuration_data, raw_cli_config, discovery_data,
                        updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))
                    ON CONFLICT(name) DO UPDATE SET
                        username = excluded.username,
                        vlan_id = excluded.vlan_id,
                        outer_vlan = excluded.outer_vlan,
                        inner_vlan = excluded.inner_vlan,
                        topology_type = excluded.topology_type,
                        dnaas_type = excluded.dnaas_type,
                        scope = excluded.scope,
                        configuration_data = excluded.configuration_data,
                        raw_cli_config = excluded.raw_cli_config,
                        discovery_data = excluded.discovery_data,
                        deployment_status = CASE
                            WHEN bridge_domains.deployment_status = 'stale'
                            THEN 'discovered'
                            ELSE bridge_domains.deployment_status
                        END,
                        updated_at = excluded.updated_at",
                )
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .bind((1, bd.name.as_str()))
                .and_then(|_| statement.bind((2, bd.username.as_deref())))
                .and_then(|_| statement.bind((3, bd.vlan_id.map(|v| v.get() as i64))))
                .and_then(|_| statement.bind((4, bd.outer_vlan.map(|v| v.get() as i64))))
                .and_then(|_| statement.bind((5, bd.inner_vlan.map(|v| v.get() as i64))))
                .and_then(|_| statement.bind((6, bd.topology_type.to_string().as_str())))
                .and_then(|_| statement.bind((7, bd.dnaas_type.to_string().as_str())))
                .and_then(|_| statement.bind((8, bd.scope.to_string().as_str())))
                .and_then(|_| statement.bind((9, configuration_data.as_str())))
                .and_then(|_| statement.bind((10, raw_cli_config.as_str())))
                .and_then(|_| statement.bind((11, discovery_data.as_str())))
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;

            let id = Self::lookup_bridge_domain_id(db, &bd.name)?.structured(
                PersistenceError::MissingRecord {
                    what: "bridge domain",
                    key: bd.name.clone(),
                },
            )?;

            db.execute(format!(
                "DELETE FROM bridge_domain_interfaces WHERE bridge_domain_id = {id}"
            ))
            .structured(PersistenceError::Operation { operation: OP })?;

            for iface in &bd.interfaces {
                Self::insert_member_interface(db, id, iface, bd)?;
            }

            Ok(id)
        })
    }

    fn insert_member_interface(
        db: &sqlite::Connection,
        bridge_domain_id: i64,
        iface: &InterfaceRecord,
        bd: &BridgeDomain,
    ) -> Result<(), DnaasError> {
        const OP: &str = "insert member interface";
        let discovered_at = bd
            .discovery_metadata
            .discovered_at
            .unwrap_or_else(Utc::now)
            .to_rfc3339();
        let mut statement = db
            .prepare(
                "INSERT INTO bridge_domain_interfaces (
                    bridge_domain_id, device_name, interface_name,
                    interface_type, vlan_id, admin_status, oper_status,
                    l2_service_enabled, discovered_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, bridge_domain_id))
            .and_then(|_| statement.bind((2, iface.device_name.as_str())))
            .and_then(|_| statement.bind((3, iface.interface_name.as_str())))
            .and_then(|_| statement.bind((4, iface.interface_type.to_string().as_str())))
            .and_then(|_| statement.bind((5, iface.vlan_id.map(|v| v.get() as i64))))
            .and_then(|_| statement.bind((6, iface.admin_status.to_string().as_str())))
            .and_then(|_| statement.bind((7, iface.oper_status.to_string().as_str())))
            .and_then(|_| statement.bind((8, iface.l2_service_enabled as i64)))
            .and_then(|_| statement.bind((9, discovered_at.as_str())))
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?;
        Ok(())
    }

    fn lookup_bridge_domain_id(
        db: &sqlite::Connection,
        name: &str,
    ) -> Result<Option<i64>, DnaasError> {
        const OP: &str = "look up bridge domain id";
        let mut statement = db
            .prepare("SELECT id FROM bridge_domains WHERE name = ?")
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, name))
            .structured(PersistenceError::Operation { operation: OP })?;
        match statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?
        {
            State::Row => Ok(Some(read_column(&statement, 0, OP)?)),
            State::Done => Ok(None),
        }
    }

    pub fn bridge_domain_id(&self, name: &str) -> Result<Option<i64>, DnaasError> {
        Self::lookup_bridge_domain_id(self.db()?, name)
    }

    /// Fetches the full canonical record, reconstructed from the structured
    /// blob.
    pub fn get_bridge_domain(&self, name: &str) -> Result<Option<BridgeDomain>, DnaasError> {
        const OP: &str = "fetch bridge domain";
        let db = self.db()?;
        let mut statement = db
            .prepare("SELECT configuration_data FROM bridge_domains WHERE name = ?")
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, name))
            .structured(PersistenceError::Operation { operation: OP })?;
        match statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?
        {
            State::Row => {
                let blob: String = read_column(&statement, 0, OP)?;
                Ok(Some(serde_json::from_str(&blob).structured(
                    PersistenceError::Serialize {
                        what: "bridge domain",
                    },
                )?))
            }
            State::Done => Ok(None),
        }
    }

    /// Lists all bridge domains with the active assignment joined in. Pass
    /// `assigned_to` to restrict to one user's workspace.
    pub fn list_bridge_domains(
        &self,
        assigned_to: Option<&str>,
    ) -> Result<Vec<BdSummary>, DnaasError> {
        const OP: &str = "list bridge domains";
        let db = self.db()?;
        let mut query = String::from(
            "SELECT b.id, b.name, b.username, b.vlan_id, b.dnaas_type,
                    b.topology_type, b.scope, b.deployment_status, a.user_id
             FROM bridge_domains b
             LEFT JOIN assignments a
                    ON a.bridge_domain_id = b.id AND a.status = 'assigned'",
        );
        if assigned_to.is_some() {
            query.push_str(" WHERE a.user_id = ?");
        }
        query.push_str(" ORDER BY b.name");

        let mut statement = db
            .prepare(&query)
            .structured(PersistenceError::Operation { operation: OP })?;
        if let Some(user) = assigned_to {
            statement
                .bind((1, user))
                .structured(PersistenceError::Operation { operation: OP })?;
        }

        let mut summaries = Vec::new();
        while let State::Row = statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?
        {
            summaries.push(BdSummary {
                id: read_column(&statement, 0, OP)?,
                name: read_column(&statement, 1, OP)?,
                username: read_column(&statement, 2, OP)?,
                vlan_id: read_column(&statement, 3, OP)?,
                dnaas_type: read_column(&statement, 4, OP)?,
                topology_type: read_column(&statement, 5, OP)?,
                scope: read_column(&statement, 6, OP)?,
                deployment_status: read_column(&statement, 7, OP)?,
                assigned_to: read_column(&statement, 8, OP)?,
            });
        }
        Ok(summaries)
    }

    /// Marks records that a full scan no longer observed. Only meaningful
    /// after an unfiltered scan in which every device answered.
    pub fn mark_stale_missing(&self, seen: &[String]) -> Result<usize, DnaasError> {
        const OP: &str = "mark stale bridge domains";
        self.in_transaction(OP, |db| {
            let query = if seen.is_empty() {
                "UPDATE bridge_domains SET deployment_status = 'stale',
                     updated_at = datetime('now')
                 WHERE deployment_status != 'stale'"
                    .to_string()
            } else {
                let placeholders = vec!["?"; seen.len()].join(", ");
                format!(
                    "UPDATE bridge_domains SET deployment_status = 'stale',
                         updated_at = datetime('now')
                     WHERE deployment_status != 'stale' AND name NOT IN ({placeholders})"
                )
            };
            let mut statement = db
                .prepare(&query)
                .structured(PersistenceError::Operation { operation: OP })?;
            for (idx, name) in seen.iter().enumerate() {
                statement
                    .bind((idx + 1, name.as_str()))
                    .structured(PersistenceError::Operation { operation: OP })?;
            }
            statement
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;
            Ok(db.change_count())
        })
    }

    pub fn set_deployment_status(
        &self,
        name: &str,
        status: BdDeploymentStatus,
        deployed_at: Option<DateTime<Utc>>,
    ) -> Result<(), DnaasError> {
        const OP: &str = "update deployment status";
        let db = self.db()?;
        let mut statement = db
            .prepare(
                "UPDATE bridge_domains
                 SET deployment_status = ?, deployed_at = ?, updated_at = datetime('now')
                 WHERE name = ?",
            )
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, status.to_string().as_str()))
            .and_then(|_| statement.bind((2, deployed_at.map(|t| t.to_rfc3339()).as_deref())))
            .and_then(|_| statement.bind((3, name)))
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?;
        Ok(())
    }

    // Assignments.

    /// Creates the active assignment for `user`, atomically. The partial
    /// unique index turns a concurrent second acquire into
    /// `AlreadyAssigned`.
    pub fn acquire_assignment(
        &self,
        bd_name: &str,
        user: &str,
        reason: Option<&str>,
    ) -> Result<(), DnaasError> {
        const OP: &str = "acquire assignment";
        self.in_transaction(OP, |db| {
            let id = Self::lookup_bridge_domain_id(db, bd_name)?.structured(
                ValidationError::UnknownBridgeDomain {
                    bridge_domain: bd_name.to_string(),
                },
            )?;

            let mut statement = db
                .prepare(
                    "INSERT INTO assignments (bridge_domain_id, user_id, reason, status, assigned_at)
                     VALUES (?, ?, ?, 'assigned', ?)",
                )
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .bind((1, id))
                .and_then(|_| statement.bind((2, user)))
                .and_then(|_| statement.bind((3, reason)))
                .and_then(|_| statement.bind((4, Utc::now().to_rfc3339().as_str())))
                .structured(PersistenceError::Operation { operation: OP })?;

            match statement.next() {
                Ok(_) => {
                    debug!("Assigned '{bd_name}' to '{user}'");
                    Ok(())
                }
                Err(e) if is_constraint_violation(&e) => {
                    Err(DnaasError::new(PersistenceError::AlreadyAssigned {
                        bridge_domain: bd_name.to_string(),
                    }))
                }
                Err(e) => {
                    Err(anyhow!(e)).structured(PersistenceError::Operation { operation: OP })
                }
            }
        })
    }

    /// Releases the active assignment. Fails unless `user` holds it.
    pub fn release_assignment(&self, bd_name: &str, user: &str) -> Result<(), DnaasError> {
        const OP: &str = "release assignment";
        self.in_transaction(OP, |db| {
            let id = Self::lookup_bridge_domain_id(db, bd_name)?.structured(
                ValidationError::UnknownBridgeDomain {
                    bridge_domain: bd_name.to_string(),
                },
            )?;

            let mut statement = db
                .prepare(
                    "UPDATE assignments
                     SET status = 'released', released_at = ?
                     WHERE bridge_domain_id = ? AND user_id = ? AND status = 'assigned'",
                )
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .bind((1, Utc::now().to_rfc3339().as_str()))
                .and_then(|_| statement.bind((2, id)))
                .and_then(|_| statement.bind((3, user)))
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;

            if db.change_count() == 0 {
                return Err(DnaasError::new(ValidationError::PermissionDenied {
                    bridge_domain: bd_name.to_string(),
                    user: user.to_string(),
                }));
            }
            debug!("Released '{bd_name}' from '{user}'");
            Ok(())
        })
    }

    /// The user currently holding the active assignment, if any.
    pub fn active_holder(&self, bd_name: &str) -> Result<Option<String>, DnaasError> {
        const OP: &str = "query active assignment";
        let db = self.db()?;
        let mut statement = db
            .prepare(
                "SELECT a.user_id FROM assignments a
                 JOIN bridge_domains b ON b.id = a.bridge_domain_id
                 WHERE b.name = ? AND a.status = 'assigned'",
            )
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, bd_name))
            .structured(PersistenceError::Operation { operation: OP })?;
        match statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?
        {
            State::Row => Ok(Some(read_column(&statement, 0, OP)?)),
            State::Done => Ok(None),
        }
    }

    // Device interface inventory.

    /// Replaces the interface inventory of one device, atomically.
    pub fn upsert_device_interfaces(
        &self,
        device: &str,
        interfaces: &[InterfaceRecord],
    ) -> Result<(), DnaasError> {
        const OP: &str = "upsert device interfaces";
        let discovered_at = Utc::now().to_rfc3339();
        self.in_transaction(OP, |db| {
            let mut delete = db
                .prepare("DELETE FROM device_interfaces WHERE device_name = ?")
                .structured(PersistenceError::Operation { operation: OP })?;
            delete
                .bind((1, device))
                .structured(PersistenceError::Operation { operation: OP })?;
            delete
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;

            for iface in interfaces {
                let mut statement = db
                    .prepare(
                        "INSERT INTO device_interfaces (
                            device_name, interface_name, interface_type, vlan_id,
                            admin_status, oper_status, l2_service_enabled, discovered_at
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .structured(PersistenceError::Operation { operation: OP })?;
                statement
                    .bind((1, device))
                    .and_then(|_| statement.bind((2, iface.interface_name.as_str())))
                    .and_then(|_| statement.bind((3, iface.interface_type.to_string().as_str())))
                    .and_then(|_| statement.bind((4, iface.vlan_id.map(|v| v.get() as i64))))
                    .and_then(|_| statement.bind((5, iface.admin_status.to_string().as_str())))
                    .and_then(|_| statement.bind((6, iface.oper_status.to_string().as_str())))
                    .and_then(|_| statement.bind((7, iface.l2_service_enabled as i64)))
                    .and_then(|_| statement.bind((8, discovered_at.as_str())))
                    .structured(PersistenceError::Operation { operation: OP })?;
                statement
                    .next()
                    .structured(PersistenceError::Operation { operation: OP })?;
            }
            Ok(())
        })
    }

    /// Whether `interface` (a base name) exists on `device` in the current
    /// inventory, either as the physical port or as one of its
    /// sub-interfaces.
    pub fn interface_exists(&self, device: &str, interface: &str) -> Result<bool, DnaasError> {
        const OP: &str = "query device interface";
        let db = self.db()?;
        let mut statement = db
            .prepare(
                "SELECT COUNT(*) FROM device_interfaces
                 WHERE device_name = ? AND (interface_name = ? OR interface_name LIKE ? || '.%')",
            )
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .bind((1, device))
            .and_then(|_| statement.bind((2, interface)))
            .and_then(|_| statement.bind((3, interface)))
            .structured(PersistenceError::Operation { operation: OP })?;
        statement
            .next()
            .structured(PersistenceError::Operation { operation: OP })?;
        let count: i64 = read_column(&statement, 0, OP)?;
        Ok(count > 0)
    }

    // Deployments and drift events.

    /// Persists a deployment record, inserting it on first write and
    /// replacing the stage and per-device results on each stage transition.
    pub fn record_deployment(&self, record: &DeploymentRecord) -> Result<(), DnaasError> {
        const OP: &str = "record deployment";
        let plan = serde_json::to_string(&record.plan)
            .structured(PersistenceError::Serialize { what: "plan" })?;
        let results = serde_json::to_string(&serde_json::json!({
            "check": record.check_results,
            "commit": record.commit_results,
            "drift": record.drift_events,
            "rollback_plan": record.rollback_plan,
        }))
        .structured(PersistenceError::Serialize {
            what: "per-device results",
        })?;

        self.in_transaction(OP, |db| {
            let bd_id = Self::lookup_bridge_domain_id(db, &record.bridge_domain)?.structured(
                ValidationError::UnknownBridgeDomain {
                    bridge_domain: record.bridge_domain.clone(),
                },
            )?;

            let mut statement = db
                .prepare(
                    "INSERT INTO deployments (
                        deployment_id, bridge_domain_id, session_id, stage, plan,
                        per_device_results, started_at, ended_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(deployment_id) DO UPDATE SET
                        stage = excluded.stage,
                        per_device_results = excluded.per_device_results,
                        ended_at = excluded.ended_at",
                )
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .bind((1, record.deployment_id.to_string().as_str()))
                .and_then(|_| statement.bind((2, bd_id)))
                .and_then(|_| statement.bind((3, record.session_id.to_string().as_str())))
                .and_then(|_| statement.bind((4, record.stage.to_string().as_str())))
                .and_then(|_| statement.bind((5, plan.as_str())))
                .and_then(|_| statement.bind((6, results.as_str())))
                .and_then(|_| statement.bind((7, record.started_at.to_rfc3339().as_str())))
                .and_then(|_| {
                    statement.bind((8, record.ended_at.map(|t| t.to_rfc3339()).as_deref()))
                })
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;
            Ok(())
        })
    }

    /// Appends one drift event, linked to its deployment when known.
    pub fn append_drift_event(
        &self,
        deployment_id: Option<&uuid::Uuid>,
        event: &DriftEvent,
    ) -> Result<(), DnaasError> {
        const OP: &str = "append drift event";
        self.in_transaction(OP, |db| {
            let deployment_row: Option<i64> = match deployment_id {
                Some(id) => {
                    let mut statement = db
                        .prepare("SELECT id FROM deployments WHERE deployment_id = ?")
                        .structured(PersistenceError::Operation { operation: OP })?;
                    statement
                        .bind((1, id.to_string().as_str()))
                        .structured(PersistenceError::Operation { operation: OP })?;
                    match statement
                        .next()
                        .structured(PersistenceError::Operation { operation: OP })?
                    {
                        State::Row => Some(read_column(&statement, 0, OP)?),
                        State::Done => None,
                    }
                }
                None => None,
            };

            let mut statement = db
                .prepare(
                    "INSERT INTO drift_events (
                        deployment_id, kind, device_name, interface_name,
                        detection_source, severity, expected, observed
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .bind((1, deployment_row))
                .and_then(|_| statement.bind((2, event.kind.to_string().as_str())))
                .and_then(|_| statement.bind((3, event.device_name.as_str())))
                .and_then(|_| statement.bind((4, event.interface_name.as_deref())))
                .and_then(|_| statement.bind((5, event.detection_source.to_string().as_str())))
                .and_then(|_| statement.bind((6, event.severity.to_string().as_str())))
                .and_then(|_| statement.bind((7, event.expected.as_str())))
                .and_then(|_| statement.bind((8, event.observed.as_str())))
                .structured(PersistenceError::Operation { operation: OP })?;
            statement
                .next()
                .structured(PersistenceError::Operation { operation: OP })?;
            Ok(())
        })
    }
}

fn read_column<T: sqlite::ReadableWithIndex>(
    statement: &sqlite::Statement,
    index: usize,
    operation: &'static str,
) -> Result<T, DnaasError> {
    statement
        .read::<T, _>(index)
        .structured(PersistenceError::Operation { operation })
}

fn is_constraint_violation(e: &sqlite::Error) -> bool {
    // SQLITE_CONSTRAINT is 19; extended codes carry it in the low byte.
    e.code.is_some_and(|c| c % 256 == 19)
}
