use std::fmt::{Debug, Write};
use std::{borrow::Cow, panic::Location};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use crate::config::InvalidConfigurationError;

/// The service failed to initialize. Inventory and datastore failures in this
/// category are fatal to the process.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InitializationError {
    #[error("Failed to load device inventory from '{path}'")]
    LoadInventory { path: String },
    #[error("Failed to parse device inventory")]
    ParseInventory,
    #[error("Failed to resolve password variable '{variable}' for device '{device}'")]
    ResolvePasswordVariable { device: String, variable: String },
    #[error("Failed to load service settings from '{path}'")]
    LoadSettings { path: String },
    #[error("Failed to parse service settings")]
    ParseSettings,
    #[error("Failed to open datastore at '{path}'")]
    DatastoreOpen { path: String },
    #[error("Failed to initialize datastore schema")]
    DatastoreInit,
    #[error("Failed to set up logging")]
    SetupLogging,
}

/// A device could not be reached or the session with it broke down. Fails the
/// affected device only; other devices proceed.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectivityError {
    #[error("Device '{device}' is unreachable")]
    Unreachable { device: String },
    #[error("Timed out connecting to device '{device}'")]
    ConnectTimeout { device: String },
    #[error("Authentication failed on device '{device}'")]
    AuthenticationFailed { device: String },
    #[error("Failed to open interactive shell on device '{device}'")]
    ShellOpen { device: String },
    #[error("Prompt did not return on device '{device}' after command '{command}'")]
    PromptTimeout { device: String, command: String },
    #[error("Session with device '{device}' closed unexpectedly")]
    SessionClosed { device: String },
}

/// The device accepted the session but rejected a command. In the
/// commit-check stage a protocol error on any device aborts the deployment.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolError {
    #[error("Device '{device}' rejected command '{command}': {detail}")]
    DeviceError {
        device: String,
        command: String,
        detail: String,
    },
    #[error("Syntax error on device '{device}' for command '{command}'")]
    SyntaxError { device: String, command: String },
    #[error("Access denied on device '{device}' for command '{command}'")]
    AccessDenied { device: String, command: String },
    #[error("Invalid value on device '{device}' for command '{command}': {detail}")]
    InvalidValue {
        device: String,
        command: String,
        detail: String,
    },
    #[error("Commit-check failed on device '{device}': {detail}")]
    CommitCheckFailed { device: String, detail: String },
    #[error("Commit failed on device '{device}': {detail}")]
    CommitFailed { device: String, detail: String },
}

/// Drift handling failed. Drift itself is signalled through drift events, not
/// errors; these cover the resolver's own failure modes.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum DriftError {
    #[error("Targeted rediscovery failed on device '{device}' for bridge domain '{bridge_domain}'")]
    TargetedScanFailed {
        device: String,
        bridge_domain: String,
    },
    #[error("Failed to persist rediscovered state for bridge domain '{bridge_domain}'")]
    SyncPersistFailed { bridge_domain: String },
    #[error("Deployment aborted on drift reported by device '{device}'")]
    AbortedOnDrift { device: String },
}

/// User-supplied input was rejected before any device was contacted.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationError {
    #[error("Unknown device '{device}'")]
    UnknownDevice { device: String },
    #[error("Interface '{interface}' does not exist on device '{device}'")]
    UnknownInterface { device: String, interface: String },
    #[error("VLAN {vlan} is outside the ranges permitted for user '{user}'")]
    VlanNotPermitted { user: String, vlan: u16 },
    #[error("Interface '{interface}' on device '{device}' is claimed by more than one change")]
    DuplicateInterfaceClaim { device: String, interface: String },
    #[error("Interface name '{interface}' already carries a VLAN suffix")]
    AlreadySuffixed { interface: String },
    #[error("Bridge domain '{bridge_domain}' is not assigned to user '{user}'")]
    PermissionDenied {
        bridge_domain: String,
        user: String,
    },
    #[error("Unknown bridge domain '{bridge_domain}'")]
    UnknownBridgeDomain { bridge_domain: String },
    #[error("Cannot plan changes for bridge domain '{bridge_domain}' of type '{dnaas_type}'")]
    UnplannableType {
        bridge_domain: String,
        dnaas_type: String,
    },
    #[error("No VLAN id available for change on interface '{interface}'")]
    MissingVlan { interface: String },
    #[error("Failed to load change set from '{path}'")]
    LoadChanges { path: String },
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(#[from] InvalidConfigurationError),
}

/// The datastore rejected or lost an operation.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PersistenceError {
    #[error("Bridge domain '{bridge_domain}' already has an active assignment")]
    AlreadyAssigned { bridge_domain: String },
    #[error("Failed to execute datastore operation '{operation}'")]
    Operation { operation: &'static str },
    #[error("Failed to serialize {what} for storage")]
    Serialize { what: &'static str },
    #[error("No {what} found for '{key}'")]
    MissingRecord { what: &'static str, key: String },
    #[error("Datastore transaction failed during '{operation}'")]
    Transaction { operation: &'static str },
    #[error("Attempted to use a closed datastore")]
    DatastoreClosed,
}

/// Cooperative cancellation or a deadline cut an operation short. Partial
/// results carry explicit markers.
#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ConcurrencyError {
    #[error("Operation cancelled during {phase}")]
    Cancelled { phase: String },
    #[error("Deadline exceeded during {phase}")]
    DeadlineExceeded { phase: String },
    #[error("Worker for device '{device}' panicked")]
    WorkerPanic { device: String },
}

#[derive(Debug, Eq, thiserror::Error, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum InternalError {
    #[error("Internal error: {0}")]
    Internal(&'static str),
}

/// Each variant of `ErrorKind` corresponds to a different category of error.
/// The categories are user-meaningful: they name whether the problem sits in
/// the operator's input, the fleet, the wire protocol, or this service.
#[derive(Debug, Eq, thiserror::Error, IntoStaticStr, PartialEq)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    #[error(transparent)]
    Connectivity(#[from] ConnectivityError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    #[error(transparent)]
    Internal(#[from] InternalError),
}

#[derive(Debug)]
struct DnaasErrorInner {
    kind: ErrorKind,
    location: &'static Location<'static>,
    source: Option<anyhow::Error>,
    context: Vec<(Cow<'static, str>, &'static Location<'static>)>,
}

pub struct DnaasError(Box<DnaasErrorInner>);
impl DnaasError {
    #[track_caller]
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        DnaasError(Box::new(DnaasErrorInner {
            kind: kind.into(),
            location: Location::caller(),
            source: None,
            context: Vec::new(),
        }))
    }

    pub fn unstructured(self, context: impl Into<Cow<'static, str>>) -> anyhow::Error {
        match self.0.source {
            Some(source) => source.context(self.0.kind).context(context.into()),
            None => anyhow::Error::from(self.0.kind).context(context.into()),
        }
    }

    /// Returns a reference to the inner ErrorKind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Whether the error is fatal to the process rather than recoverable
    /// per-device or per-bridge-domain.
    pub fn is_fatal(&self) -> bool {
        matches!(self.0.kind, ErrorKind::Initialization(_))
    }
}

pub trait ReportError<T, K> {
    /// Convert this error into a structured DnaasError.
    fn structured(self, kind: K) -> Result<T, DnaasError>;
}

impl<T, K> ReportError<T, K> for Option<T>
where
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DnaasError> {
        match self {
            Some(t) => Ok(t),
            None => Err(DnaasError(Box::new(DnaasErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: None,
                context: Vec::new(),
            }))),
        }
    }
}

impl<T, E, K> ReportError<T, K> for Result<T, E>
where
    E: Into<anyhow::Error>,
    K: Into<ErrorKind>,
{
    #[track_caller]
    fn structured(self, kind: K) -> Result<T, DnaasError> {
        match self {
            Ok(o) => Ok(o),
            Err(e) => Err(DnaasError(Box::new(DnaasErrorInner {
                kind: kind.into(),
                location: Location::caller(),
                source: Some(e.into()),
                context: Vec::new(),
            }))),
        }
    }
}

pub trait DnaasResultExt<T> {
    /// Attach a context message to the error.
    fn message(self, context: impl Into<Cow<'static, str>>) -> Result<T, DnaasError>;

    /// Convert the error into an unstructured error.
    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error>;
}
impl<T> DnaasResultExt<T> for Result<T, DnaasError> {
    #[track_caller]
    fn message(mut self, context: impl Into<Cow<'static, str>>) -> Result<T, DnaasError> {
        if let Err(ref mut e) = self {
            e.0.context.push((context.into(), Location::caller()));
        }
        self
    }

    fn unstructured(self, context: impl Into<Cow<'static, str>>) -> Result<T, anyhow::Error> {
        self.map_err(|e| e.unstructured(context))
    }
}

impl Serialize for DnaasError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("dnaas-error", 5)?;
        state.serialize_field("message", &self.0.kind.to_string())?;
        match self.0.kind {
            ErrorKind::Initialization(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Connectivity(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Protocol(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Drift(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Validation(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Persistence(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Concurrency(ref e) => state.serialize_field("error", e)?,
            ErrorKind::Internal(ref e) => state.serialize_field("error", e)?,
        }
        state.serialize_field("category", <&str>::from(&self.0.kind))?;
        state.serialize_field(
            "location",
            &format!("{}:{}", self.0.location.file(), self.0.location.line()),
        )?;
        match self.0.source {
            Some(ref e) => state.serialize_field("cause", &Some(format!("{:?}", e)))?,
            None => state.serialize_field("cause", &None::<String>)?,
        }
        state.end()
    }
}

impl Debug for DnaasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} at {}:{}",
            self.0.kind,
            self.0.location.file(),
            self.0.location.line()
        )?;

        if !self.0.context.is_empty() {
            writeln!(f, "\n\nContext:")?;
            for (i, (context, location)) in self.0.context.iter().enumerate() {
                for (j, line) in context.split('\n').enumerate() {
                    if j == 0 {
                        write!(f, "{: >5}: ", i)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                writeln!(f, " at {}:{}", location.file(), location.line())?;
            }
        }

        if let Some(ref source) = self.0.source {
            writeln!(f, "\n\nCaused by:")?;
            let mut index = 0;
            let mut source: Option<&dyn std::error::Error> = Some(source.as_ref());
            while let Some(e) = source {
                for (i, line) in e.to_string().split('\n').enumerate() {
                    if i == 0 {
                        write!(f, "{: >5}: ", index)?;
                    } else {
                        f.write_str("\n       ")?;
                    }
                    f.write_str(line)?;
                }
                f.write_char('\n')?;
                source = e.source();
                index += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use serde_yaml::Value;

    use super::*;

    #[test]
    fn test_error_serialize() {
        let e = DnaasError(Box::new(DnaasErrorInner {
            kind: ErrorKind::Connectivity(ConnectivityError::Unreachable {
                device: "DNAAS-LEAF-B14".into(),
            }),
            location: Location::caller(),
            source: Some(
                std::fs::read("/non-existant-file")
                    .context("failed to read file")
                    .unwrap_err(),
            ),
            context: Vec::new(),
        }));
        match serde_yaml::to_value(e).unwrap() {
            Value::Mapping(m) => {
                assert_eq!(m.len(), 5);
                assert_eq!(m["category"], Value::String("connectivity".into()));
                assert!(matches!(m["cause"], Value::String(_)));
                assert_eq!(
                    m["message"],
                    Value::String("Device 'DNAAS-LEAF-B14' is unreachable".into())
                );
                match m["location"] {
                    Value::String(ref s) => assert!(s.contains("error.rs:")),
                    _ => panic!("location isn't string"),
                }
            }
            _ => panic!("value isn't mapping"),
        }
    }

    #[test]
    fn test_error_debug() {
        let error = Err::<(), _>(anyhow::anyhow!("z"))
            .context("x\ny")
            .structured(InternalError::Internal("w"))
            .unwrap_err();
        assert_eq!(
            format!("{:?}", error),
            format!(
                "Internal error: w at {}:{}\n\nCaused by:\n    0: x\n       y\n    1: z\n",
                error.0.location.file(),
                error.0.location.line(),
            ),
        );
    }

    #[test]
    fn test_fatality() {
        assert!(DnaasError::new(InitializationError::ParseInventory).is_fatal());
        assert!(!DnaasError::new(ConnectivityError::Unreachable {
            device: "DNAAS-LEAF-B14".into()
        })
        .is_fatal());
    }
}
