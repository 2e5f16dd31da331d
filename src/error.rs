use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum Error {
    /// A command was issued while another one is still running.
    #[error("The device is busy running code")]
    DeviceNotFree,

    /// An interrupt was requested while nothing was running.
    #[error("The device is not running any code")]
    DeviceNotRunning,

    /// The transport went away, either on request or because the device was unplugged.
    #[error("The device is disconnected")]
    Disconnected,

    /// An expected marker did not show up within the configured response timeout.
    #[error("The device did not respond in time while {0}")]
    DeviceUnresponsive(String),

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// Something unexpected happened internally.
    #[error("Internal issue: {0}")]
    InternalIssue(String),
}

impl Error {
    /// Get the problem description of a bad config, if that's what this error is.
    pub fn try_into_bad_config(self) -> Option<String> {
        if let Self::BadConfig(problem) = self {
            Some(problem)
        } else {
            None
        }
    }
}

/// The ways obtaining and opening a transport can fail.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionFailureKind {
    /// The platform cannot enumerate serial ports at all.
    NotSupported,

    /// No port matching the device filters was found.
    FailedToObtainPort,

    /// A port was found, but opening it failed.
    /// Typically wrong parameters or the port being in use elsewhere.
    FailedToOpenPort,

    /// The port opened, but no REPL prompt came back.
    PortNoResponse,

    /// The configuration is not usable.
    BadConfig,
}

impl Display for ConnectionFailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ConnectionFailureKind::NotSupported => "Serial ports not supported",
            ConnectionFailureKind::FailedToObtainPort => "Failed to obtain port",
            ConnectionFailureKind::FailedToOpenPort => "Failed to open port",
            ConnectionFailureKind::BadConfig => "Bad configuration",
            ConnectionFailureKind::PortNoResponse => "Port no response",
        };

        write!(f, "{kind}")
    }
}

/// A description of why a connection could not be established.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct ConnectionFailure {
    /// What went wrong.
    pub kind: ConnectionFailureKind,

    /// Human readable details.
    pub reason: String,
}

impl ConnectionFailure {
    pub(crate) fn new<S: Into<String>>(kind: ConnectionFailureKind, reason: S) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}
