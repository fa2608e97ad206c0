//! The error taxonomy shared by every remote operation.
//!
//! A non-zero exit status from a remote command is **not** an error. It is ordinary data and is
//! reported through [CommandOutput]. The variants below describe failures of the machinery around
//! the command: reaching the host, driving the channel, writing a file, or reading configuration.
//!
//! [CommandOutput]: crate::core::outcome::CommandOutput

use std::fmt;
use thiserror::Error as ThisError;

/// Shorthand for results whose error type is [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while talking to a fleet.
///
/// Errors are [Clone] so that a fan-out can store them in per-endpoint results and hand copies to
/// reporters without giving up ownership.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum Error {
    /// Dialing, authenticating, or negotiating a channel with an endpoint failed.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// The remote operation protocol failed, e.g. the channel closed before the command reported
    /// how it exited.
    #[error("remote execution on {endpoint} failed: {reason}")]
    RemoteExecution { endpoint: String, reason: String },

    /// Creating or writing a file on an endpoint failed.
    #[error("failed to write {path} on {endpoint}: {reason}")]
    Transfer {
        endpoint: String,
        path: String,
        reason: String,
    },

    /// The inventory or settings could not be read or are malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller handed us something unusable, e.g. an empty command.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Builds an [Error::Connect].
    pub fn connect(endpoint: impl ToString, reason: impl ToString) -> Self {
        Error::Connect {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Builds an [Error::RemoteExecution].
    pub fn remote_execution(endpoint: impl ToString, reason: impl ToString) -> Self {
        Error::RemoteExecution {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Builds an [Error::Transfer].
    pub fn transfer(endpoint: impl ToString, path: impl ToString, reason: impl ToString) -> Self {
        Error::Transfer {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Builds an [Error::Config].
    pub fn config(reason: impl ToString) -> Self {
        Error::Config(reason.to_string())
    }

    /// Prefixes an [Error::Config] reason with where it came from, e.g. a file or group name.
    /// Other variants pass through unchanged.
    pub fn within(self, context: impl fmt::Display) -> Self {
        match self {
            Error::Config(reason) => Error::Config(format!("{context}: {reason}")),
            other => other,
        }
    }

    pub fn is_connect(&self) -> bool {
        matches!(self, Error::Connect { .. })
    }

    pub fn is_remote_execution(&self) -> bool {
        matches!(self, Error::RemoteExecution { .. })
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, Error::Transfer { .. })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(error: serde_yaml::Error) -> Self {
        Error::Config(error.to_string())
    }
}
