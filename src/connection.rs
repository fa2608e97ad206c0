//! The seam between fleet operations and whatever actually talks to a remote host.
//!
//! A [ConnectionProvider] opens one authenticated [Connection] to one [Endpoint] on demand.
//! Connections are never pooled or reused: every operation opens its own, uses it once, and closes
//! it. A failure on one connection therefore can't corrupt state that another operation depends
//! on.
//!
//! The production provider lives in [crate::ssh]. Tests use an in-memory fake.

use crate::core::{CommandOutput, Endpoint};
use crate::error::Result;
use async_trait::async_trait;

/// What a connection will be used for. Providers may tune dialing per kind, e.g. applying a
/// connect timeout only to transfers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Running a shell command.
    Session,

    /// Writing a file.
    Transfer,
}

/// Opens connections to endpoints.
///
/// Providers are shared by every task in a fan-out, so they must be cheap to share and safe to
/// use concurrently.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    type Connection: Connection;

    /// Dials `endpoint`, authenticates with its password, and negotiates a channel of `kind`.
    ///
    /// No retry is attempted.
    ///
    /// # Errors
    ///
    /// Returns [Error::Connect] if dialing, authentication, or channel negotiation fails.
    ///
    /// [Error::Connect]: crate::Error::Connect
    async fn connect(&self, endpoint: &Endpoint, kind: ChannelKind) -> Result<Self::Connection>;
}

/// One open, single-use connection to one endpoint.
///
/// Callers must call [Connection::close] on every path once the connection is open. The
/// functions in [crate::executor] do this for you.
#[async_trait]
pub trait Connection: Send {
    /// Runs `command` in the remote user's default shell and waits for it to finish.
    ///
    /// The command string is passed through untouched. Quoting it is the caller's job.
    ///
    /// # Errors
    ///
    /// A non-zero exit is not an error. Returns [Error::RemoteExecution] if the channel fails
    /// before the command reports how it exited.
    ///
    /// [Error::RemoteExecution]: crate::Error::RemoteExecution
    async fn exec(&mut self, command: &str) -> Result<CommandOutput>;

    /// Creates or truncates `path` and writes `contents` to it.
    ///
    /// # Errors
    ///
    /// Returns [Error::Transfer] if the file can't be created or written.
    ///
    /// [Error::Transfer]: crate::Error::Transfer
    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()>;

    /// Releases the connection. Failures while closing are logged, not returned.
    async fn close(self);
}

#[cfg(test)]
pub(crate) mod fake;
