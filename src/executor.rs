//! Runs one operation against one endpoint: connect, operate, release.
//!
//! Every function here opens its own connection and closes it before returning, whether the
//! operation succeeded or not. If the connection never opened, there is nothing to close and the
//! [Error::Connect] is returned as-is.

use crate::connection::{ChannelKind, Connection, ConnectionProvider};
use crate::core::{CommandOutput, Endpoint, RemotePath};
use crate::error::{Error, Result};
use crate::template::Templates;
use tracing::{debug, info, warn};

/// Runs `command` on `endpoint` and returns its combined output and exit status.
///
/// A non-zero exit status is returned as data, not as an error.
///
/// # Errors
///
/// Returns [Error::InvalidInput] if `command` is blank, [Error::Connect] if the endpoint can't be
/// reached, or [Error::RemoteExecution] if the channel fails mid-command.
pub async fn execute<P: ConnectionProvider>(
    provider: &P,
    endpoint: &Endpoint,
    command: &str,
) -> Result<CommandOutput> {
    if command.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "refusing to run an empty command on {endpoint}"
        )));
    }

    info!(
        host = %endpoint.host,
        port = endpoint.port,
        user = %endpoint.username,
        command,
        "running command",
    );
    let mut connection = provider.connect(endpoint, ChannelKind::Session).await?;
    let result = connection.exec(command).await;
    connection.close().await;

    match &result {
        Ok(output) => debug!(
            host = %endpoint.host,
            exit_status = ?output.exit_status,
            exit_signal = ?output.exit_signal,
            "command finished",
        ),
        Err(e) => warn!(host = %endpoint.host, error = %e, "command did not finish"),
    }
    result
}

/// Like [execute], but only reports whether the command ran and exited 0.
///
/// Every failure, including a connect failure, comes back as `false`.
pub async fn execute_ignoring_result<P: ConnectionProvider>(
    provider: &P,
    endpoint: &Endpoint,
    command: &str,
) -> bool {
    match execute(provider, endpoint, command).await {
        Ok(output) => output.success(),
        Err(e) => {
            debug!(host = %endpoint.host, error = %e, "ignoring failed command");
            false
        }
    }
}

/// Creates or truncates `path` on `endpoint` and writes `contents` to it in one piece.
///
/// Home-relative paths are resolved locally with [home_dir](crate::core::home_dir); the remote
/// host is never asked. Returns the resolved path.
///
/// # Errors
///
/// Returns [Error::Connect] if the endpoint can't be reached and [Error::Transfer] if the file
/// can't be created or written.
pub async fn write_file<P: ConnectionProvider>(
    provider: &P,
    endpoint: &Endpoint,
    path: &RemotePath,
    contents: &[u8],
) -> Result<String> {
    let path = path.resolve(endpoint);
    if path.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "refusing to write to an empty path on {endpoint}"
        )));
    }

    info!(
        host = %endpoint.host,
        port = endpoint.port,
        user = %endpoint.username,
        path = %path,
        bytes = contents.len(),
        "writing file",
    );
    let mut connection = provider.connect(endpoint, ChannelKind::Transfer).await?;
    let result = connection.write_file(&path, contents).await;
    connection.close().await;

    match result {
        Ok(()) => {
            debug!(host = %endpoint.host, path = %path, "file written");
            Ok(path)
        }
        Err(e) => {
            warn!(host = %endpoint.host, path = %path, error = %e, "file not written");
            Err(e)
        }
    }
}

/// Returns whether `path` is a regular file on `endpoint`.
///
/// # Errors
///
/// Fails as [execute] does. A missing file is `Ok(false)`.
pub async fn file_exists<P: ConnectionProvider>(
    provider: &P,
    templates: &Templates,
    endpoint: &Endpoint,
    path: &RemotePath,
) -> Result<bool> {
    let path = path.resolve(endpoint);
    let command = templates.file_exists.render(&[("path", path.as_str())])?;
    Ok(execute(provider, endpoint, &command).await?.success())
}

/// Returns whether the endpoint's login user has uid 0.
///
/// # Errors
///
/// Fails as [execute] does.
pub async fn is_root<P: ConnectionProvider>(
    provider: &P,
    templates: &Templates,
    endpoint: &Endpoint,
) -> Result<bool> {
    let command = templates.root_check.render(&[])?;
    Ok(execute(provider, endpoint, &command).await?.success())
}
