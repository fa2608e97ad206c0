//! "Is this package installed?" and "install this package" as plain remote commands.
//!
//! Both questions are answered entirely by exit status: 0 means yes. Output text is ignored.
//! Nothing is tracked between calls; installing a package that is already present does whatever
//! the package manager does in that case.

use crate::connection::ConnectionProvider;
use crate::core::{Endpoint, Outcome};
use crate::error::Result;
use crate::executor;
use crate::template::Templates;
use std::fmt;
use tracing::info;

/// Returns whether `package` is installed on `endpoint`, according to the `package_query`
/// template.
///
/// # Errors
///
/// Fails as [executor::execute] does.
pub async fn is_installed<P: ConnectionProvider>(
    provider: &P,
    templates: &Templates,
    endpoint: &Endpoint,
    package: &str,
) -> Result<bool> {
    let command = templates.package_query.render(&[("package", package)])?;
    Ok(executor::execute(provider, endpoint, &command).await?.success())
}

/// Installs `package` on `endpoint` with the `package_install` template and returns whether the
/// install command exited 0.
///
/// # Errors
///
/// Fails as [executor::execute] does.
pub async fn install<P: ConnectionProvider>(
    provider: &P,
    templates: &Templates,
    endpoint: &Endpoint,
    package: &str,
) -> Result<bool> {
    let command = templates.package_install.render(&[("package", package)])?;
    Ok(executor::execute(provider, endpoint, &command).await?.success())
}

/// Where a package stands after [ensure_installed].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageState {
    /// The query found the package, so no install was attempted.
    AlreadyInstalled,

    /// The query didn't find the package and the install succeeded.
    Installed,

    /// The query didn't find the package and the install exited non-zero.
    InstallFailed,
}

impl Outcome for PackageState {
    fn succeeded(&self) -> bool {
        !matches!(self, PackageState::InstallFailed)
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PackageState::AlreadyInstalled => "already installed",
            PackageState::Installed => "installed",
            PackageState::InstallFailed => "install failed",
        })
    }
}

/// Queries for `package` and installs it only if the query says it's missing.
///
/// # Errors
///
/// Fails as [executor::execute] does, on either command.
pub async fn ensure_installed<P: ConnectionProvider>(
    provider: &P,
    templates: &Templates,
    endpoint: &Endpoint,
    package: &str,
) -> Result<PackageState> {
    if is_installed(provider, templates, endpoint, package).await? {
        info!(host = %endpoint.host, package, "package already installed");
        return Ok(PackageState::AlreadyInstalled);
    }

    info!(host = %endpoint.host, package, "installing package");
    match install(provider, templates, endpoint, package).await? {
        true => Ok(PackageState::Installed),
        false => Ok(PackageState::InstallFailed),
    }
}
