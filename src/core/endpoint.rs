//! Types for representing remote hosts and where files live on them.

use crate::error::{Error, Result};
use secrecy::{ExposeSecret, Secret, SecretString};
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::fmt;

/// The SSH port used when an inventory record doesn't name one.
pub const DEFAULT_PORT: u16 = 22;

/// One remote host plus the credentials needed to reach it.
///
/// Endpoints are decoded from an inventory and never change for the rest of a run. They are
/// shared read-only across every task in a fan-out; each task clones what it needs.
///
/// Two endpoints are equal when their host, port, and username match. The password is not part
/// of an endpoint's identity.
#[derive(Clone, Debug, Deserialize)]
pub struct Endpoint {
    /// Network name or address of the host.
    pub host: String,

    /// Accepts either a YAML integer or a quoted string, since inventories in the wild use both.
    #[serde(default = "default_port", deserialize_with = "deserialize_port")]
    pub port: u16,

    /// The login user.
    pub username: String,

    /// The login password. Held in memory only and redacted from [Debug] output.
    ///
    /// An empty password is passed through as-is; whether the host accepts it is up to the host.
    #[serde(default = "empty_password")]
    pub password: SecretString,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn empty_password() -> SecretString {
    Secret::new(String::new())
}

fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u64),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(n) => {
            u16::try_from(n).map_err(|_| de::Error::custom(format!("port out of range: {n}")))
        }
        Port::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid port: {s:?}"))),
    }
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Endpoint {
            host: host.into(),
            port,
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }

    /// Returns `user@host:port`, the string used to identify this endpoint in logs, errors, and
    /// results.
    pub fn id(&self) -> String {
        self.to_string()
    }

    /// Returns the password. Keep the returned value out of logs.
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }

    /// Returns the login user's home directory. See [home_dir].
    pub fn home_dir(&self) -> String {
        home_dir(&self.username)
    }

    /// Checks that the fields needed to reach this endpoint are present.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if the host or username is blank or the port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config(format!(
                "endpoint for user {:?} has an empty host",
                self.username,
            )));
        }
        if self.username.trim().is_empty() {
            return Err(Error::config(format!("endpoint {} has an empty username", self.host)));
        }
        if self.port == 0 {
            return Err(Error::config(format!("endpoint {} has port 0", self.host)));
        }
        Ok(())
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port && self.username == other.username
    }
}

impl Eq for Endpoint {}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Resolves a user's home directory without asking the remote host.
///
/// ```
/// # use fleetctl::core::home_dir;
/// assert_eq!("/root", home_dir("root"));
/// assert_eq!("/home/alice", home_dir("alice"));
/// ```
pub fn home_dir(username: &str) -> String {
    match username {
        "root" => "/root".to_string(),
        user => format!("/home/{user}"),
    }
}

/// A set of endpoints that share a provisioning role, e.g. cache nodes or proxy nodes.
///
/// A group is never empty and every member has passed [Endpoint::validate]; the constructor
/// enforces both. Order is preserved from the inventory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointGroup {
    name: String,
    endpoints: Vec<Endpoint>,
}

impl EndpointGroup {
    /// Builds a group, failing fast if it can't be used for a fan-out.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if `endpoints` is empty or any member is malformed.
    pub fn new(name: impl Into<String>, endpoints: Vec<Endpoint>) -> Result<Self> {
        let name = name.into();
        if endpoints.is_empty() {
            return Err(Error::config(format!("group {name:?} has no endpoints")));
        }
        for endpoint in &endpoints {
            endpoint
                .validate()
                .map_err(|e| e.within(format_args!("group {name:?}")))?;
        }
        Ok(EndpointGroup { name, endpoints })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Always `false`; present for API symmetry with [Self::len].
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }
}

impl<'g> IntoIterator for &'g EndpointGroup {
    type Item = &'g Endpoint;
    type IntoIter = std::slice::Iter<'g, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// A destination path on a remote filesystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemotePath {
    /// Used verbatim.
    Absolute(String),

    /// Relative to the login user's home directory, as resolved by [home_dir].
    Home(String),
}

impl RemotePath {
    /// Parses a user-supplied file path.
    ///
    /// A leading `/` selects [RemotePath::Absolute]. A leading `~/`, or no leading `/` at all,
    /// selects [RemotePath::Home].
    ///
    /// # Errors
    ///
    /// Returns [Error::InvalidInput] if `path` is empty, ends in `/`, or starts with a `~` form
    /// other than `~/` (`~` alone, `~user/...`).
    pub fn parse(path: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidInput(format!("remote path {path:?} {reason}"));

        if path.trim().is_empty() {
            return Err(invalid("is empty"));
        }
        if path.ends_with('/') {
            return Err(invalid("names a directory, not a file"));
        }
        if path.starts_with('/') {
            return Ok(RemotePath::Absolute(path.to_string()));
        }

        let relative = match path.strip_prefix("~/") {
            Some(relative) => relative,
            None if path.starts_with('~') => {
                return Err(invalid("must be absolute or start with ~/"));
            }
            None => path,
        };
        let relative = relative.trim_start_matches("./").trim_start_matches('/');
        match relative {
            "" | "." | "~" => Err(invalid("does not name a file")),
            _ => Ok(RemotePath::Home(relative.to_string())),
        }
    }

    /// Returns the concrete path for `endpoint`.
    pub fn resolve(&self, endpoint: &Endpoint) -> String {
        match self {
            RemotePath::Absolute(path) => path.clone(),
            RemotePath::Home(relative) => {
                let relative = relative.trim_start_matches('/');
                format!("{}/{}", endpoint.home_dir(), relative)
            }
        }
    }
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemotePath::Absolute(path) => write!(f, "{path}"),
            RemotePath::Home(relative) => write!(f, "~/{relative}"),
        }
    }
}
