//! Runtime settings, read from `settings.yaml`.
//!
//! ```yaml
//! host_keys:
//!   policy: strict
//!   known:
//!     "10.0.0.11:22": 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! connect_timeout_secs: 10
//! transfer_connect_timeout_secs: 30
//! max_parallel: 16
//! templates:
//!   package_query: rpm -q ${package}
//! ```
//!
//! Every key is optional in the file, but a host-key policy must come from somewhere: either
//! `host_keys.policy` or the command line. There is deliberately no default.

use crate::connection::ChannelKind;
use crate::error::{Error, Result};
use crate::template::Templates;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// The connect timeout applied to file transfers when settings don't name one.
pub const DEFAULT_TRANSFER_CONNECT_TIMEOUT_SECS: u64 = 30;

/// How to treat the key a host presents when we connect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Only connect to hosts whose key fingerprint is listed under `host_keys.known`.
    Strict,

    /// Accept and remember the first key seen for an unlisted host for the rest of the run.
    /// Listed hosts must still match.
    TrustOnFirstUse,

    /// Accept any key. Anyone able to intercept the connection can read the password.
    InsecureSkipVerify,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostKeys {
    pub policy: Option<HostKeyPolicy>,

    /// Maps `host:port` to the hex SHA-256 fingerprint of the host's public key.
    #[serde(default)]
    pub known: HashMap<String, String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub host_keys: HostKeys,

    /// Bounds dialing and authentication for command sessions. Unbounded if unset.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    /// Bounds dialing and authentication for file transfers. `null` removes the bound.
    #[serde(default = "default_transfer_connect_timeout_secs")]
    pub transfer_connect_timeout_secs: Option<u64>,

    /// Caps how many endpoints a fan-out works on at once. Unlimited if unset.
    #[serde(default)]
    pub max_parallel: Option<usize>,

    #[serde(default)]
    pub templates: Templates,
}

fn default_transfer_connect_timeout_secs() -> Option<u64> {
    Some(DEFAULT_TRANSFER_CONNECT_TIMEOUT_SECS)
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            host_keys: HostKeys::default(),
            connect_timeout_secs: None,
            transfer_connect_timeout_secs: default_transfer_connect_timeout_secs(),
            max_parallel: None,
            templates: Templates::default(),
        }
    }
}

impl Settings {
    /// Reads and validates a settings file.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if the file can't be read or fails [Self::validate].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = fs::read_to_string(path).map_err(|e| {
            Error::config(format!("could not read settings {}: {e}", path.display()))
        })?;
        yaml.parse().map_err(|e: Error| e.within(path.display()))
    }

    /// Checks values that deserialize fine but can't be used.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] for a zero timeout, a zero `max_parallel`, a known-host entry
    /// that isn't `host:port` with a hex fingerprint, or a template missing its parameter.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("connect_timeout_secs", self.connect_timeout_secs),
            ("transfer_connect_timeout_secs", self.transfer_connect_timeout_secs),
        ] {
            if value == Some(0) {
                return Err(Error::config(format!("{name} must be greater than zero")));
            }
        }
        if self.max_parallel == Some(0) {
            return Err(Error::config("max_parallel must be greater than zero"));
        }

        for (address, fingerprint) in &self.host_keys.known {
            let port = address.rsplit_once(':').map(|(_, port)| port.parse::<u16>());
            if !matches!(port, Some(Ok(_))) {
                return Err(Error::config(format!(
                    "host_keys.known: {address:?} is not host:port"
                )));
            }
            if fingerprint.len() != 64 || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(Error::config(format!(
                    "host_keys.known: fingerprint for {address} is not a hex SHA-256 digest"
                )));
            }
        }

        self.templates.validate()
    }

    /// Returns the host-key policy.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if no policy was chosen.
    pub fn host_key_policy(&self) -> Result<HostKeyPolicy> {
        self.host_keys.policy.ok_or_else(|| {
            Error::config(
                "no host key policy chosen; set host_keys.policy in settings \
                 (strict, trust_on_first_use, or insecure_skip_verify) or pass \
                 --insecure-skip-host-key-verification",
            )
        })
    }

    /// Returns the connect timeout for a connection of `kind`, if there is one.
    pub fn connect_timeout(&self, kind: ChannelKind) -> Option<Duration> {
        let secs = match kind {
            ChannelKind::Session => self.connect_timeout_secs,
            ChannelKind::Transfer => self.transfer_connect_timeout_secs,
        };
        secs.map(Duration::from_secs)
    }

    /// Returns the recorded fingerprint for `host:port`, lowercased.
    pub fn known_host(&self, host: &str, port: u16) -> Option<String> {
        self.host_keys
            .known
            .get(&format!("{host}:{port}"))
            .map(|fingerprint| fingerprint.to_ascii_lowercase())
    }
}

impl FromStr for Settings {
    type Err = Error;

    /// Parses and validates settings YAML.
    fn from_str(yaml: &str) -> Result<Self> {
        let settings: Option<Settings> = serde_yaml::from_str(yaml)?;
        let settings = settings.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }
}
