//! The production [ConnectionProvider]: password-authenticated SSH via [russh].
//!
//! Commands run on an exec channel. Files are written by exec'ing `cat > <path>` and streaming
//! the payload to its stdin, so no SFTP subsystem is needed on the remote side.
//!
//! How the host's key is checked is governed by [HostKeyPolicy]. There is no default: callers
//! choose one explicitly through [SshOptions].

use crate::connection::{ChannelKind, Connection, ConnectionProvider};
use crate::core::{CommandOutput, Endpoint};
use crate::error::{Error, Result};
use crate::settings::{HostKeyPolicy, Settings};
use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::{Channel, ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Everything the SSH provider needs to know besides the endpoint itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SshOptions {
    pub policy: HostKeyPolicy,

    /// Maps `host:port` to a lowercase hex SHA-256 key fingerprint.
    pub known_hosts: HashMap<String, String>,

    pub session_connect_timeout: Option<Duration>,
    pub transfer_connect_timeout: Option<Duration>,
}

impl SshOptions {
    pub fn new(policy: HostKeyPolicy) -> Self {
        SshOptions {
            policy,
            known_hosts: HashMap::new(),
            session_connect_timeout: None,
            transfer_connect_timeout: None,
        }
    }

    /// Builds options from settings.
    ///
    /// # Errors
    ///
    /// Returns [Error::Config] if the settings don't choose a host-key policy.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(SshOptions {
            policy: settings.host_key_policy()?,
            known_hosts: settings
                .host_keys
                .known
                .iter()
                .map(|(address, fingerprint)| {
                    (address.clone(), fingerprint.to_ascii_lowercase())
                })
                .collect(),
            session_connect_timeout: settings.connect_timeout(ChannelKind::Session),
            transfer_connect_timeout: settings.connect_timeout(ChannelKind::Transfer),
        })
    }

    pub fn connect_timeout(&self, kind: ChannelKind) -> Option<Duration> {
        match kind {
            ChannelKind::Session => self.session_connect_timeout,
            ChannelKind::Transfer => self.transfer_connect_timeout,
        }
    }
}

/// Opens a fresh SSH connection for every operation.
pub struct SshProvider {
    options: SshOptions,
    config: Arc<Config>,

    /// Keys accepted under [HostKeyPolicy::TrustOnFirstUse] during this run.
    learned: Arc<Mutex<HashMap<String, String>>>,
}

impl SshProvider {
    pub fn new(options: SshOptions) -> Self {
        if options.policy == HostKeyPolicy::InsecureSkipVerify {
            warn!("host key verification is disabled; connections can be intercepted");
        }
        SshProvider {
            options,
            config: Arc::new(Config::default()),
            learned: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ConnectionProvider for SshProvider {
    type Connection = SshConnection;

    async fn connect(&self, endpoint: &Endpoint, kind: ChannelKind) -> Result<SshConnection> {
        let address = format!("{}:{}", endpoint.host, endpoint.port);
        let checker = HostKeyCheck {
            address: address.clone(),
            policy: self.options.policy,
            known: self.options.known_hosts.get(&address).cloned(),
            learned: self.learned.clone(),
        };
        if self.options.policy == HostKeyPolicy::InsecureSkipVerify {
            warn!(
                host = %endpoint.host,
                port = endpoint.port,
                "connecting without host key verification",
            );
        }

        let handshake = async {
            let target = (endpoint.host.clone(), endpoint.port);
            let mut handle = client::connect(self.config.clone(), target, checker)
                .await
                .map_err(|e| match e {
                    russh::Error::UnknownKey => Error::connect(
                        endpoint,
                        format!("host key rejected under {:?} policy", self.options.policy),
                    ),
                    e => Error::connect(endpoint, e),
                })?;

            let accepted = handle
                .authenticate_password(endpoint.username.clone(), endpoint.password())
                .await
                .map_err(|e| Error::connect(endpoint, format!("authentication failed: {e}")))?;
            if !accepted {
                return Err(Error::connect(endpoint, "authentication rejected"));
            }
            Ok(handle)
        };

        let handle = match self.options.connect_timeout(kind) {
            Some(limit) => time::timeout(limit, handshake).await.map_err(|_| {
                Error::connect(endpoint, format!("timed out after {}s", limit.as_secs()))
            })??,
            None => handshake.await?,
        };

        debug!(
            host = %endpoint.host,
            port = endpoint.port,
            user = %endpoint.username,
            ?kind,
            "connected",
        );
        Ok(SshConnection {
            handle,
            endpoint: endpoint.id(),
        })
    }
}

/// One authenticated SSH connection. Each call opens its own channel.
pub struct SshConnection {
    handle: Handle<HostKeyCheck>,
    endpoint: String,
}

impl SshConnection {
    async fn open_channel(&self) -> Result<Channel<client::Msg>> {
        self.handle.channel_open_session().await.map_err(|e| {
            Error::connect(&self.endpoint, format!("could not open a session channel: {e}"))
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        let mut channel = self.open_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::remote_execution(&self.endpoint, e))?;

        let reply = Reply::collect(&mut channel).await;
        let _ = channel.close().await;
        reply.finish(&self.endpoint)
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        let transfer_error = |reason: &dyn std::fmt::Display| {
            Error::transfer(&self.endpoint, path, reason)
        };

        let quoted = shlex::try_quote(path).map_err(|e| transfer_error(&e))?;
        let mut channel = self.open_channel().await?;
        channel
            .exec(true, format!("cat > {quoted}"))
            .await
            .map_err(|e| transfer_error(&e))?;
        channel.data(contents).await.map_err(|e| transfer_error(&e))?;
        channel.eof().await.map_err(|e| transfer_error(&e))?;

        let reply = Reply::collect(&mut channel).await;
        let _ = channel.close().await;
        let output = reply.finish(&self.endpoint).map_err(|e| transfer_error(&e))?;
        match output.exit_status {
            Some(0) => Ok(()),
            _ => Err(transfer_error(&describe_failure(&output))),
        }
    }

    async fn close(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!(endpoint = %self.endpoint, error = %e, "disconnect failed");
        }
    }
}

/// Everything a channel reported before it closed.
#[derive(Debug, Default)]
struct Reply {
    output: Vec<u8>,
    exit_status: Option<u32>,
    exit_signal: Option<String>,
}

impl Reply {
    /// Reads from `channel` until the remote side closes it. Stdout and stderr are combined in
    /// arrival order.
    async fn collect(channel: &mut Channel<client::Msg>) -> Self {
        let mut reply = Reply::default();
        while let Some(message) = channel.wait().await {
            match message {
                ChannelMsg::Data { ref data } => reply.output.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, .. } => reply.output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => reply.exit_status = Some(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    reply.exit_signal = Some(format!("{signal_name:?}"))
                }
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        reply
    }

    /// Converts the reply into a [CommandOutput], or an error if the process never said how it
    /// ended.
    fn finish(self, endpoint: &str) -> Result<CommandOutput> {
        if self.exit_status.is_none() && self.exit_signal.is_none() {
            return Err(Error::remote_execution(
                endpoint,
                "channel closed before the command reported an exit status",
            ));
        }
        Ok(CommandOutput {
            output: String::from_utf8_lossy(&self.output).into_owned(),
            exit_status: self.exit_status,
            exit_signal: self.exit_signal,
        })
    }
}

fn describe_failure(output: &CommandOutput) -> String {
    let how = match (&output.exit_status, &output.exit_signal) {
        (Some(code), _) => format!("exit status {code}"),
        (None, Some(signal)) => format!("killed by signal {signal}"),
        (None, None) => "no exit status".to_string(),
    };
    match output.output.trim() {
        "" => how,
        text => format!("{text} ({how})"),
    }
}

/// Returns the hex SHA-256 digest of a key's base64 encoding.
fn fingerprint(key: &PublicKey) -> String {
    hex::encode(Sha256::digest(key.public_key_base64().as_bytes()))
}

/// Decides whether to trust the key a host presented.
struct HostKeyCheck {
    address: String,
    policy: HostKeyPolicy,
    known: Option<String>,
    learned: Arc<Mutex<HashMap<String, String>>>,
}

impl HostKeyCheck {
    fn accepts(&self, fingerprint: &str) -> bool {
        use HostKeyPolicy::*;

        let learned = self
            .learned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&self.address)
            .cloned();
        let expected = self.known.clone().or(learned);

        match (self.policy, expected) {
            (InsecureSkipVerify, _) => true,
            (_, Some(expected)) if expected == fingerprint => {
                debug!(host = %self.address, "host key verified");
                true
            }
            (_, Some(expected)) => {
                error!(
                    host = %self.address,
                    expected = %expected,
                    actual = %fingerprint,
                    "host key mismatch; refusing to connect",
                );
                false
            }
            (TrustOnFirstUse, None) => {
                info!(host = %self.address, fingerprint, "trusting host key on first use");
                let _ = self
                    .learned
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(self.address.clone(), fingerprint.to_string());
                true
            }
            (Strict, None) => {
                error!(host = %self.address, fingerprint, "unknown host key in strict mode");
                false
            }
        }
    }
}

#[async_trait]
impl client::Handler for HostKeyCheck {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(self.accepts(&fingerprint(server_public_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const KEY_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn check(policy: HostKeyPolicy, known: Option<&str>) -> HostKeyCheck {
        HostKeyCheck {
            address: "10.0.0.1:22".to_string(),
            policy,
            known: known.map(str::to_string),
            learned: Arc::default(),
        }
    }

    mod accepts {
        use super::*;

        #[test]
        fn strict() {
            assert!(check(HostKeyPolicy::Strict, Some(KEY_A)).accepts(KEY_A));
            assert!(!check(HostKeyPolicy::Strict, Some(KEY_A)).accepts(KEY_B));
            assert!(!check(HostKeyPolicy::Strict, None).accepts(KEY_A));
        }

        #[test]
        fn trust_on_first_use() {
            let first = check(HostKeyPolicy::TrustOnFirstUse, None);
            assert!(first.accepts(KEY_A));

            // A second connection in the same run shares what the first one learned.
            let second = HostKeyCheck {
                learned: first.learned.clone(),
                ..check(HostKeyPolicy::TrustOnFirstUse, None)
            };
            assert!(second.accepts(KEY_A));
            assert!(!second.accepts(KEY_B));

            assert!(!check(HostKeyPolicy::TrustOnFirstUse, Some(KEY_A)).accepts(KEY_B));
        }

        #[test]
        fn insecure_skip_verify() {
            assert!(check(HostKeyPolicy::InsecureSkipVerify, None).accepts(KEY_A));
            assert!(check(HostKeyPolicy::InsecureSkipVerify, Some(KEY_A)).accepts(KEY_B));
        }
    }

    mod reply {
        use super::*;

        #[test]
        fn exit_status() {
            let reply = Reply {
                output: b"out\nerr\n".to_vec(),
                exit_status: Some(3),
                exit_signal: None,
            };
            assert_eq!(CommandOutput::exited("out\nerr\n", 3), reply.finish("e").unwrap());
        }

        #[test]
        fn signal() {
            let reply = Reply {
                exit_signal: Some("KILL".to_string()),
                ..Default::default()
            };
            let output = reply.finish("e").unwrap();
            assert_eq!(None, output.exit_status);
            assert!(!output.success());
            assert_eq!("killed by signal KILL", describe_failure(&output));
        }

        #[test]
        fn closed_without_status() {
            let reply = Reply {
                output: b"partial".to_vec(),
                ..Default::default()
            };
            assert!(reply.finish("root@h:22").unwrap_err().is_remote_execution());
        }
    }

    #[test]
    fn describe_failure_includes_output() {
        let output = CommandOutput::exited("cat: /etc/x: Permission denied\n", 1);
        assert_eq!(
            "cat: /etc/x: Permission denied (exit status 1)",
            describe_failure(&output),
        );
    }

    mod ssh_options {
        use super::*;

        #[test]
        fn from_settings() {
            let settings: Settings = format!(
                "host_keys: {{policy: trust_on_first_use, known: {{\"h:22\": {}}}}}\n\
                 connect_timeout_secs: 5\n",
                KEY_A.to_uppercase(),
            )
            .parse()
            .unwrap();

            let options = SshOptions::from_settings(&settings).unwrap();
            assert_eq!(HostKeyPolicy::TrustOnFirstUse, options.policy);
            assert_eq!(Some(&KEY_A.to_string()), options.known_hosts.get("h:22"));
            assert_eq!(
                Some(Duration::from_secs(5)),
                options.connect_timeout(ChannelKind::Session),
            );
            assert_eq!(
                Some(Duration::from_secs(30)),
                options.connect_timeout(ChannelKind::Transfer),
            );
        }

        #[test]
        fn requires_a_policy() {
            let error = SshOptions::from_settings(&Settings::default()).unwrap_err();
            assert!(error.is_config());
        }
    }
}
