//! An in-memory [ConnectionProvider] for tests.

use super::*;
use crate::error::Error;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{self, Instant};

/// How a fake host behaves. The default host accepts every login and exits 0 with no output.
#[derive(Clone, Debug)]
pub struct HostBehavior {
    /// Dialing fails.
    pub unreachable: bool,

    /// Authentication fails.
    pub reject_auth: bool,

    /// Every operation sleeps this long before finishing.
    pub delay: Duration,

    /// The channel dies before any command or write finishes.
    pub drop_channel: bool,

    /// Writes fail with a permission error.
    pub read_only: bool,

    /// The result of any command not listed in `responses`.
    pub default_response: CommandOutput,

    /// Results for specific command strings.
    pub responses: HashMap<String, CommandOutput>,
}

impl Default for HostBehavior {
    fn default() -> Self {
        HostBehavior {
            unreachable: false,
            reject_auth: false,
            delay: Duration::ZERO,
            drop_channel: false,
            read_only: false,
            default_response: CommandOutput::exited("", 0),
            responses: HashMap::new(),
        }
    }
}

impl HostBehavior {
    pub fn exiting(code: u32) -> Self {
        HostBehavior {
            default_response: CommandOutput::exited("", code),
            ..Default::default()
        }
    }

    pub fn respond(mut self, command: &str, output: CommandOutput) -> Self {
        let _ = self.responses.insert(command.to_string(), output);
        self
    }
}

#[derive(Debug, Default)]
pub struct State {
    behaviors: HashMap<String, HostBehavior>,

    /// The remote filesystem, keyed by (host, path).
    pub files: HashMap<(String, String), Vec<u8>>,

    /// Every command run, as (host, command), in the order they started.
    pub commands: Vec<(String, String)>,

    /// Every successful connect, as (host, kind).
    pub connects: Vec<(String, ChannelKind)>,

    pub opened: usize,
    pub closed: usize,
    active: usize,
    pub max_active: usize,

    /// The host and time of every finished operation, in completion order.
    pub completions: Vec<(String, Instant)>,
}

/// A fake provider whose hosts are configured per host name.
#[derive(Clone, Debug, Default)]
pub struct TestProvider {
    state: Arc<Mutex<State>>,
}

impl TestProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how `host` behaves. Hosts with no behavior set use [HostBehavior::default].
    pub fn behave(&self, host: &str, behavior: HostBehavior) -> &Self {
        let _ = self.state().behaviors.insert(host.to_string(), behavior);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Returns how many connections were opened and how many were closed.
    pub fn opened_closed(&self) -> (usize, usize) {
        let state = self.state();
        (state.opened, state.closed)
    }

    /// Reads back a file from the fake remote filesystem.
    pub fn file(&self, host: &str, path: &str) -> Option<Vec<u8>> {
        self.state()
            .files
            .get(&(host.to_string(), path.to_string()))
            .cloned()
    }

    fn behavior(&self, host: &str) -> HostBehavior {
        self.state().behaviors.get(host).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ConnectionProvider for TestProvider {
    type Connection = TestConnection;

    async fn connect(&self, endpoint: &Endpoint, kind: ChannelKind) -> Result<TestConnection> {
        let behavior = self.behavior(&endpoint.host);
        if behavior.unreachable {
            return Err(Error::connect(endpoint, "connection refused"));
        }
        if behavior.reject_auth {
            return Err(Error::connect(endpoint, "authentication rejected"));
        }

        let mut state = self.state();
        state.opened += 1;
        state.active += 1;
        state.max_active = state.max_active.max(state.active);
        state.connects.push((endpoint.host.clone(), kind));
        drop(state);

        Ok(TestConnection {
            provider: self.clone(),
            endpoint: endpoint.id(),
            host: endpoint.host.clone(),
            behavior,
        })
    }
}

pub struct TestConnection {
    provider: TestProvider,
    endpoint: String,
    host: String,
    behavior: HostBehavior,
}

impl TestConnection {
    fn complete(&self) {
        self.provider
            .state()
            .completions
            .push((self.host.clone(), Instant::now()));
    }
}

#[async_trait]
impl Connection for TestConnection {
    async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
        self.provider
            .state()
            .commands
            .push((self.host.clone(), command.to_string()));
        time::sleep(self.behavior.delay).await;

        if self.behavior.drop_channel {
            return Err(Error::remote_execution(
                &self.endpoint,
                "channel closed before the command exited",
            ));
        }

        let output = self
            .behavior
            .responses
            .get(command)
            .unwrap_or(&self.behavior.default_response)
            .clone();
        self.complete();
        Ok(output)
    }

    async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
        time::sleep(self.behavior.delay).await;

        if self.behavior.drop_channel {
            return Err(Error::remote_execution(&self.endpoint, "channel closed"));
        }
        if self.behavior.read_only {
            return Err(Error::transfer(&self.endpoint, path, "permission denied"));
        }

        let _ = self
            .provider
            .state()
            .files
            .insert((self.host.clone(), path.to_string()), contents.to_vec());
        self.complete();
        Ok(())
    }

    async fn close(self) {
        let mut state = self.provider.state();
        state.closed += 1;
        state.active -= 1;
    }
}
