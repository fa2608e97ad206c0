//! Exercises fleetctl from loading an inventory and settings from YAML through fanning operations
//! out over a simulated network and tallying the results.
//!
//! The simulated network is built only on the crate's public traits, so these tests also check
//! that an outside crate can plug in its own connection provider.

use async_trait::async_trait;
use fleetctl::connection::{ChannelKind, Connection, ConnectionProvider};
use fleetctl::core::{CommandOutput, Completion, Endpoint, Inventory, RemotePath, Summary};
use fleetctl::fanout::{Coordinator, Operation};
use fleetctl::packages::{self, PackageState};
use fleetctl::settings::Settings;
use fleetctl::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const INVENTORY: &str = r#"
redis:
  - host: 10.0.0.11
    username: root
    password: s3cret
  - host: 10.0.0.12
    port: "2222"
    username: root
    password: s3cret
  - host: 10.0.0.13
    username: root
    password: wrong
yum:
  - host: 10.0.0.31
    username: root
    password: s3cret
  - host: 10.0.0.32
    username: root
    password: s3cret
docker:
"#;

pub mod network {
    use super::*;

    /// A network where any host accepts the password `s3cret`, commands named in `installed`
    /// succeed, and files land in a shared map.
    #[derive(Clone, Default)]
    pub struct Network {
        pub installed: Arc<Mutex<HashSet<(String, String)>>>,
        pub files: Arc<Mutex<HashMap<(String, String), Vec<u8>>>>,
        pub commands: Arc<Mutex<Vec<(String, String)>>>,
        pub open: Arc<AtomicUsize>,
    }

    impl Network {
        pub fn install(&self, host: &str, package: &str) {
            self.installed
                .lock()
                .unwrap()
                .insert((host.to_string(), package.to_string()));
        }

        pub fn commands_on(&self, host: &str) -> Vec<String> {
            self.commands
                .lock()
                .unwrap()
                .iter()
                .filter(|(h, _)| h == host)
                .map(|(_, command)| command.clone())
                .collect()
        }
    }

    pub struct Link {
        network: Network,
        host: String,
        endpoint: String,
    }

    #[async_trait]
    impl ConnectionProvider for Network {
        type Connection = Link;

        async fn connect(&self, endpoint: &Endpoint, _kind: ChannelKind) -> Result<Link> {
            if endpoint.password() != "s3cret" {
                return Err(Error::connect(endpoint, "authentication rejected"));
            }
            self.open.fetch_add(1, Ordering::SeqCst);
            Ok(Link {
                network: self.clone(),
                host: endpoint.host.clone(),
                endpoint: endpoint.id(),
            })
        }
    }

    #[async_trait]
    impl Connection for Link {
        async fn exec(&mut self, command: &str) -> Result<CommandOutput> {
            self.network
                .commands
                .lock()
                .unwrap()
                .push((self.host.clone(), command.to_string()));

            let installed = self.network.installed.lock().unwrap();
            if let Some(package) = command.strip_prefix("rpm -qa | grep ") {
                let found = installed.contains(&(self.host.clone(), package.to_string()));
                return Ok(CommandOutput::exited("", if found { 0 } else { 1 }));
            }
            if command.starts_with("yum install -y ") {
                return Ok(CommandOutput::exited("Complete!\n", 0));
            }
            Ok(CommandOutput::exited(format!("ran on {}\n", self.endpoint), 0))
        }

        async fn write_file(&mut self, path: &str, contents: &[u8]) -> Result<()> {
            self.network
                .files
                .lock()
                .unwrap()
                .insert((self.host.clone(), path.to_string()), contents.to_vec());
            Ok(())
        }

        async fn close(self) {
            self.network.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
use network::Network;

#[tokio::test(flavor = "multi_thread")]
async fn runs_a_command_across_a_group() -> anyhow::Result<()> {
    let inventory: Inventory = INVENTORY.parse()?;
    let group = inventory.group("redis")?;
    let network = Network::default();
    let coordinator = Coordinator::new(network.clone());

    let results = coordinator
        .run_parallel(&group, &Operation::command("uptime"))
        .await;

    let endpoints: Vec<_> = results.iter().map(|r| r.endpoint.as_str()).collect();
    assert_eq!(
        vec!["root@10.0.0.11:22", "root@10.0.0.12:2222", "root@10.0.0.13:22"],
        endpoints,
    );
    assert_eq!(Some("ran on root@10.0.0.12:2222\n"), results[1].output());
    assert!(results[2].error().is_some_and(Error::is_connect));

    let summary = Summary::of(&results);
    assert_eq!(2, summary.succeeded);
    assert_eq!(1, summary.connect_failures);
    assert!(!summary.all_succeeded());
    assert_eq!(0, network.open.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn copies_a_local_file_to_every_home_directory() -> anyhow::Result<()> {
    let inventory: Inventory = INVENTORY.parse()?;
    let group = inventory.group("yum")?;
    let network = Network::default();

    let dir = tempfile::tempdir()?;
    let local = dir.path().join("motd");
    std::fs::File::create(&local)?.write_all(b"welcome\n")?;

    let results = Coordinator::new(network.clone())
        .run_parallel(&group, &Operation::copy_to_home(&local)?)
        .await;

    for result in &results {
        assert!(matches!(
            &result.outcome,
            Ok(Completion::FileWritten { path, bytes: 8 }) if path == "/root/motd"
        ));
    }
    let files = network.files.lock().unwrap();
    assert_eq!(
        Some(&b"welcome\n".to_vec()),
        files.get(&("10.0.0.32".to_string(), "/root/motd".to_string())),
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_to_an_explicit_path() -> anyhow::Result<()> {
    let inventory: Inventory = INVENTORY.parse()?;
    let group = inventory.group("yum")?;
    let network = Network::default();

    let operation = Operation::write_file(RemotePath::parse("/etc/motd")?, b"hi".to_vec());
    let results = Coordinator::new(network.clone())
        .run_parallel(&group, &operation)
        .await;

    assert!(Summary::of(&results).all_succeeded());
    assert_eq!(2, network.files.lock().unwrap().len());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn installs_only_where_missing() -> anyhow::Result<()> {
    let inventory: Inventory = INVENTORY.parse()?;
    let settings: Settings = "host_keys: {policy: strict}".parse()?;
    let group = inventory.group("yum")?;
    let network = Network::default();
    network.install("10.0.0.31", "vim");

    let templates = Arc::new(settings.templates.clone());
    let results = Coordinator::new(network.clone())
        .with_limit(Some(1))
        .run_each(&group, |provider, endpoint| {
            let templates = templates.clone();
            async move {
                packages::ensure_installed(provider.as_ref(), &templates, &endpoint, "vim").await
            }
        })
        .await;

    let states: Vec<_> = results
        .iter()
        .map(|r| r.outcome.clone().map_err(|e| e.to_string()))
        .collect();
    assert_eq!(
        vec![Ok(PackageState::AlreadyInstalled), Ok(PackageState::Installed)],
        states,
    );
    assert_eq!(vec!["rpm -qa | grep vim"], network.commands_on("10.0.0.31"));
    assert_eq!(
        vec!["rpm -qa | grep vim", "yum install -y vim"],
        network.commands_on("10.0.0.32"),
    );
    Ok(())
}

#[test]
fn configuration_errors_surface_before_any_connection() {
    let inventory: Inventory = INVENTORY.parse().unwrap();
    assert!(inventory.group("docker").unwrap_err().is_config());
    assert!(inventory.group("nginx").unwrap_err().is_config());

    let settings: Settings = "{}".parse().unwrap();
    assert!(settings.host_key_policy().unwrap_err().is_config());
}

#[test]
fn loads_inventory_from_a_file() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(INVENTORY.as_bytes())?;

    let inventory = Inventory::load(file.path())?;
    let names: Vec<_> = inventory.group_names().collect();
    assert_eq!(vec!["redis", "yum", "docker"], names);
    Ok(())
}
