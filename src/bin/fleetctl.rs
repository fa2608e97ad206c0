use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use fleetctl::config;
use fleetctl::core::{EndpointGroup, EndpointResult, Inventory, RemotePath, Summary};
use fleetctl::fanout::{Coordinator, Operation};
use fleetctl::packages;
use fleetctl::report::{self, Describe, Report, Reporter};
use fleetctl::settings::{HostKeyPolicy, Settings};
use fleetctl::ssh::{SshOptions, SshProvider};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run commands and copy files across groups of SSH endpoints",
    long_about = None,
    after_help = r#"Examples:
  fleetctl groups
  fleetctl run --group redis -- systemctl status redis
  fleetctl copy --group nginx ./nginx.conf --to /etc/nginx/nginx.conf
  fleetctl package install --group yum vim"#
)]
struct Cli {
    /// Log more. Repeat for more detail. RUST_LOG takes precedence when set.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Inventory file. Defaults to inventory.yaml in the config directory.
    #[arg(long, value_name = "PATH", global = true)]
    inventory: Option<PathBuf>,

    /// Settings file. Defaults to settings.yaml in the config directory, if it exists.
    #[arg(long, value_name = "PATH", global = true)]
    settings: Option<PathBuf>,

    /// Accept any host key. Anyone able to intercept the connection can read the password.
    #[arg(long, global = true)]
    insecure_skip_host_key_verification: bool,

    /// Work on at most this many endpoints at once.
    #[arg(long, value_name = "N", global = true)]
    max_parallel: Option<NonZeroUsize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List groups and their endpoints.
    Groups,

    /// Run a shell command on every endpoint of a group.
    Run {
        #[arg(short, long)]
        group: String,

        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Write a local file to every endpoint of a group.
    Copy {
        #[arg(short, long)]
        group: String,

        local: PathBuf,

        /// Remote file. Paths not starting with `/` are relative to the login user's home. Defaults
        /// to the local file's name in the home directory.
        #[arg(long, value_name = "PATH")]
        to: Option<String>,
    },

    /// Check for or install a package.
    Package {
        #[command(subcommand)]
        cmd: PackageCommands,
    },
}

#[derive(Subcommand, Debug)]
enum PackageCommands {
    /// Report whether a package is installed on each endpoint.
    Check {
        #[arg(short, long)]
        group: String,

        name: String,
    },

    /// Install a package on each endpoint that doesn't have it.
    Install {
        #[arg(short, long)]
        group: String,

        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let inventory_path = cli.inventory.clone().unwrap_or_else(config::inventory_path);
    let inventory = Inventory::load(&inventory_path)?;

    if let Commands::Groups = cli.command {
        list_groups(&inventory);
        return Ok(ExitCode::SUCCESS);
    }

    let settings = load_settings(&cli)?;
    let options = SshOptions::from_settings(&settings)?;

    let all_succeeded = match cli.command {
        Commands::Groups => true,
        Commands::Run { group, command } => {
            let group = inventory.group(&group)?;
            let operation = Operation::command(command.join(" "));
            run_operation(&settings, options, &group, &operation).await?
        }
        Commands::Copy { group, local, to } => {
            let group = inventory.group(&group)?;
            let operation = match to {
                Some(path) => Operation::copy_to(&local, RemotePath::parse(&path)?)?,
                None => Operation::copy_to_home(&local)?,
            };
            run_operation(&settings, options, &group, &operation).await?
        }
        Commands::Package { cmd } => run_package(&inventory, &settings, options, cmd).await?,
    };

    Ok(match all_succeeded {
        true => ExitCode::SUCCESS,
        false => ExitCode::FAILURE,
    })
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Reads settings and applies command-line overrides on top.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)?,
        None => {
            let path = config::settings_path();
            match path.is_file() {
                true => Settings::load(&path)?,
                false => {
                    info!(path = %path.display(), "no settings file, using defaults");
                    Settings::default()
                }
            }
        }
    };

    if cli.insecure_skip_host_key_verification {
        settings.host_keys.policy = Some(HostKeyPolicy::InsecureSkipVerify);
    }
    if let Some(max_parallel) = cli.max_parallel {
        settings.max_parallel = Some(max_parallel.get());
    }
    Ok(settings)
}

fn list_groups(inventory: &Inventory) {
    for (name, endpoints) in inventory.groups() {
        println!("{name}:");
        if endpoints.is_empty() {
            println!("    (empty)");
        }
        for endpoint in endpoints {
            println!("    {endpoint}");
        }
    }
}

fn coordinator(settings: &Settings, options: SshOptions) -> Coordinator<SshProvider> {
    Coordinator::new(SshProvider::new(options)).with_limit(settings.max_parallel)
}

async fn run_operation(
    settings: &Settings,
    options: SshOptions,
    group: &EndpointGroup,
    operation: &Operation,
) -> Result<bool> {
    let results = coordinator(settings, options)
        .run_parallel(group, operation)
        .await;
    print_results(group, &report::title(operation), &results).await
}

async fn run_package(
    inventory: &Inventory,
    settings: &Settings,
    options: SshOptions,
    cmd: PackageCommands,
) -> Result<bool> {
    let coordinator = coordinator(settings, options);
    let templates = Arc::new(settings.templates.clone());

    match cmd {
        PackageCommands::Check { group, name } => {
            let group = inventory.group(&group)?;
            let results = coordinator
                .run_each(&group, |provider, endpoint| {
                    let templates = templates.clone();
                    let name = name.clone();
                    async move {
                        packages::is_installed(provider.as_ref(), &templates, &endpoint, &name)
                            .await
                    }
                })
                .await;
            print_results(&group, &format!("package check: {name}"), &results).await
        }
        PackageCommands::Install { group, name } => {
            let group = inventory.group(&group)?;
            let results = coordinator
                .run_each(&group, |provider, endpoint| {
                    let templates = templates.clone();
                    let name = name.clone();
                    async move {
                        packages::ensure_installed(provider.as_ref(), &templates, &endpoint, &name)
                            .await
                    }
                })
                .await;
            print_results(&group, &format!("package install: {name}"), &results).await
        }
    }
}

/// Prints every result in group order, then the group's summary. Returns whether every endpoint
/// succeeded.
async fn print_results<T: Describe + Sync>(
    group: &EndpointGroup,
    title: &str,
    results: &[EndpointResult<T>],
) -> Result<bool> {
    let mut reporter = Reporter;
    for result in results {
        reporter
            .report(title, result)
            .await
            .context("could not write report")?;
    }

    let summary = Summary::of(results);
    reporter
        .summary(group.name(), &summary)
        .await
        .context("could not write summary")?;
    Ok(summary.all_succeeded())
}
