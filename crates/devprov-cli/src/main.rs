//! # devprov CLI entry point
//!
//! Parses command-line arguments, initialises logging, loads the
//! configuration, and dispatches to the subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use devprov_adapters::NetshNetworkService;
use devprov_cli::host::{cmd_connect, cmd_networks, cmd_revert, cmd_static, cmd_status};
use devprov_cli::run::{run_provision, RunArgs};
use devprov_core::ProvisionConfig;

/// Filter used when `RUST_LOG` is unset. Run events are already printed
/// to standard output, so the sink's own log lines are kept to warnings.
const DEFAULT_FILTER: &str = "info,devprov_workflow::sink=warn";

/// Device provisioning runs and host wireless network chores.
///
/// `run` deletes the device's stale cache entries, joins the device to a
/// wireless network, waits for the operator to reconnect, applies the
/// static address, and issues the console command.
#[derive(Parser, Debug)]
#[command(name = "devprov", version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the provisioning workflow interactively.
    Run(RunArgs),

    /// List visible wireless networks.
    Networks,

    /// Show the host's address and associated network.
    Status,

    /// Join the host to a wireless network.
    Connect {
        /// Network name.
        ssid: String,
        /// Network password; omit for an open network.
        #[arg(long, default_value = "")]
        password: String,
    },

    /// Apply the static address (device network only).
    Static,

    /// Return the adapter to DHCP (device network only).
    Revert,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match dispatch(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

fn dispatch(cli: Cli) -> Result<u8> {
    let config = ProvisionConfig::load(cli.config.as_deref()).context("invalid configuration")?;
    tracing::debug!(?config, "configuration loaded");

    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(async move {
        let mut out = std::io::stdout();
        match cli.command {
            Commands::Run(args) => run_provision(&args, config).await,
            Commands::Networks => cmd_networks(&host_network(&config), &mut out).await,
            Commands::Status => cmd_status(&host_network(&config), &config, &mut out).await,
            Commands::Connect { ssid, password } => {
                cmd_connect(&host_network(&config), &ssid, &password, &mut out).await
            }
            Commands::Static => {
                cmd_static(&host_network(&config), &config, &mut out).await?;
                tracing::warn!("static address applied; run `devprov revert` to restore DHCP when done");
                Ok(0)
            }
            Commands::Revert => {
                let settle = config.delays.static_settle;
                cmd_revert(&host_network(&config), &config, settle, &mut out).await?;
                Ok(0)
            }
        }
    })
}

fn host_network(config: &ProvisionConfig) -> NetshNetworkService {
    NetshNetworkService::new(config.adapter_name.clone())
}
