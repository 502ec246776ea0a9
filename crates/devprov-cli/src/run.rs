//! # Run Subcommand
//!
//! Interactive provisioning run. The worker's events are printed as they
//! arrive while the operator types commands on standard input:
//!
//! | Command   | Effect |
//! |-----------|--------|
//! | `resume`  | Release the gate once the host is back on a device network |
//! | `resume!` | Release the gate without checking the host network |
//! | `cancel`  | Cancel the run (Ctrl-C does the same) |
//! | `status`  | Show the run's phase and the host network status |
//!
//! When the run leaves a static address applied, the operator is offered
//! `revert` before the command exits. `--report <file>` saves the run
//! report (outcome, sweep result, transition log) as JSON.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

use devprov_adapters::{NetshNetworkService, WebDriverConfig, WebDriverSession};
use devprov_core::{
    HostStatus, NetworkError, NetworkService, ProvisionConfig, RunEvent, RunOutcome,
};
use devprov_workflow::{Orchestrator, RunControl, RunHandle, RunReport, RunRequest};

use crate::host::{cmd_revert, write_status};

/// Arguments for `devprov run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Network the device should join.
    #[arg(long)]
    pub ssid: String,

    /// Password for that network; omit for an open network.
    #[arg(long, default_value = "")]
    pub password: String,

    /// Write the run report as JSON to this file.
    #[arg(long)]
    pub report: Option<PathBuf>,
}

// ─── Operator Commands ───────────────────────────────────────────────

/// A line typed by the operator during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    Resume,
    ForceResume,
    Cancel,
    Status,
    Revert,
    Quit,
    Help,
}

impl OperatorCommand {
    /// Parse a typed line. Blank lines are `None`; unknown words are `Help`.
    pub fn parse(line: &str) -> Option<Self> {
        let word = line.trim();
        if word.is_empty() {
            return None;
        }
        Some(match word.to_ascii_lowercase().as_str() {
            "resume" | "r" => Self::Resume,
            "resume!" => Self::ForceResume,
            "cancel" | "c" => Self::Cancel,
            "status" | "s" => Self::Status,
            "revert" => Self::Revert,
            "quit" | "q" | "exit" => Self::Quit,
            _ => Self::Help,
        })
    }
}

/// Result of checking the host network before releasing the gate.
#[derive(Debug)]
pub enum ResumeCheck {
    /// On a device network; the gate may be released.
    Ready(HostStatus),
    /// On some other network, or none.
    WrongNetwork(HostStatus),
    /// The status could not be read.
    Unreadable(NetworkError),
}

/// Check that the host is back on a device network.
pub async fn resume_precheck(network: &dyn NetworkService, prefix: &str) -> ResumeCheck {
    match network.current_status().await {
        Ok(status) if status.is_on_device_network(prefix) => ResumeCheck::Ready(status),
        Ok(status) => ResumeCheck::WrongNetwork(status),
        Err(e) => ResumeCheck::Unreadable(e),
    }
}

// ─── Rendering ───────────────────────────────────────────────────────

/// Print one run event.
pub fn render_event(event: &RunEvent, out: &mut dyn Write) -> std::io::Result<()> {
    match event {
        RunEvent::PhaseChanged(phase) => writeln!(out, "==> {phase}"),
        RunEvent::Log(line) => writeln!(out, "{line}"),
        RunEvent::AwaitingResume => writeln!(
            out,
            "Reconnect this machine to the device network, then type `resume` \
             (`resume!` skips the network check)."
        ),
        RunEvent::Resumed => writeln!(out, "Resumed."),
        RunEvent::RunFinished(outcome) => match outcome {
            RunOutcome::Succeeded => writeln!(out, "Run succeeded."),
            RunOutcome::Failed { phase, detail } => {
                writeln!(out, "Run failed in {phase}: {detail}")
            }
            RunOutcome::Cancelled { phase } => writeln!(out, "Run cancelled during {phase}."),
        },
    }
}

const HELP: &str = "Commands: resume, resume!, cancel, status";

// ─── Interactive Loop ────────────────────────────────────────────────

/// Relay operator input to a running workflow until it reports back.
///
/// Input that ends early does not stop the run; Ctrl-C cancels it.
pub async fn drive_run<R>(
    mut handle: RunHandle,
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    lines: &mut Lines<R>,
    out: &mut dyn Write,
) -> Result<RunReport>
where
    R: AsyncBufRead + Unpin,
{
    let control = handle.control();
    let mut input_open = true;
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(event) => render_event(&event, out)?,
                None => break,
            },
            line = lines.next_line(), if input_open => match line? {
                Some(line) => {
                    if let Some(command) = OperatorCommand::parse(&line) {
                        relay(command, &control, network, config, out).await?;
                    }
                }
                None => {
                    input_open = false;
                    tracing::debug!("operator input closed");
                }
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                writeln!(out, "Interrupted; cancelling run.")?;
                control.cancel();
            }
        }
    }

    handle.join().await.context("run worker did not complete")
}

async fn relay(
    command: OperatorCommand,
    control: &RunControl,
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    out: &mut dyn Write,
) -> Result<()> {
    match command {
        OperatorCommand::Resume => {
            if !control.is_awaiting_resume() {
                writeln!(out, "Not waiting for resume (phase {}).", control.phase())?;
                return Ok(());
            }
            match resume_precheck(network, &config.device_ssid_prefix).await {
                ResumeCheck::Ready(status) => {
                    tracing::info!(ssid = status.ssid_or_na(), "resume precheck passed");
                    control.resume();
                }
                ResumeCheck::WrongNetwork(status) => writeln!(
                    out,
                    "Host is connected to '{}'. Connect to a network starting with '{}' \
                     before resuming.",
                    status.ssid_or_na(),
                    config.device_ssid_prefix
                )?,
                ResumeCheck::Unreadable(e) => {
                    writeln!(out, "Could not verify the host connection: {e}")?
                }
            }
        }
        OperatorCommand::ForceResume => {
            if !control.is_awaiting_resume() {
                writeln!(out, "Not waiting for resume (phase {}).", control.phase())?;
            } else if control.resume() {
                tracing::warn!("gate released without a host network check");
            } else {
                writeln!(out, "Gate already open.")?;
            }
        }
        OperatorCommand::Cancel => control.cancel(),
        OperatorCommand::Status => {
            let status = control.status();
            writeln!(
                out,
                "Run {} in {}{}",
                status.run_id.short(),
                status.phase,
                if status.awaiting_resume { " (awaiting resume)" } else { "" }
            )?;
            match network.current_status().await {
                Ok(host) => write_status(&host, config, out)?,
                Err(e) => writeln!(out, "Host status unavailable: {e}")?,
            }
        }
        OperatorCommand::Revert | OperatorCommand::Quit | OperatorCommand::Help => {
            writeln!(out, "{HELP}")?
        }
    }
    Ok(())
}

/// Offer to revert a static address the run left applied.
///
/// Returns once the operator reverts successfully, quits, or input ends.
pub async fn offer_revert<R>(
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    lines: &mut Lines<R>,
    out: &mut dyn Write,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    writeln!(
        out,
        "Static address {} is still applied to '{}'. Type `revert` to return to DHCP or `quit`.",
        config.static_address.address, config.adapter_name
    )?;
    while let Some(line) = lines.next_line().await? {
        match OperatorCommand::parse(&line) {
            Some(OperatorCommand::Revert) => {
                match cmd_revert(network, config, config.delays.static_settle, out).await {
                    Ok(_) => return Ok(true),
                    Err(e) => writeln!(out, "Revert failed: {e:#}")?,
                }
            }
            Some(OperatorCommand::Quit) => return Ok(false),
            Some(_) => writeln!(out, "Commands: revert, quit")?,
            None => {}
        }
    }
    Ok(false)
}

// ─── Handler ─────────────────────────────────────────────────────────

/// `devprov run`: connect a browser session and run the workflow.
pub async fn run_provision(args: &RunArgs, config: ProvisionConfig) -> Result<u8> {
    let network: Arc<dyn NetworkService> =
        Arc::new(NetshNetworkService::new(config.adapter_name.clone()));
    let driver_config =
        WebDriverConfig::from_provision(&config).context("invalid WebDriver settings")?;
    let session = WebDriverSession::connect(driver_config)
        .await
        .with_context(|| format!("could not start a browser session at {}", config.webdriver_url))?;

    let orchestrator = Orchestrator::new(config.clone(), Arc::clone(&network));
    let handle = orchestrator.start(
        Box::new(session),
        RunRequest::new(args.ssid.clone(), args.password.clone()),
    )?;
    tracing::info!(run_id = %handle.id(), ssid = %args.ssid, "run started");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = std::io::stdout();
    let report = drive_run(handle, network.as_ref(), &config, &mut lines, &mut stdout).await?;

    if let Some(path) = &args.report {
        write_report(&report, path)?;
    }

    let mut reverted = false;
    if report.address_state.applied_by_us {
        reverted = offer_revert(network.as_ref(), &config, &mut lines, &mut stdout).await?;
    }
    if report.address_state.applied_by_us && !reverted {
        tracing::warn!(
            address = %config.static_address.address,
            adapter = %config.adapter_name,
            "exiting with the static address still applied; run `devprov revert` to restore DHCP"
        );
    }

    Ok(exit_code(&report.outcome))
}

/// Write `report` as pretty-printed JSON.
pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write run report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "run report written");
    Ok(())
}

/// Process exit code for a run outcome.
pub fn exit_code(outcome: &RunOutcome) -> u8 {
    match outcome {
        RunOutcome::Failed { .. } => 1,
        RunOutcome::Succeeded | RunOutcome::Cancelled { .. } => 0,
    }
}
