//! # netsh Network Service
//!
//! [`NetworkService`] over the Windows `netsh` tool. Commands go through a
//! [`CommandRunner`] so the command lines and output handling can be
//! exercised on any host; [`SystemRunner`] is the real process runner.
//!
//! ## Commands
//!
//! | Operation | Command |
//! |-----------|---------|
//! | scan | `netsh wlan show networks` |
//! | join | `netsh wlan add profile filename=<xml> user=current`, then `netsh wlan connect name=<ssid>` |
//! | status | `netsh interface ip show config name=<adapter>`, `netsh wlan show interfaces` |
//! | static | `netsh interface ip set address name=<adapter> static ...`, then `set dns ... static <dns> primary` |
//! | DHCP | `netsh interface ip set address name=<adapter> dhcp`, then `set dns name=<adapter> dhcp` |

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use devprov_core::{HostStatus, NetworkError, NetworkService, StaticAddress};

use crate::parse::{parse_connected_ssid, parse_ipv4_address, parse_network_list};
use crate::profile::wpa2_personal_profile;

const NETSH: &str = "netsh";

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Exit status rendered as text.
    pub status: String,
    /// Standard output, lossily decoded.
    pub stdout: String,
    /// Standard error, lossily decoded.
    pub stderr: String,
}

/// Runs an external program to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` and capture its output.
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, NetworkError>;
}

/// Runs commands as child processes of this one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, NetworkError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => NetworkError::CommandNotFound(program.to_string()),
                _ => NetworkError::Io(e),
            })?;
        Ok(CommandOutput {
            success: output.status.success(),
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Host wireless service backed by `netsh` on one adapter.
pub struct NetshNetworkService {
    adapter: String,
    runner: Arc<dyn CommandRunner>,
}

impl NetshNetworkService {
    /// Service for `adapter` using real child processes.
    pub fn new(adapter: impl Into<String>) -> Self {
        Self::with_runner(adapter, Arc::new(SystemRunner))
    }

    /// Service for `adapter` using a custom runner.
    pub fn with_runner(adapter: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            adapter: adapter.into(),
            runner,
        }
    }

    /// Name of the adapter this service manages.
    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    fn adapter_arg(&self) -> String {
        format!("name={}", self.adapter)
    }

    /// Run `netsh` and return its standard output, classifying failures.
    async fn netsh(&self, args: Vec<String>) -> Result<String, NetworkError> {
        let command = format!("{NETSH} {}", args.join(" "));
        tracing::debug!(command = %command, "running network command");
        let output = self.runner.run(NETSH, &args).await?;
        if output.success {
            return Ok(output.stdout);
        }
        if is_access_denied(&output) {
            return Err(NetworkError::AccessDenied { command });
        }
        let detail = if output.stderr.trim().is_empty() {
            output.stdout.trim().to_string()
        } else {
            output.stderr.trim().to_string()
        };
        Err(NetworkError::CommandFailed {
            command,
            status: output.status,
            stderr: detail,
        })
    }

    async fn connect(&self, ssid: &str) -> Result<(), NetworkError> {
        self.netsh(args(&["wlan", "connect", &format!("name={ssid}")]))
            .await
            .map(drop)
    }
}

fn is_access_denied(output: &CommandOutput) -> bool {
    [&output.stdout, &output.stderr]
        .iter()
        .any(|s| s.contains("Access is denied") || s.contains("requires elevation"))
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[async_trait]
impl NetworkService for NetshNetworkService {
    async fn list_wireless_networks(&self) -> Result<Vec<String>, NetworkError> {
        let out = self.netsh(args(&["wlan", "show", "networks"])).await?;
        Ok(parse_network_list(&out))
    }

    async fn join(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        if password.is_empty() {
            tracing::info!(ssid, "joining open network");
            return self.connect(ssid).await;
        }

        let mut profile = tempfile::Builder::new()
            .prefix("devprov-wlan-")
            .suffix(".xml")
            .tempfile()?;
        profile.write_all(wpa2_personal_profile(ssid, password).as_bytes())?;
        profile.flush()?;

        let added = self
            .netsh(vec![
                "wlan".into(),
                "add".into(),
                "profile".into(),
                format!("filename={}", profile.path().display()),
                "user=current".into(),
            ])
            .await;
        // The profile holds the passphrase in clear text.
        if let Err(e) = profile.close() {
            tracing::warn!(error = %e, "could not remove temporary WLAN profile");
        }
        added?;

        tracing::info!(ssid, "profile added, connecting");
        self.connect(ssid).await
    }

    async fn current_status(&self) -> Result<HostStatus, NetworkError> {
        let config = self
            .netsh(vec![
                "interface".into(),
                "ip".into(),
                "show".into(),
                "config".into(),
                self.adapter_arg(),
            ])
            .await?;
        let interfaces = self.netsh(args(&["wlan", "show", "interfaces"])).await?;
        Ok(HostStatus {
            address: parse_ipv4_address(&config),
            ssid: parse_connected_ssid(&interfaces),
        })
    }

    async fn set_static_address(&self, config: &StaticAddress) -> Result<(), NetworkError> {
        self.netsh(vec![
            "interface".into(),
            "ip".into(),
            "set".into(),
            "address".into(),
            self.adapter_arg(),
            "static".into(),
            config.address.to_string(),
            config.mask.to_string(),
            config.gateway.to_string(),
        ])
        .await?;
        self.netsh(vec![
            "interface".into(),
            "ip".into(),
            "set".into(),
            "dns".into(),
            self.adapter_arg(),
            "static".into(),
            config.dns.to_string(),
            "primary".into(),
        ])
        .await?;
        tracing::info!(adapter = %self.adapter, address = %config.address, "static address applied");
        Ok(())
    }

    async fn clear_to_dhcp(&self) -> Result<(), NetworkError> {
        for setting in ["address", "dns"] {
            self.netsh(vec![
                "interface".into(),
                "ip".into(),
                "set".into(),
                setting.into(),
                self.adapter_arg(),
                "dhcp".into(),
            ])
            .await?;
        }
        tracing::info!(adapter = %self.adapter, "adapter returned to DHCP");
        Ok(())
    }
}
