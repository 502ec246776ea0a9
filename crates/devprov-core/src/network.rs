//! # Host Network Service Capability
//!
//! Operations on the operator machine's own wireless adapter: scanning,
//! joining, reading the current association, and switching the adapter
//! between a static address and DHCP. All calls are synchronous from the
//! caller's point of view and may take seconds.
//!
//! ## Safety Guard
//!
//! Address mutations are only legitimate while the host is associated with
//! the device's own network. [`HostStatus::is_on_device_network`] is the
//! single predicate every caller uses before mutating, so an unrelated
//! network's configuration is never touched.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current address and association of the host's wireless adapter.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostStatus {
    /// IPv4 address of the adapter, if it has one.
    pub address: Option<Ipv4Addr>,
    /// Name of the associated wireless network, if any.
    pub ssid: Option<String>,
}

impl HostStatus {
    /// Whether the host is associated with a network whose name starts
    /// with the device network prefix.
    pub fn is_on_device_network(&self, prefix: &str) -> bool {
        self.ssid
            .as_deref()
            .is_some_and(|ssid| matches_device_network(ssid, prefix))
    }

    /// Associated network name, or `N/A`.
    pub fn ssid_or_na(&self) -> &str {
        self.ssid.as_deref().unwrap_or("N/A")
    }

    /// Adapter address, or `N/A`.
    pub fn address_or_na(&self) -> String {
        self.address
            .map(|a| a.to_string())
            .unwrap_or_else(|| "N/A".to_string())
    }
}

/// Whether `ssid` follows the device network naming pattern.
///
/// An empty prefix matches nothing, so a misconfigured prefix can never
/// open the guard.
pub fn matches_device_network(ssid: &str, prefix: &str) -> bool {
    !prefix.is_empty() && ssid.starts_with(prefix)
}

/// A fixed IPv4 configuration for the host adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddress {
    /// Address assigned to the adapter.
    pub address: Ipv4Addr,
    /// Subnet mask.
    pub mask: Ipv4Addr,
    /// Default gateway.
    pub gateway: Ipv4Addr,
    /// Primary DNS server.
    pub dns: Ipv4Addr,
}

impl Default for StaticAddress {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(10, 10, 10, 2),
            mask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 10, 10, 1),
            dns: Ipv4Addr::new(10, 10, 10, 1),
        }
    }
}

/// Whether a static address applied by this process is still in place.
///
/// Passed into every run and handed back in its report, so the state
/// survives across runs without a process-wide flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AddressState {
    /// A static address was applied and has not been reverted.
    pub applied_by_us: bool,
}

/// Errors reported by a host network service.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// A network command exited unsuccessfully.
    #[error("`{command}` exited with {status}: {stderr}")]
    CommandFailed {
        /// The command line that was run.
        command: String,
        /// Exit status rendered as text.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The command was refused for lack of privileges.
    #[error("`{command}` was denied; run the tool from an elevated (administrator) shell")]
    AccessDenied {
        /// The command line that was run.
        command: String,
    },

    /// The network tool is not installed on this host.
    #[error("`{0}` not found; this network service requires a Windows host")]
    CommandNotFound(String),

    /// Command output could not be interpreted.
    #[error("could not parse output of `{command}`: {detail}")]
    Parse {
        /// The command line that was run.
        command: String,
        /// What was wrong with the output.
        detail: String,
    },

    /// Local I/O failure (temporary files, process spawning).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host wireless network capability.
#[async_trait]
pub trait NetworkService: Send + Sync {
    /// Names of the visible wireless networks, in scan order.
    async fn list_wireless_networks(&self) -> Result<Vec<String>, NetworkError>;

    /// Join the host to `ssid`. An empty password joins an open network.
    async fn join(&self, ssid: &str, password: &str) -> Result<(), NetworkError>;

    /// Current adapter address and associated network.
    async fn current_status(&self) -> Result<HostStatus, NetworkError>;

    /// Assign a fixed address, mask, gateway and DNS server to the adapter.
    async fn set_static_address(&self, config: &StaticAddress) -> Result<(), NetworkError>;

    /// Return the adapter to DHCP for both address and DNS.
    async fn clear_to_dhcp(&self) -> Result<(), NetworkError>;
}
