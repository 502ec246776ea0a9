//! # Host Network Subcommands
//!
//! One-shot wireless chores on the operator machine: scan, show status,
//! join, and switch the adapter between the static address and DHCP.
//!
//! Address changes are refused unless the host is associated with a
//! network matching the device SSID prefix, so an unrelated network's
//! configuration is never touched.

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use devprov_core::{AddressState, HostStatus, NetworkService, ProvisionConfig};

/// Print the visible wireless networks, one per line.
pub async fn cmd_networks(network: &dyn NetworkService, out: &mut dyn Write) -> Result<u8> {
    let names = network
        .list_wireless_networks()
        .await
        .context("failed to scan wireless networks")?;
    if names.is_empty() {
        writeln!(out, "No wireless networks visible.")?;
        return Ok(0);
    }
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(0)
}

/// Print the host address and associated network.
pub async fn cmd_status(
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    out: &mut dyn Write,
) -> Result<u8> {
    let status = network
        .current_status()
        .await
        .context("failed to read host network status")?;
    write_status(&status, config, out)?;
    Ok(0)
}

pub(crate) fn write_status(
    status: &HostStatus,
    config: &ProvisionConfig,
    out: &mut dyn Write,
) -> Result<()> {
    let marker = if status.is_on_device_network(&config.device_ssid_prefix) {
        " (device network)"
    } else {
        ""
    };
    writeln!(out, "Adapter:  {}", config.adapter_name)?;
    writeln!(out, "SSID:     {}{marker}", status.ssid_or_na())?;
    writeln!(out, "Address:  {}", status.address_or_na())?;
    Ok(())
}

/// Join the host to `ssid`. An empty password joins an open network.
pub async fn cmd_connect(
    network: &dyn NetworkService,
    ssid: &str,
    password: &str,
    out: &mut dyn Write,
) -> Result<u8> {
    if ssid.trim().is_empty() {
        bail!("network name must not be empty");
    }
    network
        .join(ssid, password)
        .await
        .with_context(|| format!("failed to join '{ssid}'"))?;
    writeln!(out, "Connection to '{ssid}' requested.")?;
    Ok(0)
}

/// Fail unless the host is on a device network; returns the status read.
pub async fn require_device_network(
    network: &dyn NetworkService,
    prefix: &str,
) -> Result<HostStatus> {
    let status = network
        .current_status()
        .await
        .context("failed to read host network status")?;
    if !status.is_on_device_network(prefix) {
        bail!(
            "host is connected to '{}'; address changes are only allowed on networks starting with '{prefix}'",
            status.ssid_or_na()
        );
    }
    Ok(status)
}

/// Apply the configured static address.
pub async fn cmd_static(
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    out: &mut dyn Write,
) -> Result<AddressState> {
    let status = require_device_network(network, &config.device_ssid_prefix).await?;
    let addr = &config.static_address;
    tracing::info!(ssid = status.ssid_or_na(), address = %addr.address, "applying static address");
    network
        .set_static_address(addr)
        .await
        .context("failed to apply static address")?;
    writeln!(
        out,
        "'{}' set to static {} (mask {}, gateway {}, DNS {}).",
        config.adapter_name, addr.address, addr.mask, addr.gateway, addr.dns
    )?;
    Ok(AddressState {
        applied_by_us: true,
    })
}

/// Return the adapter to DHCP and check that the static address is gone.
///
/// The check reads the status again after `settle`; an address still equal
/// to the static address is reported as a warning, not an error.
pub async fn cmd_revert(
    network: &dyn NetworkService,
    config: &ProvisionConfig,
    settle: Duration,
    out: &mut dyn Write,
) -> Result<AddressState> {
    require_device_network(network, &config.device_ssid_prefix).await?;
    network
        .clear_to_dhcp()
        .await
        .context("failed to revert adapter to DHCP")?;
    writeln!(out, "Revert to DHCP requested for '{}'.", config.adapter_name)?;

    tokio::time::sleep(settle).await;
    match network.current_status().await {
        Ok(status) if status.address == Some(config.static_address.address) => {
            tracing::warn!(address = %config.static_address.address, "address unchanged after revert");
            writeln!(
                out,
                "Warning: address is still {}; the revert may have failed.",
                config.static_address.address
            )?;
        }
        Ok(status) => {
            writeln!(out, "Address is now {}.", status.address_or_na())?;
        }
        Err(e) => {
            tracing::warn!(error = %e, "could not verify revert");
            writeln!(out, "Warning: could not verify the revert: {e}")?;
        }
    }
    Ok(AddressState::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    fn text(buf: Vec<u8>) -> String {
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn test_networks_prints_each_name() {
        let host = FakeHost {
            visible: vec!["HomeNet".into(), "JuiceNet-4F2A".into()],
            ..FakeHost::default()
        };
        let mut out = Vec::new();
        assert_eq!(cmd_networks(&host, &mut out).await.unwrap(), 0);
        assert_eq!(text(out), "HomeNet\nJuiceNet-4F2A\n");
    }

    #[tokio::test]
    async fn test_status_marks_device_network() {
        let host = FakeHost::on("JuiceNet-4F2A");
        let mut out = Vec::new();
        cmd_status(&host, &ProvisionConfig::default(), &mut out).await.unwrap();
        let out = text(out);
        assert!(out.contains("JuiceNet-4F2A (device network)"));
        assert!(out.contains("192.168.4.20"));
    }

    #[tokio::test]
    async fn test_connect_passes_password_through() {
        let host = FakeHost::default();
        let mut out = Vec::new();
        cmd_connect(&host, "HomeNet", "secret", &mut out).await.unwrap();
        assert_eq!(host.calls(), vec!["join HomeNet true"]);
    }

    #[tokio::test]
    async fn test_static_refused_off_device_network() {
        let host = FakeHost::on("CoffeeShopWifi");
        let mut out = Vec::new();
        let err = cmd_static(&host, &ProvisionConfig::default(), &mut out)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CoffeeShopWifi"));
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_static_on_device_network_marks_state() {
        let host = FakeHost::on("JuiceNet-4F2A");
        let mut out = Vec::new();
        let state = cmd_static(&host, &ProvisionConfig::default(), &mut out)
            .await
            .unwrap();
        assert!(state.applied_by_us);
        assert_eq!(host.calls(), vec!["static"]);
    }

    #[tokio::test]
    async fn test_revert_refused_off_device_network() {
        let host = FakeHost::on("HomeNet");
        let mut out = Vec::new();
        assert!(cmd_revert(&host, &ProvisionConfig::default(), Duration::ZERO, &mut out)
            .await
            .is_err());
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_revert_warns_when_address_sticks() {
        let config = ProvisionConfig::default();
        let host = FakeHost {
            sticky_address: true,
            ..FakeHost::on("JuiceNet-4F2A")
        };
        host.status.lock().address = Some(config.static_address.address);

        let mut out = Vec::new();
        let state = cmd_revert(&host, &config, Duration::ZERO, &mut out).await.unwrap();
        assert!(!state.applied_by_us);
        assert!(text(out).contains("still 10.10.10.2"));
    }

    #[tokio::test]
    async fn test_revert_reports_new_address() {
        let host = FakeHost::on("JuiceNet-4F2A");
        let mut out = Vec::new();
        cmd_revert(&host, &ProvisionConfig::default(), Duration::ZERO, &mut out)
            .await
            .unwrap();
        assert_eq!(host.calls(), vec!["dhcp"]);
        assert!(text(out).contains("Address is now 192.168.4.21"));
    }
}
