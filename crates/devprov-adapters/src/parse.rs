//! Parsers for `netsh` output.
//!
//! All parsers are line-oriented and tolerant: unrecognised lines are
//! skipped, and a missing value is `None` rather than an error.

use std::net::Ipv4Addr;

/// Network names from `netsh wlan show networks`, in listed order.
///
/// Matches `SSID <n> : <name>` lines; hidden networks (empty names) are
/// skipped.
pub fn parse_network_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let head = line.get(..5)?;
            if !head.eq_ignore_ascii_case("SSID ") {
                return None;
            }
            let (index, name) = line[5..].split_once(':')?;
            let index = index.trim();
            if index.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            let name = name.trim();
            (!name.is_empty()).then(|| name.to_string())
        })
        .collect()
}

/// First IPv4 address from `netsh interface ip show config`.
pub fn parse_ipv4_address(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "IP Address" {
            return None;
        }
        value.split_whitespace().next()?.parse().ok()
    })
}

/// Associated network from `netsh wlan show interfaces`.
///
/// Only the `SSID` line counts; `BSSID` and `AP BSSID` are ignored.
pub fn parse_connected_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim() != "SSID" {
            return None;
        }
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOW_NETWORKS: &str = "
Interface name : Wi-Fi
There are 3 networks currently visible.

SSID 1 : JuiceNet-4F2A
    Network type            : Infrastructure
    Authentication          : Open
    Encryption              : None

SSID 2 : 
    Network type            : Infrastructure
    Authentication          : WPA2-Personal

SSID 3 : Home Net: 5G
    Network type            : Infrastructure
    Authentication          : WPA2-Personal
    Encryption              : CCMP
";

    const SHOW_CONFIG: &str = "
Configuration for interface \"Wi-Fi\"
    DHCP enabled:                         Yes
    IP Address:                           192.168.1.37
    Subnet Prefix:                        192.168.1.0/24 (mask 255.255.255.0)
    Default Gateway:                      192.168.1.1
    Gateway Metric:                       0
";

    const SHOW_INTERFACES: &str = "
There is 1 interface on the system:

    Name                   : Wi-Fi
    Description            : Intel(R) Wi-Fi 6 AX201 160MHz
    State                  : connected
    SSID                   : JuiceNet-4F2A
    AP BSSID               : 3c:71:bf:4f:2a:01
    BSSID                  : 3c:71:bf:4f:2a:01
    Network type           : Infrastructure
";

    #[test]
    fn test_network_list_keeps_order_and_skips_hidden() {
        assert_eq!(
            parse_network_list(SHOW_NETWORKS),
            vec!["JuiceNet-4F2A".to_string(), "Home Net: 5G".to_string()]
        );
    }

    #[test]
    fn test_network_list_of_empty_scan() {
        assert!(parse_network_list("There are 0 networks currently visible.").is_empty());
    }

    #[test]
    fn test_address_is_first_ipv4() {
        assert_eq!(
            parse_ipv4_address(SHOW_CONFIG),
            Some(Ipv4Addr::new(192, 168, 1, 37))
        );
        assert_eq!(parse_ipv4_address("DHCP enabled: Yes"), None);
    }

    #[test]
    fn test_ssid_ignores_bssid_lines() {
        assert_eq!(
            parse_connected_ssid(SHOW_INTERFACES),
            Some("JuiceNet-4F2A".to_string())
        );
        let disconnected = "    State                  : disconnected\n    BSSID : aa:bb";
        assert_eq!(parse_connected_ssid(disconnected), None);
    }
}
