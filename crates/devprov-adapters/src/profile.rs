//! WLAN profile documents for `netsh wlan add profile`.

use std::fmt::Write;

/// A WPA2-Personal (AES) profile for `ssid` that connects automatically.
pub fn wpa2_personal_profile(ssid: &str, passphrase: &str) -> String {
    let name = xml_escape(ssid);
    format!(
        r#"<?xml version="1.0"?>
<WLANProfile xmlns="http://www.microsoft.com/networking/WLAN/profile/v1">
    <name>{name}</name>
    <SSIDConfig>
        <SSID>
            <hex>{hex}</hex>
            <name>{name}</name>
        </SSID>
    </SSIDConfig>
    <connectionType>ESS</connectionType>
    <connectionMode>auto</connectionMode>
    <MSM>
        <security>
            <authAndCiphers>
                <authentication>WPA2PSK</authentication>
                <encryption>AES</encryption>
                <useOneX>false</useOneX>
            </authAndCiphers>
            <sharedKey>
                <keyType>passPhrase</keyType>
                <protected>false</protected>
                <keyMaterial>{key}</keyMaterial>
            </sharedKey>
        </security>
    </MSM>
</WLANProfile>
"#,
        hex = ssid_hex(ssid),
        key = xml_escape(passphrase),
    )
}

/// Upper-case hex of the SSID's bytes.
pub fn ssid_hex(ssid: &str) -> String {
    ssid.bytes().fold(String::with_capacity(ssid.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02X}");
        out
    })
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
