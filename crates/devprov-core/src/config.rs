//! # Provisioning Configuration
//!
//! Everything a run needs that is not typed by the operator: the device URL
//! and console command, the device network naming prefix, the host adapter
//! and static address block, the device UI affordance map, every lookup
//! timeout and settle delay, and the cache sweep retry budget.
//!
//! ## Sources
//!
//! Later sources override earlier ones:
//!
//! 1. Built-in defaults matching the device firmware.
//! 2. An optional YAML file. Every key is optional; durations are integer
//!    milliseconds under `*_ms` keys.
//! 3. Environment variables:
//!    - `DEVPROV_DEVICE_URL`
//!    - `DEVPROV_CONSOLE_COMMAND`
//!    - `DEVPROV_SSID_PREFIX`
//!    - `DEVPROV_ADAPTER`
//!    - `DEVPROV_WEBDRIVER_URL`
//!    - `DEVPROV_SNAPSHOT_DIR`
//!    - `DEVPROV_JOIN_SETTLE_SECS`
//!    - `DEVPROV_MAX_ATTEMPTS`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::driver::Locator;
use crate::network::StaticAddress;

// ─── Top-Level Configuration ─────────────────────────────────────────

/// Static input for a provisioning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Device configuration URL.
    pub device_url: String,
    /// Command submitted to the device console in the final phase.
    pub console_command: String,
    /// Name prefix of the device's own wireless network.
    pub device_ssid_prefix: String,
    /// Name of the host's wireless adapter.
    pub adapter_name: String,
    /// Static address block applied to the host while on the device network.
    pub static_address: StaticAddress,
    /// WebDriver endpoint the browser session is created on.
    pub webdriver_url: String,
    /// Browser requested from the WebDriver endpoint, if any.
    pub browser: Option<String>,
    /// Directory diagnostic snapshots are written to.
    pub snapshot_dir: PathBuf,
    /// Device UI affordances.
    pub ui: DeviceUiMap,
    /// Lookup timeouts per affordance.
    pub timeouts: LookupTimeouts,
    /// Fixed settle delays.
    pub delays: SettleDelays,
    /// Cache sweep retry budget.
    pub retry: RetrySettings,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            device_url: "http://setup.com".to_string(),
            console_command: "dfuu -i wlan --multi".to_string(),
            device_ssid_prefix: "JuiceNet".to_string(),
            adapter_name: "Wi-Fi".to_string(),
            static_address: StaticAddress::default(),
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            browser: Some("MicrosoftEdge".to_string()),
            snapshot_dir: PathBuf::from("snapshots"),
            ui: DeviceUiMap::default(),
            timeouts: LookupTimeouts::default(),
            delays: SettleDelays::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl ProvisionConfig {
    /// Load configuration: defaults, then the optional YAML file, then the
    /// process environment. The result is validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Parse YAML text. Missing keys keep their defaults.
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply environment-style overrides resolved through `lookup`.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(v) = lookup("DEVPROV_DEVICE_URL") {
            self.device_url = v;
        }
        if let Some(v) = lookup("DEVPROV_CONSOLE_COMMAND") {
            self.console_command = v;
        }
        if let Some(v) = lookup("DEVPROV_SSID_PREFIX") {
            self.device_ssid_prefix = v;
        }
        if let Some(v) = lookup("DEVPROV_ADAPTER") {
            self.adapter_name = v;
        }
        if let Some(v) = lookup("DEVPROV_WEBDRIVER_URL") {
            self.webdriver_url = v;
        }
        if let Some(v) = lookup("DEVPROV_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("DEVPROV_JOIN_SETTLE_SECS") {
            let secs: u64 = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DEVPROV_JOIN_SETTLE_SECS".to_string(),
                value: v.clone(),
            })?;
            self.delays.join_settle = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("DEVPROV_MAX_ATTEMPTS") {
            self.retry.max_attempts = v.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DEVPROV_MAX_ATTEMPTS".to_string(),
                value: v.clone(),
            })?;
        }
        Ok(())
    }

    /// Reject values no run could succeed with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.console_command.trim().is_empty() {
            return Err(invalid("console_command", "must not be empty"));
        }
        if self.device_ssid_prefix.is_empty() {
            return Err(invalid("device_ssid_prefix", "must not be empty"));
        }
        if self.adapter_name.trim().is_empty() {
            return Err(invalid("adapter_name", "must not be empty"));
        }
        let block = &self.static_address;
        let mask = u32::from(block.mask);
        if mask.leading_ones() + mask.trailing_zeros() != 32 || mask == 0 {
            return Err(invalid("static_address.mask", "not a contiguous netmask"));
        }
        if u32::from(block.address) & mask != u32::from(block.gateway) & mask {
            return Err(invalid(
                "static_address.gateway",
                "not in the same subnet as the address",
            ));
        }
        if block.address == block.gateway {
            return Err(invalid("static_address.address", "equals the gateway"));
        }
        for (field, value) in [
            ("device_url", &self.device_url),
            ("webdriver_url", &self.webdriver_url),
        ] {
            if !(value.starts_with("http://") || value.starts_with("https://")) {
                return Err(invalid(field, "must be an http(s) URL"));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

// ─── Device UI Affordances ───────────────────────────────────────────

/// The fixed affordances of the device web interface.
///
/// Parameterised locators are XPath templates; `{ssid}`, `{data_id}`,
/// `{href_prefix}` and `{text_prefix}` are replaced with quoted XPath
/// string literals before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceUiMap {
    /// Navigation entry opening the file listing.
    pub files_link: Locator,
    /// Name prefix of stale cache files.
    pub cache_file_prefix: String,
    /// Template matching every deletable stale cache entry.
    pub cache_entry_template: String,
    /// Template matching the delete control of one entry.
    pub delete_control_template: String,
    /// Confirmation button of the delete modal.
    pub delete_confirm: Locator,
    /// Navigation entry opening the network page.
    pub connect_link: Locator,
    /// Container of the scanned network list.
    pub network_list: Locator,
    /// Template matching one network entry by exact name.
    pub network_entry_template: String,
    /// Password input revealed after selecting a network.
    pub password_field: Locator,
    /// Control that saves the credential and starts the join.
    pub join_button: Locator,
    /// Navigation entry opening the console.
    pub console_link: Locator,
    /// Console command input.
    pub console_input: Locator,
}

impl Default for DeviceUiMap {
    fn default() -> Self {
        Self {
            files_link: Locator::XPath("//a[contains(.,'Files')]".to_string()),
            cache_file_prefix: "ECache_".to_string(),
            cache_entry_template: "//div[contains(@class, 'file') and contains(@class, 'fs-file') \
                and contains(@class, 'deletable') and .//a[starts-with(@href, {href_prefix}) \
                or starts-with(text(), {text_prefix})]]"
                .to_string(),
            delete_control_template: "//div[@class='status' and @data-id={data_id}]".to_string(),
            delete_confirm: Locator::XPath(
                "//button[contains(@class, 'modal-primary') and contains(text(), 'Delete')]"
                    .to_string(),
            ),
            connect_link: Locator::LinkText("Connect".to_string()),
            network_list: Locator::ClassName("networks".to_string()),
            network_entry_template: "//div[@class='network']/div[@class='ssid'][text()={ssid}]\
                /ancestor::div[@class='network']"
                .to_string(),
            password_field: Locator::Css("input[name='password'][type='password']".to_string()),
            join_button: Locator::Css("button.btn.btn-lg.save".to_string()),
            console_link: Locator::LinkText("Console".to_string()),
            console_input: Locator::ClassName("cmdline".to_string()),
        }
    }
}

impl DeviceUiMap {
    /// Locator for every deletable stale cache entry on the file listing.
    pub fn cache_entries(&self, device_url: &str) -> Locator {
        let href_prefix = format!(
            "{}/{}",
            device_url.trim_end_matches('/'),
            self.cache_file_prefix
        );
        Locator::XPath(
            self.cache_entry_template
                .replace("{href_prefix}", &xpath_literal(&href_prefix))
                .replace("{text_prefix}", &xpath_literal(&self.cache_file_prefix)),
        )
    }

    /// Locator for the delete control of the entry with `data_id`.
    pub fn delete_control(&self, data_id: &str) -> Locator {
        Locator::XPath(
            self.delete_control_template
                .replace("{data_id}", &xpath_literal(data_id)),
        )
    }

    /// Locator for the network entry whose name is exactly `ssid`.
    pub fn network_entry(&self, ssid: &str) -> Locator {
        Locator::XPath(
            self.network_entry_template
                .replace("{ssid}", &xpath_literal(ssid)),
        )
    }
}

/// Quote `value` as an XPath 1.0 string literal.
///
/// XPath has no escape sequences, so a value containing both quote kinds
/// is assembled with `concat()`.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    let parts: Vec<String> = value
        .split('\'')
        .map(|part| format!("'{part}'"))
        .collect();
    format!("concat({})", parts.join(", \"'\", "))
}

// ─── Timing ──────────────────────────────────────────────────────────

/// How long each affordance may take to become actionable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupTimeouts {
    #[serde(rename = "files_link_ms", with = "duration_ms")]
    pub files_link: Duration,
    #[serde(rename = "delete_control_ms", with = "duration_ms")]
    pub delete_control: Duration,
    #[serde(rename = "delete_confirm_ms", with = "duration_ms")]
    pub delete_confirm: Duration,
    #[serde(rename = "connect_link_ms", with = "duration_ms")]
    pub connect_link: Duration,
    #[serde(rename = "network_list_ms", with = "duration_ms")]
    pub network_list: Duration,
    #[serde(rename = "target_network_ms", with = "duration_ms")]
    pub target_network: Duration,
    #[serde(rename = "password_field_ms", with = "duration_ms")]
    pub password_field: Duration,
    #[serde(rename = "join_button_ms", with = "duration_ms")]
    pub join_button: Duration,
    #[serde(rename = "console_link_ms", with = "duration_ms")]
    pub console_link: Duration,
    #[serde(rename = "console_input_ms", with = "duration_ms")]
    pub console_input: Duration,
}

impl Default for LookupTimeouts {
    fn default() -> Self {
        Self {
            files_link: Duration::from_secs(20),
            delete_control: Duration::from_secs(5),
            delete_confirm: Duration::from_secs(10),
            connect_link: Duration::from_secs(10),
            network_list: Duration::from_secs(15),
            target_network: Duration::from_secs(20),
            password_field: Duration::from_secs(10),
            join_button: Duration::from_secs(10),
            console_link: Duration::from_secs(30),
            console_input: Duration::from_secs(10),
        }
    }
}

/// Fixed waits inserted where the device offers no readiness signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleDelays {
    /// After clicking a navigation entry.
    #[serde(rename = "after_navigation_ms", with = "duration_ms")]
    pub after_navigation: Duration,
    /// Before each cache sweep attempt.
    #[serde(rename = "before_attempt_ms", with = "duration_ms")]
    pub before_attempt: Duration,
    /// After a confirmed deletion, while the listing re-renders.
    #[serde(rename = "after_delete_ms", with = "duration_ms")]
    pub after_delete: Duration,
    /// After selecting the target network, while the password field appears.
    #[serde(rename = "after_network_select_ms", with = "duration_ms")]
    pub after_network_select: Duration,
    /// After initiating the device join; the device may reboot.
    #[serde(rename = "join_settle_ms", with = "duration_ms")]
    pub join_settle: Duration,
    /// After applying the static address.
    #[serde(rename = "static_settle_ms", with = "duration_ms")]
    pub static_settle: Duration,
    /// After reloading the device page.
    #[serde(rename = "reload_settle_ms", with = "duration_ms")]
    pub reload_settle: Duration,
    /// After submitting the console command.
    #[serde(rename = "after_command_ms", with = "duration_ms")]
    pub after_command: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            after_navigation: Duration::from_secs(2),
            before_attempt: Duration::from_millis(500),
            after_delete: Duration::from_secs(3),
            after_network_select: Duration::from_secs(2),
            join_settle: Duration::from_secs(90),
            static_settle: Duration::from_secs(5),
            reload_settle: Duration::from_secs(5),
            after_command: Duration::from_secs(5),
        }
    }
}

impl SettleDelays {
    /// All delays zero. Used by tests and dry runs against fakes.
    pub fn none() -> Self {
        Self {
            after_navigation: Duration::ZERO,
            before_attempt: Duration::ZERO,
            after_delete: Duration::ZERO,
            after_network_select: Duration::ZERO,
            join_settle: Duration::ZERO,
            static_settle: Duration::ZERO,
            reload_settle: Duration::ZERO,
            after_command: Duration::ZERO,
        }
    }
}

/// Cache sweep retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Maximum number of attempts, successful or not.
    pub max_attempts: u32,
    /// Upper bound on a single attempt.
    #[serde(rename = "attempt_timeout_ms", with = "duration_ms")]
    pub attempt_timeout: Duration,
    /// Wait after a retryable failure.
    #[serde(rename = "inter_attempt_delay_ms", with = "duration_ms")]
    pub inter_attempt_delay: Duration,
    /// Upper bound on the whole loop, if any.
    #[serde(rename = "overall_timeout_ms", with = "option_duration_ms")]
    pub overall_timeout: Option<Duration>,
    /// Capture a snapshot on every retryable failure.
    pub snapshot_on_retry: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            attempt_timeout: Duration::from_secs(30),
            inter_attempt_delay: Duration::from_secs(1),
            overall_timeout: None,
            snapshot_on_retry: true,
        }
    }
}

// ─── Secrets ─────────────────────────────────────────────────────────

/// A credential that never appears in `Debug` output or logs.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Secret(String);

impl Secret {
    /// Wrap a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw credential, for handing to the capability that needs it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the credential is empty (open network).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

// ─── Serde Helpers ───────────────────────────────────────────────────

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        ProvisionConfig::default().validate().unwrap();
    }

    #[test]
    fn test_empty_yaml_yields_defaults() {
        let cfg = ProvisionConfig::from_yaml_str("").unwrap();
        assert_eq!(cfg, ProvisionConfig::default());
    }

    #[test]
    fn test_partial_yaml_overrides_only_named_keys() {
        let yaml = r#"
device_url: "http://192.168.4.1"
delays:
  join_settle_ms: 1500
retry:
  max_attempts: 7
  overall_timeout_ms: 60000
"#;
        let cfg = ProvisionConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.device_url, "http://192.168.4.1");
        assert_eq!(cfg.delays.join_settle, Duration::from_millis(1500));
        assert_eq!(cfg.delays.after_delete, Duration::from_secs(3));
        assert_eq!(cfg.retry.max_attempts, 7);
        assert_eq!(cfg.retry.overall_timeout, Some(Duration::from_secs(60)));
        assert_eq!(cfg.console_command, "dfuu -i wlan --multi");
    }

    #[test]
    fn test_yaml_file_is_read_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_ssid_prefix: \"EVSE-\"").unwrap();
        let cfg = ProvisionConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(cfg.device_ssid_prefix, "EVSE-");
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = ProvisionConfig::from_yaml_file(Path::new("/nonexistent/devprov.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/devprov.yaml"));
    }

    #[test]
    fn test_overrides_apply_and_reject_garbage() {
        let vars: HashMap<&str, &str> = [
            ("DEVPROV_CONSOLE_COMMAND", "reboot"),
            ("DEVPROV_JOIN_SETTLE_SECS", "12"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ProvisionConfig::default();
        cfg.apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.console_command, "reboot");
        assert_eq!(cfg.delays.join_settle, Duration::from_secs(12));

        let mut cfg = ProvisionConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == "DEVPROV_MAX_ATTEMPTS").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_budget_and_empty_prefix() {
        let mut cfg = ProvisionConfig::default();
        cfg.retry.max_attempts = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ProvisionConfig::default();
        cfg.device_ssid_prefix.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = ProvisionConfig::default();
        cfg.device_url = "setup.com".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inconsistent_static_block() {
        let yaml = r#"
static_address:
  address: "10.10.10.2"
  mask: "255.0.255.0"
  gateway: "10.10.10.1"
  dns: "10.10.10.1"
"#;
        let cfg = ProvisionConfig::from_yaml_str(yaml).unwrap();
        assert!(cfg.validate().is_err());

        let mut cfg = ProvisionConfig::default();
        cfg.static_address.gateway = "192.168.1.1".parse().unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_malformed_dotted_quad_fails_to_parse() {
        let yaml = r#"
static_address:
  address: "10.10.10.256"
  mask: "255.255.255.0"
  gateway: "10.10.10.1"
  dns: "10.10.10.1"
"#;
        assert!(matches!(
            ProvisionConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_network_entry_is_exact_match() {
        let ui = DeviceUiMap::default();
        match ui.network_entry("HomeNet") {
            Locator::XPath(x) => {
                assert!(x.contains("[text()='HomeNet']"));
                assert!(!x.contains("contains("));
            }
            other => panic!("expected xpath, got {other:?}"),
        }
    }

    #[test]
    fn test_cache_entries_embed_device_url() {
        let ui = DeviceUiMap::default();
        match ui.cache_entries("http://setup.com/") {
            Locator::XPath(x) => {
                assert!(x.contains("starts-with(@href, 'http://setup.com/ECache_')"));
                assert!(x.contains("starts-with(text(), 'ECache_')"));
            }
            other => panic!("expected xpath, got {other:?}"),
        }
    }

    #[test]
    fn test_xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("Home"), "'Home'");
        assert_eq!(xpath_literal("Bob's"), "\"Bob's\"");
        assert_eq!(
            xpath_literal(r#"a'b"c"#),
            r#"concat('a', "'", 'b"c')"#
        );
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let s = Secret::new("secret123");
        assert_eq!(format!("{s:?}"), "[REDACTED]");
        assert_eq!(s.expose(), "secret123");
    }
}
