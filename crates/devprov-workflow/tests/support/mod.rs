//! Scripted fakes for the device UI and the host network.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use devprov_core::{
    DeviceUiDriver, DeviceUiMap, DriverError, ElementRef, HostStatus, Locator, NetworkError,
    NetworkService, ProvisionConfig, SettleDelays, StaticAddress,
};

/// Default configuration with every settle delay removed.
pub fn fast_config() -> ProvisionConfig {
    ProvisionConfig {
        delays: SettleDelays::none(),
        ..ProvisionConfig::default()
    }
}

// -- Device UI ----------------------------------------------------------------

#[derive(Default)]
struct Page {
    entries: Vec<String>,
    pending_delete: Option<String>,
    networks: Vec<String>,
    missing: HashSet<&'static str>,
    clicks: Vec<String>,
    typed: Vec<(String, String)>,
    entered: Vec<String>,
    snapshots: Vec<String>,
    opened: Vec<String>,
}

/// Simulated device web interface. Cache entries vanish once their
/// deletion is confirmed; network entries match by exact name.
#[derive(Clone)]
pub struct FakeDevice {
    ui: DeviceUiMap,
    page: Arc<Mutex<Page>>,
    closes: Arc<AtomicU32>,
}

impl FakeDevice {
    pub fn new(cache_entries: &[&str], networks: &[&str]) -> Self {
        let page = Page {
            entries: cache_entries.iter().map(|s| s.to_string()).collect(),
            networks: networks.iter().map(|s| s.to_string()).collect(),
            ..Page::default()
        };
        Self {
            ui: DeviceUiMap::default(),
            page: Arc::new(Mutex::new(page)),
            closes: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Make an affordance never appear (`files`, `connect`, `save`,
    /// `console`, ...).
    pub fn without(self, affordance: &'static str) -> Self {
        self.page.lock().missing.insert(affordance);
        self
    }

    pub fn boxed(&self) -> Box<dyn DeviceUiDriver> {
        Box::new(self.clone())
    }

    pub fn clicks(&self) -> Vec<String> {
        self.page.lock().clicks.clone()
    }

    pub fn clicks_on(&self, element: &str) -> usize {
        self.page.lock().clicks.iter().filter(|c| *c == element).count()
    }

    pub fn typed(&self) -> Vec<(String, String)> {
        self.page.lock().typed.clone()
    }

    pub fn entered(&self) -> Vec<String> {
        self.page.lock().entered.clone()
    }

    pub fn snapshots(&self) -> Vec<String> {
        self.page.lock().snapshots.clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.page.lock().opened.clone()
    }

    pub fn remaining_entries(&self) -> usize {
        self.page.lock().entries.len()
    }

    pub fn close_count(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Map a locator to the element it would find, if present.
    fn resolve(&self, locator: &Locator) -> Option<String> {
        let page = self.page.lock();
        let named = |name: &'static str| (!page.missing.contains(name)).then(|| name.to_string());

        if *locator == self.ui.files_link {
            return named("files");
        }
        if *locator == self.ui.delete_confirm {
            return page.pending_delete.as_ref().map(|_| "confirm".to_string());
        }
        if *locator == self.ui.connect_link {
            return named("connect");
        }
        if *locator == self.ui.network_list {
            return named("networks");
        }
        if *locator == self.ui.password_field {
            return named("password");
        }
        if *locator == self.ui.join_button {
            return named("save");
        }
        if *locator == self.ui.console_link {
            return named("console");
        }
        if *locator == self.ui.console_input {
            return named("cmdline");
        }
        let Locator::XPath(xpath) = locator else {
            return None;
        };
        if let Some(id) = quoted_after(xpath, "@data-id=") {
            return page
                .entries
                .contains(&id)
                .then(|| format!("delete:{id}"));
        }
        if let Some(ssid) = quoted_after(xpath, "text()=") {
            return page
                .networks
                .contains(&ssid)
                .then(|| format!("network:{ssid}"));
        }
        None
    }
}

/// The single-quoted literal following `marker` in `xpath`.
fn quoted_after(xpath: &str, marker: &str) -> Option<String> {
    let start = xpath.find(marker)? + marker.len();
    let rest = xpath[start..].strip_prefix('\'')?;
    let end = rest.find('\'')?;
    Some(rest[..end].to_string())
}

#[async_trait]
impl DeviceUiDriver for FakeDevice {
    async fn open(&self, url: &str) -> Result<(), DriverError> {
        self.page.lock().opened.push(url.to_string());
        Ok(())
    }

    async fn refresh(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        match locator {
            Locator::XPath(x) if x.contains("fs-file") => Ok(self
                .page
                .lock()
                .entries
                .iter()
                .map(|id| ElementRef(format!("entry:{id}")))
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.resolve(locator)
            .map(ElementRef)
            .ok_or_else(|| DriverError::Timeout {
                locator: locator.to_string(),
                after: timeout,
            })
    }

    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.wait_clickable(locator, timeout).await
    }

    async fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError> {
        self.wait_clickable(locator, timeout).await
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError> {
        Ok(element
            .id()
            .strip_prefix("entry:")
            .filter(|_| name == "data-id")
            .map(str::to_string))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        let mut page = self.page.lock();
        page.clicks.push(element.id().to_string());
        if let Some(id) = element.id().strip_prefix("delete:") {
            page.pending_delete = Some(id.to_string());
        } else if element.id() == "confirm" {
            if let Some(id) = page.pending_delete.take() {
                page.entries.retain(|e| *e != id);
            }
        }
        Ok(())
    }

    async fn clear(&self, _element: &ElementRef) -> Result<(), DriverError> {
        Ok(())
    }

    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError> {
        self.page
            .lock()
            .typed
            .push((element.id().to_string(), text.to_string()));
        Ok(())
    }

    async fn submit_enter(&self, element: &ElementRef) -> Result<(), DriverError> {
        self.page.lock().entered.push(element.id().to_string());
        Ok(())
    }

    async fn snapshot(&self, label: &str) -> Result<(), DriverError> {
        self.page.lock().snapshots.push(label.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -- Host Network -------------------------------------------------------------

#[derive(Default)]
struct HostState {
    ssid: Option<String>,
    status_error: bool,
    static_error: bool,
    static_calls: Vec<StaticAddress>,
    dhcp_calls: u32,
    joins: Vec<(String, String)>,
}

/// Host network whose association is fixed by the test.
#[derive(Clone, Default)]
pub struct FakeNetwork {
    state: Arc<Mutex<HostState>>,
}

impl FakeNetwork {
    pub fn on(ssid: &str) -> Self {
        let net = Self::default();
        net.state.lock().ssid = Some(ssid.to_string());
        net
    }

    pub fn unreadable() -> Self {
        let net = Self::default();
        net.state.lock().status_error = true;
        net
    }

    pub fn refusing_static(self) -> Self {
        self.state.lock().static_error = true;
        self
    }

    pub fn static_calls(&self) -> Vec<StaticAddress> {
        self.state.lock().static_calls.clone()
    }

    pub fn shared(&self) -> Arc<dyn NetworkService> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl NetworkService for FakeNetwork {
    async fn list_wireless_networks(&self) -> Result<Vec<String>, NetworkError> {
        Ok(self.state.lock().ssid.iter().cloned().collect())
    }

    async fn join(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        state.joins.push((ssid.to_string(), password.to_string()));
        state.ssid = Some(ssid.to_string());
        Ok(())
    }

    async fn current_status(&self) -> Result<HostStatus, NetworkError> {
        let state = self.state.lock();
        if state.status_error {
            return Err(NetworkError::CommandNotFound("netsh".into()));
        }
        Ok(HostStatus {
            address: Some(Ipv4Addr::new(192, 168, 1, 20)),
            ssid: state.ssid.clone(),
        })
    }

    async fn set_static_address(&self, config: &StaticAddress) -> Result<(), NetworkError> {
        let mut state = self.state.lock();
        if state.static_error {
            return Err(NetworkError::AccessDenied {
                command: "netsh interface ip set address".into(),
            });
        }
        state.static_calls.push(*config);
        Ok(())
    }

    async fn clear_to_dhcp(&self) -> Result<(), NetworkError> {
        self.state.lock().dhcp_calls += 1;
        Ok(())
    }
}
