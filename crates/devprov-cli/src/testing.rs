//! Scripted host network and browser for handler tests.

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use devprov_core::{
    DeviceUiDriver, DriverError, ElementRef, HostStatus, Locator, NetworkError, NetworkService,
    StaticAddress,
};

/// A host whose association and address change as commands are issued.
#[derive(Default)]
pub(crate) struct FakeHost {
    pub status: Mutex<HostStatus>,
    pub visible: Vec<String>,
    pub calls: Mutex<Vec<String>>,
    /// Address left in place after `clear_to_dhcp`.
    pub sticky_address: bool,
    pub status_fails: bool,
}

impl FakeHost {
    pub fn on(ssid: &str) -> Self {
        Self {
            status: Mutex::new(HostStatus {
                address: Some(Ipv4Addr::new(192, 168, 4, 20)),
                ssid: Some(ssid.to_string()),
            }),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl NetworkService for FakeHost {
    async fn list_wireless_networks(&self) -> Result<Vec<String>, NetworkError> {
        self.calls.lock().push("scan".into());
        Ok(self.visible.clone())
    }

    async fn join(&self, ssid: &str, password: &str) -> Result<(), NetworkError> {
        self.calls.lock().push(format!("join {ssid} {}", !password.is_empty()));
        self.status.lock().ssid = Some(ssid.to_string());
        Ok(())
    }

    async fn current_status(&self) -> Result<HostStatus, NetworkError> {
        if self.status_fails {
            return Err(NetworkError::CommandNotFound("netsh".into()));
        }
        Ok(self.status.lock().clone())
    }

    async fn set_static_address(&self, config: &StaticAddress) -> Result<(), NetworkError> {
        self.calls.lock().push("static".into());
        self.status.lock().address = Some(config.address);
        Ok(())
    }

    async fn clear_to_dhcp(&self) -> Result<(), NetworkError> {
        self.calls.lock().push("dhcp".into());
        if !self.sticky_address {
            self.status.lock().address = Some(Ipv4Addr::new(192, 168, 4, 21));
        }
        Ok(())
    }
}

/// A browser whose session is already gone.
pub(crate) struct DeadBrowser;

fn gone<T>() -> Result<T, DriverError> {
    Err(DriverError::Session("browser window closed".into()))
}

#[async_trait]
impl DeviceUiDriver for DeadBrowser {
    async fn open(&self, _url: &str) -> Result<(), DriverError> {
        gone()
    }
    async fn refresh(&self) -> Result<(), DriverError> {
        gone()
    }
    async fn find_all(&self, _locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        gone()
    }
    async fn wait_clickable(&self, _l: &Locator, _t: Duration) -> Result<ElementRef, DriverError> {
        gone()
    }
    async fn wait_visible(&self, _l: &Locator, _t: Duration) -> Result<ElementRef, DriverError> {
        gone()
    }
    async fn wait_present(&self, _l: &Locator, _t: Duration) -> Result<ElementRef, DriverError> {
        gone()
    }
    async fn attribute(&self, _e: &ElementRef, _n: &str) -> Result<Option<String>, DriverError> {
        gone()
    }
    async fn click(&self, _e: &ElementRef) -> Result<(), DriverError> {
        gone()
    }
    async fn clear(&self, _e: &ElementRef) -> Result<(), DriverError> {
        gone()
    }
    async fn type_text(&self, _e: &ElementRef, _text: &str) -> Result<(), DriverError> {
        gone()
    }
    async fn submit_enter(&self, _e: &ElementRef) -> Result<(), DriverError> {
        gone()
    }
    async fn snapshot(&self, _label: &str) -> Result<(), DriverError> {
        gone()
    }
    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
