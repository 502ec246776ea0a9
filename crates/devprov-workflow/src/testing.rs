//! Simulated device file listing for unit tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use devprov_core::{DeviceUiDriver, DeviceUiMap, DriverError, ElementRef, Locator};

/// A file listing whose entries disappear once their deletion is confirmed.
pub(crate) struct FakeListing {
    entries: Mutex<Vec<String>>,
    faults: Mutex<VecDeque<DriverError>>,
    pending: Mutex<Option<String>>,
    snapshots: Mutex<Vec<String>>,
    confirm: Locator,
}

impl FakeListing {
    pub(crate) fn new(ids: &[&str]) -> Self {
        Self {
            entries: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
            faults: Mutex::new(VecDeque::new()),
            pending: Mutex::new(None),
            snapshots: Mutex::new(Vec::new()),
            confirm: DeviceUiMap::default().delete_confirm,
        }
    }

    /// Fail the next click with `err`.
    pub(crate) fn fail_next_click(&self, err: DriverError) {
        self.faults.lock().push_back(err);
    }

    pub(crate) fn remaining(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn snapshots(&self) -> Vec<String> {
        self.snapshots.lock().clone()
    }

    fn data_id_in(locator: &Locator) -> Option<String> {
        let Locator::XPath(x) = locator else {
            return None;
        };
        let start = x.find("@data-id='")? + "@data-id='".len();
        let len = x[start..].find('\'')?;
        Some(x[start..start + len].to_string())
    }
}

#[async_trait]
impl DeviceUiDriver for FakeListing {
    async fn open(&self, _url: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn refresh(&self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError> {
        match locator {
            Locator::XPath(x) if x.contains("fs-file") => Ok(self
                .entries
                .lock()
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
        let timed_out = || DriverError::Timeout {
            locator: locator.to_string(),
            after: timeout,
        };
        if *locator == self.confirm {
            if self.pending.lock().is_some() {
                return Ok(ElementRef("confirm".into()));
            }
            return Err(timed_out());
        }
        match Self::data_id_in(locator) {
            Some(id) if self.entries.lock().contains(&id) => Ok(ElementRef(format!("delete:{id}"))),
            _ => Err(timed_out()),
        }
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
        let Some(id) = element.id().strip_prefix("entry:") else {
            return Ok(None);
        };
        if !self.entries.lock().iter().any(|e| e == id) {
            return Err(DriverError::StaleElement(element.id().to_string()));
        }
        Ok((name == "data-id").then(|| id.to_string()))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), DriverError> {
        if let Some(err) = self.faults.lock().pop_front() {
            return Err(err);
        }
        if let Some(id) = element.id().strip_prefix("delete:") {
            *self.pending.lock() = Some(id.to_string());
        } else if element.id() == "confirm" {
            if let Some(id) = self.pending.lock().take() {
                self.entries.lock().retain(|e| *e != id);
            }
        }
        Ok(())
    }

    async fn clear(&self, _element: &ElementRef) -> Result<(), DriverError> {
        Ok(())
    }

    async fn type_text(&self, _element: &ElementRef, _text: &str) -> Result<(), DriverError> {
        Ok(())
    }

    async fn submit_enter(&self, _element: &ElementRef) -> Result<(), DriverError> {
        Ok(())
    }

    async fn snapshot(&self, label: &str) -> Result<(), DriverError> {
        self.snapshots.lock().push(label.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        Ok(())
    }
}
