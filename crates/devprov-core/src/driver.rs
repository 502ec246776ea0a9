//! # Device UI Driver Capability
//!
//! The browser-automation surface the orchestrator drives the device's web
//! management interface through. Implementations live outside the core
//! (`devprov-adapters` provides a W3C WebDriver client); the orchestrator
//! only sees this trait, so tests substitute a scripted fake.
//!
//! ## Contract
//!
//! - Lookups never cache references across calls. The device UI re-renders
//!   after every mutation, so an [`ElementRef`] is only good until the next
//!   action that changes the page.
//! - `wait_*` methods poll until the condition holds or the timeout
//!   elapses, returning [`DriverError::Timeout`] in the latter case.
//! - `snapshot` is diagnostic only. Callers log and ignore its failures.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How to find an element on the device page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// XPath expression.
    #[serde(rename = "xpath")]
    XPath(String),
    /// CSS selector.
    Css(String),
    /// Exact link text.
    LinkText(String),
    /// Single class name.
    ClassName(String),
}

impl Locator {
    /// The W3C WebDriver location strategy and selector for this locator.
    ///
    /// WebDriver has no class-name strategy, so class names are expressed
    /// as CSS selectors.
    pub fn to_w3c(&self) -> (&'static str, String) {
        match self {
            Self::XPath(x) => ("xpath", x.clone()),
            Self::Css(c) => ("css selector", c.clone()),
            Self::LinkText(t) => ("link text", t.clone()),
            Self::ClassName(c) => ("css selector", format!(".{c}")),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::XPath(x) => write!(f, "xpath {x}"),
            Self::Css(c) => write!(f, "css {c}"),
            Self::LinkText(t) => write!(f, "link text '{t}'"),
            Self::ClassName(c) => write!(f, "class '{c}'"),
        }
    }
}

/// Opaque handle to an element found by the driver.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl ElementRef {
    /// The driver-assigned element identifier.
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Errors reported by a device UI driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The wait condition did not hold before the timeout.
    #[error("timed out after {after:?} waiting for {locator}")]
    Timeout {
        /// Locator that was waited on.
        locator: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The element reference no longer points into the live page.
    #[error("stale element reference: {0}")]
    StaleElement(String),

    /// A single lookup found nothing.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The browser session is gone or could not be created.
    #[error("session error: {0}")]
    Session(String),

    /// The driver endpoint could not be reached.
    #[error("transport error: {0}")]
    Transport(String),

    /// The driver endpoint answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local file operation failed (snapshot output).
    #[error("local I/O error: {0}")]
    Io(String),
}

impl DriverError {
    /// Whether the error is a transient UI inconsistency expected to
    /// resolve on re-query (staleness or a short wait timeout).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::StaleElement(_))
    }
}

/// Browser-automation capability for the device's web interface.
#[async_trait]
pub trait DeviceUiDriver: Send + Sync {
    /// Navigate to `url`.
    async fn open(&self, url: &str) -> Result<(), DriverError>;

    /// Reload the current page.
    async fn refresh(&self) -> Result<(), DriverError>;

    /// Find every element currently matching `locator`. An empty result is
    /// not an error.
    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementRef>, DriverError>;

    /// Wait until an element matching `locator` is displayed and enabled.
    async fn wait_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError>;

    /// Wait until an element matching `locator` is displayed.
    async fn wait_visible(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError>;

    /// Wait until an element matching `locator` exists in the page.
    async fn wait_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<ElementRef, DriverError>;

    /// Read an attribute of `element`; `None` when absent.
    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, DriverError>;

    /// Click `element`.
    async fn click(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Clear the contents of an input element.
    async fn clear(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Type `text` into `element`.
    async fn type_text(&self, element: &ElementRef, text: &str) -> Result<(), DriverError>;

    /// Press Enter in `element`.
    async fn submit_enter(&self, element: &ElementRef) -> Result<(), DriverError>;

    /// Capture a diagnostic snapshot under `label`.
    async fn snapshot(&self, label: &str) -> Result<(), DriverError>;

    /// Release the browser session.
    async fn close(&self) -> Result<(), DriverError>;
}
