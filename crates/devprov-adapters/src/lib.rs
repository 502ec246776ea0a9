//! # devprov-adapters -- Concrete provisioning capabilities
//!
//! Implementations of the two capability traits the workflow depends on:
//!
//! - [`WebDriverSession`]: [`devprov_core::DeviceUiDriver`] over the W3C
//!   WebDriver HTTP protocol, for the device's web interface.
//! - [`NetshNetworkService`]: [`devprov_core::NetworkService`] over the
//!   Windows `netsh` tool, for the operator machine's wireless adapter.
//!
//! Neither adapter knows anything about phases or retries. They translate
//! capability calls into wire requests or command lines and map failures
//! into the core error types.

pub mod netsh;
pub mod parse;
pub mod profile;
pub mod webdriver;

pub use netsh::{CommandOutput, CommandRunner, NetshNetworkService, SystemRunner};
pub use webdriver::{WebDriverConfig, WebDriverSession};
