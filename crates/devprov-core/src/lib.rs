//! # devprov-core
//!
//! Shared vocabulary of the device provisioning workspace. Defines the run
//! identifier, the phase machine's states, phase events and run outcomes,
//! the error taxonomy, the static configuration, and the two capability
//! traits the orchestrator drives: [`DeviceUiDriver`] for the device's web
//! interface and [`NetworkService`] for the host's wireless adapter.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `devprov-*` crates.
//! - No I/O beyond reading a configuration file. Capabilities are traits;
//!   implementations live in `devprov-adapters`.
//! - No `.unwrap()` outside tests.

pub mod config;
pub mod driver;
pub mod error;
pub mod event;
pub mod identity;
pub mod network;
pub mod phase;
pub mod temporal;

pub use config::{
    ConfigError, DeviceUiMap, LookupTimeouts, ProvisionConfig, RetrySettings, Secret,
    SettleDelays,
};
pub use driver::{DeviceUiDriver, DriverError, ElementRef, Locator};
pub use error::{ProvisionError, StateError};
pub use event::{PhaseEvent, RunEvent, RunOutcome, Severity};
pub use identity::RunId;
pub use network::{
    matches_device_network, AddressState, HostStatus, NetworkError, NetworkService,
    StaticAddress,
};
pub use phase::Phase;
pub use temporal::Timestamp;
