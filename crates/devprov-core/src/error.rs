//! # Error Types
//!
//! Defines the error taxonomy shared by every provisioning crate. All
//! errors use `thiserror` for derive-based `Display` and `Error`
//! implementations.
//!
//! ## Taxonomy
//!
//! - **Transient UI**: element staleness. Retried inside the cache sweep
//!   budget; outside it, the page re-rendered under a single-shot step and
//!   the phase ends.
//! - **Lookup timeout**: a required affordance never became actionable.
//!   Fatal to the phase it happened in.
//! - **Capability**: the device UI driver or the host network service
//!   reported an error. Fatal to the phase it happened in.
//! - **Cancelled**: the operator stopped the run. Distinguished from
//!   failure.
//!
//! Every fatal variant carries the [`Phase`] it is attached to.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::network::NetworkError;
use crate::phase::Phase;

/// Top-level error type for a provisioning run.
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// An element reference went stale outside a retried step.
    #[error("transient UI error during {phase}: {detail}")]
    TransientUi {
        /// Phase the interaction belonged to.
        phase: Phase,
        /// Driver detail.
        detail: String,
    },

    /// A required affordance never became actionable within its timeout.
    #[error("{locator} not actionable within {after:?} during {phase}")]
    LookupTimeout {
        /// Phase the lookup belonged to.
        phase: Phase,
        /// Human-readable locator.
        locator: String,
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The device UI driver or host network service reported an error.
    #[error("capability error during {phase}: {detail}")]
    Capability {
        /// Phase the call belonged to.
        phase: Phase,
        /// Full error detail from the capability.
        detail: String,
    },

    /// The run was cancelled by the operator.
    #[error("run cancelled")]
    Cancelled,

    /// A run was started while another was still active.
    #[error("a provisioning run is already in progress")]
    RunInProgress,

    /// The run worker task panicked or was aborted.
    #[error("run worker aborted: {0}")]
    WorkerAborted(String),

    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Phase machine rejected a transition.
    #[error("invalid state transition: {0}")]
    InvalidTransition(#[from] StateError),
}

impl ProvisionError {
    /// Attach a driver error to the phase in which it occurred.
    ///
    /// Lookup timeouts keep their locator and duration, and staleness stays
    /// transient; everything else becomes a capability error carrying the
    /// driver's message.
    pub fn from_driver(phase: Phase, err: DriverError) -> Self {
        match err {
            DriverError::Timeout { locator, after } => Self::LookupTimeout {
                phase,
                locator,
                after,
            },
            other if other.is_transient() => Self::TransientUi {
                phase,
                detail: other.to_string(),
            },
            other => Self::Capability {
                phase,
                detail: other.to_string(),
            },
        }
    }

    /// Attach a network service error to the phase in which it occurred.
    pub fn from_network(phase: Phase, err: NetworkError) -> Self {
        Self::Capability {
            phase,
            detail: err.to_string(),
        }
    }

    /// The phase this error is attached to, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::TransientUi { phase, .. }
            | Self::LookupTimeout { phase, .. }
            | Self::Capability { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// Error in phase machine transitions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Attempted a transition the phase machine does not allow.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: Phase,
        /// Attempted target phase.
        to: Phase,
    },
}
