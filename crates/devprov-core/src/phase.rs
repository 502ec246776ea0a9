//! # Provisioning Phases
//!
//! The fixed phase vocabulary of a provisioning run.
//!
//! ## Allowed Transitions
//!
//! ```text
//! Init ─▶ OpeningDevice ─▶ DeletingCache ─▶ JoiningDeviceNetwork
//!                                                  │
//!                                                  ▼
//!                                   AwaitingOperatorReconnect
//!                                        │              │
//!                                        ▼              │ (host not on
//!                             ApplyingStaticAddress     │  device network)
//!                                        │              │
//!                                        ▼              ▼
//!                                   IssuingConsoleCommand ─▶ Finished
//!
//! any non-terminal ─▶ Failed | Cancelled
//! ```
//!
//! `Finished`, `Failed` and `Cancelled` are terminal.

use serde::{Deserialize, Serialize};

/// One named step of the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Run created, nothing touched yet.
    Init,
    /// Navigating to the device and opening its file listing.
    OpeningDevice,
    /// Deleting stale cache entries through the retry loop.
    DeletingCache,
    /// Joining the device to the target wireless network.
    JoiningDeviceNetwork,
    /// Blocked on the gate until the operator reconnects the host.
    AwaitingOperatorReconnect,
    /// Assigning the static address to the host adapter.
    ApplyingStaticAddress,
    /// Reloading the device page and submitting the console command.
    IssuingConsoleCommand,
    /// Run completed (terminal).
    Finished,
    /// Run aborted on an unrecovered error (terminal).
    Failed,
    /// Run stopped by the operator (terminal).
    Cancelled,
}

impl Phase {
    /// The forward sequence a successful run walks through, in order.
    pub const SEQUENCE: [Phase; 8] = [
        Phase::Init,
        Phase::OpeningDevice,
        Phase::DeletingCache,
        Phase::JoiningDeviceNetwork,
        Phase::AwaitingOperatorReconnect,
        Phase::ApplyingStaticAddress,
        Phase::IssuingConsoleCommand,
        Phase::Finished,
    ];

    /// Returns the canonical phase name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::OpeningDevice => "OPENING_DEVICE",
            Self::DeletingCache => "DELETING_CACHE",
            Self::JoiningDeviceNetwork => "JOINING_DEVICE_NETWORK",
            Self::AwaitingOperatorReconnect => "AWAITING_OPERATOR_RECONNECT",
            Self::ApplyingStaticAddress => "APPLYING_STATIC_ADDRESS",
            Self::IssuingConsoleCommand => "ISSUING_CONSOLE_COMMAND",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Whether this phase is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Cancelled)
    }

    /// The next phase on the forward path, if any.
    pub fn successor(&self) -> Option<Phase> {
        match self {
            Self::Init => Some(Self::OpeningDevice),
            Self::OpeningDevice => Some(Self::DeletingCache),
            Self::DeletingCache => Some(Self::JoiningDeviceNetwork),
            Self::JoiningDeviceNetwork => Some(Self::AwaitingOperatorReconnect),
            Self::AwaitingOperatorReconnect => Some(Self::ApplyingStaticAddress),
            Self::ApplyingStaticAddress => Some(Self::IssuingConsoleCommand),
            Self::IssuingConsoleCommand => Some(Self::Finished),
            Self::Finished | Self::Failed | Self::Cancelled => None,
        }
    }

    /// Whether the phase machine allows moving from `self` to `to`.
    ///
    /// Besides the forward path, the static-address phase may be skipped,
    /// and every non-terminal phase may fail or be cancelled.
    pub fn can_transition_to(&self, to: Phase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(to, Self::Failed | Self::Cancelled) {
            return true;
        }
        if *self == Self::AwaitingOperatorReconnect && to == Self::IssuingConsoleCommand {
            return true;
        }
        self.successor() == Some(to)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
