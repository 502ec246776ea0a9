//! # Phase Events
//!
//! Messages flowing from the run worker to the control surface. The
//! worker is the only producer, so the order in which a consumer receives
//! events is the order in which they were emitted.

use serde::{Deserialize, Serialize};

use crate::phase::Phase;
use crate::temporal::Timestamp;

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Normal progress.
    Info,
    /// Something unexpected that did not stop the run.
    Warning,
    /// A failure; normally followed by the run entering `Failed`.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => f.write_str("info"),
            Self::Warning => f.write_str("warning"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// An immutable log entry attached to the phase that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseEvent {
    /// Phase active when the event was emitted.
    pub phase: Phase,
    /// Human-readable text.
    pub text: String,
    /// Severity of the event.
    pub severity: Severity,
    /// Wall-clock emission time.
    pub at: Timestamp,
}

impl PhaseEvent {
    /// Create an event stamped with the current time.
    pub fn new(phase: Phase, severity: Severity, text: impl Into<String>) -> Self {
        Self {
            phase,
            text: text.into(),
            severity,
            at: Timestamp::now(),
        }
    }
}

impl std::fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:<7} {}: {}", self.at.clock(), self.severity, self.phase, self.text)
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every phase completed.
    Succeeded,
    /// A phase hit an unrecovered error.
    Failed {
        /// Phase that failed.
        phase: Phase,
        /// Error detail.
        detail: String,
    },
    /// The operator cancelled the run.
    Cancelled {
        /// Phase the run was in when cancellation took effect.
        phase: Phase,
    },
}

impl RunOutcome {
    /// Whether the run completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// The phase that failed, when the run failed.
    pub fn failure_phase(&self) -> Option<Phase> {
        match self {
            Self::Failed { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

/// A signal produced by the run worker for the control surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// The run entered a new phase.
    PhaseChanged(Phase),
    /// A log line.
    Log(PhaseEvent),
    /// The worker is blocked on the gate; the resume affordance should be enabled.
    AwaitingResume,
    /// The gate was passed; the resume affordance should be disabled.
    Resumed,
    /// Terminal notification, sent exactly once per run.
    RunFinished(RunOutcome),
}
