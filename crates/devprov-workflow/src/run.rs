//! # Workflow Run
//!
//! One execution of the provisioning sequence. Owned exclusively by the
//! run worker from start to finish; the control context only sees what the
//! [`EventSink`](crate::sink::EventSink) publishes.
//!
//! Phase changes go through [`WorkflowRun::try_transition`], which checks
//! the edge against [`Phase::can_transition_to`] and appends to an
//! immutable transition log.

use serde::Serialize;

use devprov_core::{AddressState, Phase, RunId, Secret, StateError, Timestamp};

use crate::retry::RetryOutcome;

// ─── Transition Record ───────────────────────────────────────────────

/// Record of a single phase transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    /// Phase before the transition.
    pub from: Phase,
    /// Phase after the transition.
    pub to: Phase,
    /// When the transition occurred (UTC).
    pub timestamp: Timestamp,
    /// Human-readable reason, when the edge is not the plain successor.
    pub reason: Option<String>,
}

// ─── Run Request ─────────────────────────────────────────────────────

/// Operator input for a run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Network the device is to join.
    pub target_ssid: String,
    /// Credential for the target network; empty for an open network.
    pub password: Secret,
    /// Whether a static address applied by an earlier run is still in place.
    pub address_state: AddressState,
}

impl RunRequest {
    /// Request for a run against `target_ssid`.
    pub fn new(target_ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            target_ssid: target_ssid.into(),
            password: Secret::new(password),
            address_state: AddressState::default(),
        }
    }

    /// Carry the address bookkeeping of a previous run into this one.
    pub fn with_address_state(mut self, state: AddressState) -> Self {
        self.address_state = state;
        self
    }
}

// ─── Workflow Run ────────────────────────────────────────────────────

/// Mutable state of one run.
#[derive(Debug)]
pub struct WorkflowRun {
    id: RunId,
    target_ssid: String,
    password: Secret,
    phase: Phase,
    started_at: Timestamp,
    /// Address bookkeeping; updated when the static address is applied.
    pub address_state: AddressState,
    /// Outcome of the cache sweep, once it has run.
    pub sweep: Option<RetryOutcome>,
    /// Static address was skipped because the host was elsewhere.
    pub static_address_skipped: bool,
    transition_log: Vec<TransitionRecord>,
}

impl WorkflowRun {
    /// Create a run in `Init`.
    pub fn new(id: RunId, request: RunRequest) -> Self {
        Self {
            id,
            target_ssid: request.target_ssid,
            password: request.password,
            phase: Phase::Init,
            started_at: Timestamp::now(),
            address_state: request.address_state,
            sweep: None,
            static_address_skipped: false,
            transition_log: Vec::new(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn target_ssid(&self) -> &str {
        &self.target_ssid
    }

    pub fn password(&self) -> &Secret {
        &self.password
    }

    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Whether the run has reached `Finished`, `Failed` or `Cancelled`.
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Attempt a phase transition with runtime validation.
    ///
    /// Records the transition in the log on success.
    pub fn try_transition(&mut self, to: Phase, reason: Option<String>) -> Result<(), StateError> {
        if !self.phase.can_transition_to(to) {
            return Err(StateError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.transition_log.push(TransitionRecord {
            from: self.phase,
            to,
            timestamp: Timestamp::now(),
            reason,
        });
        self.phase = to;
        Ok(())
    }

    /// Every transition taken so far, oldest first.
    pub fn transition_log(&self) -> &[TransitionRecord] {
        &self.transition_log
    }

    /// Consume the run, keeping the parts that outlive it.
    pub fn into_parts(self) -> (AddressState, Option<RetryOutcome>, Vec<TransitionRecord>) {
        (self.address_state, self.sweep, self.transition_log)
    }
}
