//! # Retry Loop Executor
//!
//! Runs one idempotent action repeatedly until it reports no remaining
//! work, the attempt budget is spent, an optional overall deadline passes,
//! the run is cancelled, or the action hits a fatal error.
//!
//! ## Budget
//!
//! Every attempt counts against `max_attempts`, whatever its result. A
//! retryable failure costs an attempt and an inter-attempt delay but never
//! changes the final deletion count. Running out of budget, or out of
//! time, is a warning: the caller decides whether to proceed.
//!
//! ## Cancellation
//!
//! The loop checks the run's [`CancelSignal`] before every attempt, and
//! the pauses around attempts end early on cancellation. An attempt
//! already talking to the device is allowed to finish.
//!
//! ## Snapshots
//!
//! Retryable failures capture `<kind>_attempt_<n>` when the policy asks
//! for it; a fatal failure always captures `fatal_attempt_<n>`. Snapshot
//! failures are logged and ignored.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;

use devprov_core::{DeviceUiDriver, DriverError, ProvisionConfig};

use crate::cancel::CancelSignal;
use crate::sink::EventSink;

// ─── Attempt Results ─────────────────────────────────────────────────

/// Why a retryable attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryableKind {
    /// An element reference went stale because the page re-rendered.
    StaleElement,
    /// A lookup, or the whole attempt, ran out of time.
    Timeout,
}

impl RetryableKind {
    /// Label fragment used for diagnostic snapshots.
    pub fn label(&self) -> &'static str {
        match self {
            Self::StaleElement => "stale_element",
            Self::Timeout => "timeout",
        }
    }
}

/// Result of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// One unit of work was done.
    Deleted,
    /// Nothing left to do.
    NoWork,
    /// Transient failure; try again.
    Retryable {
        kind: RetryableKind,
        detail: String,
    },
    /// Unexpected failure; stop.
    Fatal(String),
}

impl From<DriverError> for AttemptOutcome {
    fn from(err: DriverError) -> Self {
        if !err.is_transient() {
            return Self::Fatal(err.to_string());
        }
        let kind = match err {
            DriverError::StaleElement(_) => RetryableKind::StaleElement,
            _ => RetryableKind::Timeout,
        };
        Self::Retryable {
            kind,
            detail: err.to_string(),
        }
    }
}

/// An idempotent unit of work run under the executor.
///
/// Implementations must re-query whatever state they act on at the start
/// of every attempt.
#[async_trait]
pub trait RetryAction: Send + Sync {
    /// Perform attempt number `attempt` (1-based).
    async fn attempt(&self, driver: &dyn DeviceUiDriver, attempt: u32) -> AttemptOutcome;
}

// ─── Policy ──────────────────────────────────────────────────────────

/// Limits and pacing for a retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Maximum attempts, successful or not. At least 1.
    pub max_attempts: u32,
    /// Upper bound on one attempt; exceeding it is a retryable timeout.
    pub attempt_timeout: Duration,
    /// Wait after a retryable failure.
    pub inter_attempt_delay: Duration,
    /// Wait before every attempt.
    pub pre_attempt_pause: Duration,
    /// Capture a snapshot on retryable failures.
    pub snapshot_on_retry: bool,
    /// Upper bound on the whole loop.
    pub overall_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Policy with the given budget and no delays.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempt_timeout: Duration::from_secs(30),
            inter_attempt_delay: Duration::ZERO,
            pre_attempt_pause: Duration::ZERO,
            snapshot_on_retry: false,
            overall_timeout: None,
        }
    }

    /// The cache sweep policy described by `config`.
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts,
            attempt_timeout: config.retry.attempt_timeout,
            inter_attempt_delay: config.retry.inter_attempt_delay,
            pre_attempt_pause: config.delays.before_attempt,
            snapshot_on_retry: config.retry.snapshot_on_retry,
            overall_timeout: config.retry.overall_timeout,
        }
    }
}

// ─── Outcome ─────────────────────────────────────────────────────────

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// Attempt budget spent; work may remain.
    BudgetExhausted,
    /// The action reported nothing left to do.
    NoMoreWork,
    /// The overall deadline passed.
    Timeout,
    /// The action reported a fatal error.
    Fatal,
    /// The run was cancelled between attempts.
    Cancelled,
}

impl TerminalReason {
    /// Whether the caller should report this as a warning.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::BudgetExhausted | Self::Timeout)
    }
}

/// Result of one retry loop. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    /// Attempts that reported `Deleted`.
    pub deletions: u32,
    /// Attempts made in total.
    pub attempts: u32,
    /// Why the loop stopped.
    pub terminal: TerminalReason,
    /// Detail of the most recent failed attempt.
    pub last_error: Option<String>,
}

// ─── Executor ────────────────────────────────────────────────────────

/// Drives a [`RetryAction`] under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `action` until it terminates or `cancel` is set.
    pub async fn run(
        &self,
        action: &dyn RetryAction,
        driver: &dyn DeviceUiDriver,
        sink: &EventSink,
        cancel: &CancelSignal,
    ) -> RetryOutcome {
        let started = Instant::now();
        let mut deletions = 0u32;
        let mut attempts = 0u32;
        let mut last_error = None;
        let stopped = |attempts: u32, deletions: u32| {
            sink.warn(format!(
                "Cache sweep stopped by cancellation after {deletions} deletion(s) in {attempts} attempt(s)"
            ));
            TerminalReason::Cancelled
        };

        let terminal = loop {
            if cancel.is_cancelled() {
                break stopped(attempts, deletions);
            }
            if attempts >= self.policy.max_attempts {
                sink.warn(format!(
                    "Attempt budget of {} spent after {deletions} deletion(s); entries may remain",
                    self.policy.max_attempts
                ));
                break TerminalReason::BudgetExhausted;
            }
            let remaining = match self.policy.overall_timeout {
                Some(limit) => match limit.checked_sub(started.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => {
                        sink.warn(format!(
                            "Deadline of {limit:?} passed after {attempts} attempt(s); entries may remain"
                        ));
                        break TerminalReason::Timeout;
                    }
                },
                None => None,
            };

            if !cancel.sleep(self.policy.pre_attempt_pause).await {
                break stopped(attempts, deletions);
            }
            attempts += 1;

            let budget = remaining.map_or(self.policy.attempt_timeout, |left| {
                left.min(self.policy.attempt_timeout)
            });
            let outcome = match tokio::time::timeout(budget, action.attempt(driver, attempts)).await
            {
                Ok(outcome) => outcome,
                Err(_) => AttemptOutcome::Retryable {
                    kind: RetryableKind::Timeout,
                    detail: format!("attempt {attempts} did not finish within {budget:?}"),
                },
            };

            match outcome {
                AttemptOutcome::Deleted => {
                    deletions += 1;
                    sink.info(format!("Deleted stale entry ({deletions} so far)"));
                }
                AttemptOutcome::NoWork => {
                    sink.info(format!(
                        "No stale entries remain; {deletions} deleted in {attempts} attempt(s)"
                    ));
                    break TerminalReason::NoMoreWork;
                }
                AttemptOutcome::Retryable { kind, detail } => {
                    sink.warn(format!("Attempt {attempts} failed, retrying: {detail}"));
                    if self.policy.snapshot_on_retry {
                        snapshot(driver, &format!("{}_attempt_{attempts}", kind.label())).await;
                    }
                    last_error = Some(detail);
                    if !cancel.sleep(self.policy.inter_attempt_delay).await {
                        break stopped(attempts, deletions);
                    }
                }
                AttemptOutcome::Fatal(detail) => {
                    sink.error(format!("Attempt {attempts} failed fatally: {detail}"));
                    snapshot(driver, &format!("fatal_attempt_{attempts}")).await;
                    last_error = Some(detail);
                    break TerminalReason::Fatal;
                }
            }
        };

        RetryOutcome {
            deletions,
            attempts,
            terminal,
            last_error,
        }
    }
}

/// Best-effort diagnostic capture.
pub(crate) async fn snapshot(driver: &dyn DeviceUiDriver, label: &str) {
    if let Err(e) = driver.snapshot(label).await {
        tracing::debug!(label, error = %e, "snapshot failed");
    }
}
