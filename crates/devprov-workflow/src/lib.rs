//! # devprov-workflow
//!
//! The provisioning engine. A run is a fixed sequence of phases executed by
//! one background worker task; the control context talks to it only
//! through a [`RunHandle`]: events flow out on a channel, and resume and
//! cancel flow in through the [`PauseGate`] and the [`CancelSignal`].
//!
//! ## Modules
//!
//! - [`run`]: the per-run state and its validated transition log.
//! - [`retry`]: the bounded retry loop executor.
//! - [`cache`]: the stale-cache sweep action run under the executor.
//! - [`gate`]: the pause/resume gate between device join and reconnect.
//! - [`cancel`]: the run cancellation flag.
//! - [`sink`]: the event channel and published run status.
//! - [`orchestrator`]: the phase sequence itself.
//!
//! The crate depends only on the capability traits in `devprov-core`.
//! Concrete browser and host network implementations are injected.

pub mod cache;
pub mod cancel;
pub mod gate;
pub mod orchestrator;
pub mod retry;
pub mod run;
pub mod sink;

#[cfg(test)]
mod testing;

pub use cache::StaleCacheSweep;
pub use cancel::CancelSignal;
pub use gate::{GateState, GateTicket, PauseGate, WakeReason};
pub use orchestrator::{Orchestrator, RunControl, RunHandle, RunReport};
pub use retry::{
    AttemptOutcome, RetryAction, RetryExecutor, RetryOutcome, RetryPolicy, RetryableKind,
    TerminalReason,
};
pub use run::{RunRequest, TransitionRecord, WorkflowRun};
pub use sink::{EventSink, RunStatus};
