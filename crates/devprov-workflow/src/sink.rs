//! # Event Sink
//!
//! The run worker's only way of talking to the control context. Every
//! phase event goes to two places: the run's event channel, where the
//! control surface renders it, and `tracing`, with `run_id` and `phase`
//! as structured fields.
//!
//! The sink also owns the run's published status. Only the worker writes
//! it; the control context reads snapshots and may lag by one phase.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use devprov_core::{Phase, PhaseEvent, RunEvent, RunId, RunOutcome, Severity};

/// Snapshot of a run as seen from the control context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunStatus {
    /// The run this status belongs to.
    pub run_id: RunId,
    /// Most recently entered phase.
    pub phase: Phase,
    /// The worker is blocked on the gate.
    pub awaiting_resume: bool,
    /// The terminal notification has been sent.
    pub finished: bool,
}

/// Shared, worker-written run status.
pub type SharedStatus = Arc<RwLock<RunStatus>>;

/// Producer side of a run's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    run_id: RunId,
    tx: mpsc::UnboundedSender<RunEvent>,
    status: SharedStatus,
}

impl EventSink {
    /// Create a sink and the receiver the control context consumes.
    pub fn channel(run_id: RunId) -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(RwLock::new(RunStatus {
            run_id,
            phase: Phase::Init,
            awaiting_resume: false,
            finished: false,
        }));
        (Self { run_id, tx, status }, rx)
    }

    /// The run this sink reports for.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Handle to the published status.
    pub fn status(&self) -> SharedStatus {
        Arc::clone(&self.status)
    }

    /// Phase currently published.
    pub fn phase(&self) -> Phase {
        self.status.read().phase
    }

    /// Publish a phase change.
    pub fn phase_changed(&self, phase: Phase) {
        self.status.write().phase = phase;
        tracing::info!(run_id = %self.run_id, phase = %phase, "phase entered");
        self.send(RunEvent::PhaseChanged(phase));
    }

    /// Emit an info line attributed to the current phase.
    pub fn info(&self, text: impl Into<String>) {
        self.log(Severity::Info, text);
    }

    /// Emit a warning line attributed to the current phase.
    pub fn warn(&self, text: impl Into<String>) {
        self.log(Severity::Warning, text);
    }

    /// Emit an error line attributed to the current phase.
    pub fn error(&self, text: impl Into<String>) {
        self.log(Severity::Error, text);
    }

    /// Emit a line attributed to the current phase.
    pub fn log(&self, severity: Severity, text: impl Into<String>) {
        let event = PhaseEvent::new(self.phase(), severity, text);
        match severity {
            Severity::Info => {
                tracing::info!(run_id = %self.run_id, phase = %event.phase, "{}", event.text)
            }
            Severity::Warning => {
                tracing::warn!(run_id = %self.run_id, phase = %event.phase, "{}", event.text)
            }
            Severity::Error => {
                tracing::error!(run_id = %self.run_id, phase = %event.phase, "{}", event.text)
            }
        }
        self.send(RunEvent::Log(event));
    }

    /// Enable the resume affordance.
    pub fn awaiting_resume(&self) {
        self.status.write().awaiting_resume = true;
        self.send(RunEvent::AwaitingResume);
    }

    /// Disable the resume affordance.
    pub fn resumed(&self) {
        self.status.write().awaiting_resume = false;
        self.send(RunEvent::Resumed);
    }

    /// Send the terminal notification. Called exactly once per run.
    pub fn finished(&self, outcome: RunOutcome) {
        {
            let mut status = self.status.write();
            status.awaiting_resume = false;
            status.finished = true;
        }
        self.send(RunEvent::RunFinished(outcome));
    }

    fn send(&self, event: RunEvent) {
        // A control surface that stopped listening does not stop the run.
        if self.tx.send(event).is_err() {
            tracing::trace!(run_id = %self.run_id, "event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_arrive_in_emission_order() {
        let (sink, mut rx) = EventSink::channel(RunId::new());
        sink.phase_changed(Phase::OpeningDevice);
        sink.info("opened");
        sink.phase_changed(Phase::DeletingCache);
        sink.warn("budget exhausted");

        assert_eq!(rx.try_recv().unwrap(), RunEvent::PhaseChanged(Phase::OpeningDevice));
        match rx.try_recv().unwrap() {
            RunEvent::Log(ev) => {
                assert_eq!(ev.phase, Phase::OpeningDevice);
                assert_eq!(ev.text, "opened");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), RunEvent::PhaseChanged(Phase::DeletingCache));
        match rx.try_recv().unwrap() {
            RunEvent::Log(ev) => {
                assert_eq!(ev.phase, Phase::DeletingCache);
                assert_eq!(ev.severity, Severity::Warning);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_tracks_gate_and_completion() {
        let (sink, _rx) = EventSink::channel(RunId::new());
        let status = sink.status();
        sink.awaiting_resume();
        assert!(status.read().awaiting_resume);
        sink.resumed();
        assert!(!status.read().awaiting_resume);
        sink.finished(RunOutcome::Succeeded);
        assert!(status.read().finished);
    }

    #[test]
    fn test_dropped_receiver_is_tolerated() {
        let (sink, rx) = EventSink::channel(RunId::new());
        drop(rx);
        sink.info("nobody listening");
        sink.finished(RunOutcome::Succeeded);
    }
}
