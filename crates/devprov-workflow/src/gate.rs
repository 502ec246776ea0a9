//! # Pause/Resume Gate
//!
//! Suspends the run worker between initiating the device's network join and
//! the operator confirming that the host has been reconnected. The control
//! context releases the gate; the worker waits on it.
//!
//! ## States
//!
//! ```text
//!   claim()            arm()                 release()
//!   ───────▶  Idle ──────────▶ Waiting ───────────────▶ Released
//!              │                  │                        │
//!              │ cancel()         │ cancel()               │ arm()
//!              ▼                  ▼                        ▼
//!          Cancelled          Cancelled                 Waiting
//! ```
//!
//! `release()` only has an effect on a waiting gate, so exactly one release
//! is honoured per arm cycle and a release before `arm()` is refused. Once
//! released, `wait()` returns immediately until the gate is armed again.
//! A cancelled gate stays cancelled for the rest of its claim.
//!
//! ## Tickets
//!
//! The orchestrator shares one gate across its runs. Each run claims it
//! with [`PauseGate::claim`] and passes the returned [`GateTicket`] to every
//! call. A claim makes all earlier tickets stale: calls made with them are
//! ignored, and a waiter holding one wakes as cancelled.
//!
//! Built on `tokio::sync::watch`: waiters park on the channel instead of
//! polling and wake as soon as the state leaves `Waiting`.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Gate state within the current claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Claimed but not yet armed; releases are refused.
    Idle,
    /// Armed; `wait()` blocks.
    Waiting,
    /// Released for this arm cycle.
    Released,
    /// The run was cancelled.
    Cancelled,
}

/// Why `wait()` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeReason {
    /// The operator released the gate.
    Released,
    /// The run was cancelled while waiting, or its claim was superseded.
    Cancelled,
}

/// Proof of one run's claim on a shared gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GateTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    generation: u64,
    state: GateState,
}

/// Re-armable single-release synchronization point.
///
/// Cheap to clone; every clone refers to the same gate.
#[derive(Debug, Clone)]
pub struct PauseGate {
    tx: Arc<watch::Sender<Slot>>,
}

impl PauseGate {
    /// Create an unclaimed gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot {
            generation: 0,
            state: GateState::Idle,
        });
        Self { tx: Arc::new(tx) }
    }

    /// Hand the gate to a new run. Earlier tickets go stale and the gate
    /// starts `Idle`.
    pub fn claim(&self) -> GateTicket {
        let mut generation = 0;
        self.tx.send_modify(|slot| {
            slot.generation += 1;
            slot.state = GateState::Idle;
            generation = slot.generation;
        });
        GateTicket(generation)
    }

    /// Reset to `Waiting`.
    ///
    /// Returns `false`, and changes nothing, when `ticket` is stale or its
    /// run was cancelled.
    pub fn arm(&self, ticket: GateTicket) -> bool {
        self.update(ticket, |state| {
            if *state == GateState::Cancelled {
                false
            } else {
                *state = GateState::Waiting;
                true
            }
        })
    }

    /// Release the gate.
    ///
    /// Returns `true` if this call released it, `false` if the gate was not
    /// waiting or `ticket` is stale.
    pub fn release(&self, ticket: GateTicket) -> bool {
        self.update(ticket, |state| {
            if *state == GateState::Waiting {
                *state = GateState::Released;
                true
            } else {
                false
            }
        })
    }

    /// Wake any waiter with [`WakeReason::Cancelled`]. Returns `true` if
    /// this call cancelled the claim.
    pub fn cancel(&self, ticket: GateTicket) -> bool {
        self.update(ticket, |state| {
            if *state == GateState::Cancelled {
                false
            } else {
                *state = GateState::Cancelled;
                true
            }
        })
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.tx.borrow().state
    }

    /// Whether `ticket` belongs to the current claim.
    pub fn is_current(&self, ticket: GateTicket) -> bool {
        self.tx.borrow().generation == ticket.0
    }

    /// Whether the gate is armed for `ticket` and not yet released.
    pub fn is_waiting(&self, ticket: GateTicket) -> bool {
        self.holds(ticket, GateState::Waiting)
    }

    /// Block until the gate is released or cancelled.
    pub async fn wait(&self, ticket: GateTicket) -> WakeReason {
        let mut rx = self.tx.subscribe();
        let slot = match rx
            .wait_for(|slot| {
                slot.generation != ticket.0
                    || matches!(slot.state, GateState::Released | GateState::Cancelled)
            })
            .await
        {
            Ok(slot) => *slot,
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => return WakeReason::Cancelled,
        };
        if slot.generation == ticket.0 && slot.state == GateState::Released {
            WakeReason::Released
        } else {
            WakeReason::Cancelled
        }
    }

    fn holds(&self, ticket: GateTicket, state: GateState) -> bool {
        let slot = *self.tx.borrow();
        slot.generation == ticket.0 && slot.state == state
    }

    fn update(&self, ticket: GateTicket, f: impl FnOnce(&mut GateState) -> bool) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.generation != ticket.0 {
                return false;
            }
            f(&mut slot.state)
        })
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
