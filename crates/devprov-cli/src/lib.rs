//! # devprov-cli -- Operator Command Line
//!
//! The control surface for provisioning runs. Parses arguments, renders
//! run events, and relays the operator's `resume` and `cancel` to the
//! worker. One-shot subcommands cover the host wireless chores an operator
//! needs around a run.
//!
//! ## Subcommands
//!
//! - `run`: interactive provisioning run.
//! - `networks`: visible wireless networks.
//! - `status`: host address and associated network.
//! - `connect`: join the host to a network.
//! - `static` / `revert`: apply or revert the static address, only while
//!   on a device network.
//!
//! Handlers return an exit code; argument parsing stays in `main.rs`.

pub mod host;
pub mod run;

#[cfg(test)]
mod testing;
