//! # Workflow Orchestrator
//!
//! Runs the provisioning sequence on a single spawned worker task:
//!
//! ```text
//! Init → OpeningDevice → DeletingCache → JoiningDeviceNetwork
//!      → AwaitingOperatorReconnect → ApplyingStaticAddress
//!      → IssuingConsoleCommand → Finished
//! ```
//!
//! `ApplyingStaticAddress` is skipped when the host is not associated with
//! a device network at the resume point. Any non-terminal phase may end
//! in `Failed` or `Cancelled`.
//!
//! ## Guarantees
//!
//! - Errors are emitted as phase events before the run leaves the phase.
//! - The driver session is closed exactly once, after the last phase and
//!   before the terminal notification, however the run ended.
//! - Cancellation is observed between phases, during settle delays,
//!   between cache sweep attempts, and at the gate.
//! - One run at a time per orchestrator. Each run claims the shared gate
//!   at start and arms it only on reaching `AwaitingOperatorReconnect`, so
//!   a resume sent earlier is refused and a control left over from a
//!   previous run cannot touch the current one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use devprov_core::{
    AddressState, DeviceUiDriver, DriverError, NetworkService, Phase, ProvisionConfig,
    ProvisionError, RunEvent, RunId, RunOutcome,
};

use crate::cache::StaleCacheSweep;
use crate::cancel::CancelSignal;
use crate::gate::{GateTicket, PauseGate, WakeReason};
use crate::retry::{snapshot, RetryExecutor, RetryOutcome, RetryPolicy, TerminalReason};
use crate::run::{RunRequest, TransitionRecord, WorkflowRun};
use crate::sink::{EventSink, RunStatus, SharedStatus};

// ─── Orchestrator ────────────────────────────────────────────────────

/// Launches provisioning runs.
pub struct Orchestrator {
    config: Arc<ProvisionConfig>,
    network: Arc<dyn NetworkService>,
    gate: PauseGate,
    active: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(config: ProvisionConfig, network: Arc<dyn NetworkService>) -> Self {
        Self {
            config: Arc::new(config),
            network,
            gate: PauseGate::new(),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Whether a run is in progress.
    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Start a run on a new worker task. Must be called inside a tokio
    /// runtime.
    ///
    /// The worker owns `driver` for the run's lifetime and closes it
    /// before reporting completion.
    pub fn start(
        &self,
        driver: Box<dyn DeviceUiDriver>,
        request: RunRequest,
    ) -> Result<RunHandle, ProvisionError> {
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(ProvisionError::RunInProgress);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let run_id = RunId::new();
        let ticket = self.gate.claim();
        let cancel = CancelSignal::new();
        let (sink, events) = EventSink::channel(run_id);
        let control = RunControl {
            gate: self.gate.clone(),
            ticket,
            cancel: cancel.clone(),
            status: sink.status(),
        };
        let worker = Worker {
            config: Arc::clone(&self.config),
            network: Arc::clone(&self.network),
            gate: self.gate.clone(),
            ticket,
            cancel,
            sink,
        };
        let run = WorkflowRun::new(run_id, request);
        let span = tracing::info_span!("run", run_id = %run_id);
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                worker.execute(driver, run).await
            }
            .instrument(span),
        );

        Ok(RunHandle {
            run_id,
            control,
            events,
            worker: task,
        })
    }
}

/// Clears the busy flag when the worker ends, including by panic.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

// ─── Run Handle ──────────────────────────────────────────────────────

/// Control-context signals for a running workflow. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RunControl {
    gate: PauseGate,
    ticket: GateTicket,
    cancel: CancelSignal,
    status: SharedStatus,
}

impl RunControl {
    /// Release the gate. Returns `true` if this call released it.
    ///
    /// Refused unless the worker has armed the gate at
    /// `AwaitingOperatorReconnect` and the gate is still waiting.
    pub fn resume(&self) -> bool {
        if self.status.read().finished {
            return false;
        }
        self.gate.release(self.ticket)
    }

    /// Cancel the run. Unblocks a pending gate wait, stops the cache sweep
    /// and further phase transitions; the driver session is still closed.
    pub fn cancel(&self) {
        if self.status.read().finished {
            return;
        }
        self.cancel.cancel();
        self.gate.cancel(self.ticket);
    }

    /// Snapshot of the published status.
    pub fn status(&self) -> RunStatus {
        self.status.read().clone()
    }

    pub fn phase(&self) -> Phase {
        self.status.read().phase
    }

    pub fn is_awaiting_resume(&self) -> bool {
        self.status.read().awaiting_resume
    }
}

/// A started run: its control signals, its event stream, and its worker.
pub struct RunHandle {
    run_id: RunId,
    control: RunControl,
    events: mpsc::UnboundedReceiver<RunEvent>,
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.run_id
    }

    /// A clonable control for use from other tasks.
    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn status(&self) -> RunStatus {
        self.control.status()
    }

    /// Next event from the worker, in emission order. `None` once the
    /// worker has finished and every event has been consumed.
    pub async fn next_event(&mut self) -> Option<RunEvent> {
        self.events.recv().await
    }

    /// Wait for the worker and return its report. Unread events are
    /// discarded.
    pub async fn join(self) -> Result<RunReport, ProvisionError> {
        self.worker
            .await
            .map_err(|e| ProvisionError::WorkerAborted(e.to_string()))
    }

    /// Drain every remaining event, then wait for the report.
    pub async fn finish(mut self) -> Result<(Vec<RunEvent>, RunReport), ProvisionError> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let report = self.join().await?;
        Ok((events, report))
    }
}

// ─── Report ──────────────────────────────────────────────────────────

/// What a finished run leaves behind.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub outcome: RunOutcome,
    /// Cache sweep result, if the sweep ran.
    pub sweep: Option<RetryOutcome>,
    /// Address bookkeeping to carry into the next run.
    pub address_state: AddressState,
    /// The static address phase was skipped.
    pub static_address_skipped: bool,
    pub transitions: Vec<TransitionRecord>,
}

// ─── Worker ──────────────────────────────────────────────────────────

struct Worker {
    config: Arc<ProvisionConfig>,
    network: Arc<dyn NetworkService>,
    gate: PauseGate,
    ticket: GateTicket,
    cancel: CancelSignal,
    sink: EventSink,
}

fn ui_error(phase: Phase) -> impl Fn(DriverError) -> ProvisionError {
    move |err| ProvisionError::from_driver(phase, err)
}

impl Worker {
    async fn execute(self, driver: Box<dyn DeviceUiDriver>, mut run: WorkflowRun) -> RunReport {
        self.sink.info(format!(
            "Run {} started; device will join '{}'",
            run.id().short(),
            run.target_ssid()
        ));

        let outcome = match self.drive(driver.as_ref(), &mut run).await {
            Ok(()) => RunOutcome::Succeeded,
            Err(ProvisionError::Cancelled) => {
                let phase = run.phase();
                self.sink.warn(format!("Run cancelled during {phase}"));
                self.terminate(&mut run, Phase::Cancelled, Some("cancelled by operator".into()));
                RunOutcome::Cancelled { phase }
            }
            Err(err) => {
                let phase = err.phase().unwrap_or(run.phase());
                let detail = err.to_string();
                self.sink.error(format!("{phase} failed: {detail}"));
                self.terminate(&mut run, Phase::Failed, Some(detail.clone()));
                RunOutcome::Failed { phase, detail }
            }
        };

        self.cleanup(driver.as_ref()).await;
        if outcome.is_success() {
            self.terminate(&mut run, Phase::Finished, None);
            self.sink.info("Provisioning finished");
        }
        if run.address_state.applied_by_us {
            self.sink.info(format!(
                "Static address {} remains applied to '{}' until reverted",
                self.config.static_address.address, self.config.adapter_name
            ));
        }
        self.sink.finished(outcome.clone());

        let static_address_skipped = run.static_address_skipped;
        let run_id = run.id();
        let (address_state, sweep, transitions) = run.into_parts();
        RunReport {
            run_id,
            outcome,
            sweep,
            address_state,
            static_address_skipped,
            transitions,
        }
    }

    async fn drive(
        &self,
        driver: &dyn DeviceUiDriver,
        run: &mut WorkflowRun,
    ) -> Result<(), ProvisionError> {
        self.advance(run, Phase::OpeningDevice, None)?;
        self.open_device(driver).await?;

        self.advance(run, Phase::DeletingCache, None)?;
        self.delete_cache(driver, run).await?;

        self.advance(run, Phase::JoiningDeviceNetwork, None)?;
        let joined = self.join_device_network(driver, run).await;
        if joined.is_err() {
            snapshot(driver, "join_device_network_failed").await;
        }
        joined?;

        self.advance(run, Phase::AwaitingOperatorReconnect, None)?;
        self.await_operator().await?;

        match self.static_address_precondition().await {
            Ok(()) => {
                self.advance(run, Phase::ApplyingStaticAddress, None)?;
                self.apply_static_address(run).await?;
                self.advance(run, Phase::IssuingConsoleCommand, None)?;
            }
            Err(reason) => {
                self.sink.warn(format!("Skipping static address: {reason}"));
                run.static_address_skipped = true;
                self.advance(run, Phase::IssuingConsoleCommand, Some(reason))?;
            }
        }
        self.issue_console_command(driver).await
    }

    /// Move to `to` unless cancellation has been requested.
    fn advance(
        &self,
        run: &mut WorkflowRun,
        to: Phase,
        reason: Option<String>,
    ) -> Result<(), ProvisionError> {
        if self.cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled);
        }
        run.try_transition(to, reason)?;
        self.sink.phase_changed(to);
        Ok(())
    }

    /// Move to a terminal phase.
    fn terminate(&self, run: &mut WorkflowRun, to: Phase, reason: Option<String>) {
        match run.try_transition(to, reason) {
            Ok(()) => self.sink.phase_changed(to),
            Err(e) => self.sink.error(format!("Could not record terminal phase: {e}")),
        }
    }

    async fn settle(&self, duration: Duration) -> Result<(), ProvisionError> {
        if self.cancel.sleep(duration).await {
            Ok(())
        } else {
            Err(ProvisionError::Cancelled)
        }
    }

    async fn cleanup(&self, driver: &dyn DeviceUiDriver) {
        match driver.close().await {
            Ok(()) => self.sink.info("Browser session closed"),
            Err(e) => self.sink.warn(format!("Closing the browser session failed: {e}")),
        }
    }

    // ── Phases ──────────────────────────────────────────────────────

    async fn open_device(&self, driver: &dyn DeviceUiDriver) -> Result<(), ProvisionError> {
        let err = ui_error(Phase::OpeningDevice);
        let cfg = &self.config;

        self.sink.info(format!("Opening {}", cfg.device_url));
        driver.open(&cfg.device_url).await.map_err(&err)?;
        let files = driver
            .wait_clickable(&cfg.ui.files_link, cfg.timeouts.files_link)
            .await
            .map_err(&err)?;
        driver.click(&files).await.map_err(&err)?;
        self.settle(cfg.delays.after_navigation).await?;
        self.sink.info("File listing opened");
        Ok(())
    }

    async fn delete_cache(
        &self,
        driver: &dyn DeviceUiDriver,
        run: &mut WorkflowRun,
    ) -> Result<(), ProvisionError> {
        snapshot(driver, "before_cache_deletion").await;
        let executor = RetryExecutor::new(RetryPolicy::from_config(&self.config));
        let sweep = StaleCacheSweep::from_config(&self.config, self.cancel.clone());
        let outcome = executor.run(&sweep, driver, &self.sink, &self.cancel).await;
        run.sweep = Some(outcome.clone());

        match outcome.terminal {
            TerminalReason::NoMoreWork => Ok(()),
            TerminalReason::BudgetExhausted | TerminalReason::Timeout => {
                self.sink.warn(format!(
                    "Continuing after {} deletion(s); stale cache entries may remain",
                    outcome.deletions
                ));
                Ok(())
            }
            TerminalReason::Cancelled => Err(ProvisionError::Cancelled),
            TerminalReason::Fatal => Err(ProvisionError::Capability {
                phase: Phase::DeletingCache,
                detail: outcome
                    .last_error
                    .unwrap_or_else(|| "cache deletion failed".to_string()),
            }),
        }
    }

    async fn join_device_network(
        &self,
        driver: &dyn DeviceUiDriver,
        run: &WorkflowRun,
    ) -> Result<(), ProvisionError> {
        let err = ui_error(Phase::JoiningDeviceNetwork);
        let cfg = &self.config;
        let ssid = run.target_ssid();

        let connect = driver
            .wait_clickable(&cfg.ui.connect_link, cfg.timeouts.connect_link)
            .await
            .map_err(&err)?;
        driver.click(&connect).await.map_err(&err)?;
        self.settle(cfg.delays.after_navigation).await?;

        driver
            .wait_visible(&cfg.ui.network_list, cfg.timeouts.network_list)
            .await
            .map_err(&err)?;
        self.sink.info(format!("Looking for network '{ssid}'"));
        let entry = driver
            .wait_clickable(&cfg.ui.network_entry(ssid), cfg.timeouts.target_network)
            .await
            .map_err(&err)?;
        driver.click(&entry).await.map_err(&err)?;
        self.settle(cfg.delays.after_network_select).await?;

        if !run.password().is_empty() {
            let field = driver
                .wait_visible(&cfg.ui.password_field, cfg.timeouts.password_field)
                .await
                .map_err(&err)?;
            driver.clear(&field).await.map_err(&err)?;
            driver
                .type_text(&field, run.password().expose())
                .await
                .map_err(&err)?;
        }
        let save = driver
            .wait_clickable(&cfg.ui.join_button, cfg.timeouts.join_button)
            .await
            .map_err(&err)?;
        driver.click(&save).await.map_err(&err)?;

        self.sink.info(format!(
            "Join to '{ssid}' initiated; waiting {}s for the device to apply it",
            cfg.delays.join_settle.as_secs()
        ));
        self.settle(cfg.delays.join_settle).await
    }

    async fn await_operator(&self) -> Result<(), ProvisionError> {
        if !self.gate.arm(self.ticket) {
            return Err(ProvisionError::Cancelled);
        }
        self.sink.info(format!(
            "Reconnect this machine to the device's '{}' network, then resume",
            self.config.device_ssid_prefix
        ));
        self.sink.awaiting_resume();
        match self.gate.wait(self.ticket).await {
            WakeReason::Released => {
                self.sink.resumed();
                self.sink.info("Resumed by operator");
                Ok(())
            }
            WakeReason::Cancelled => Err(ProvisionError::Cancelled),
        }
    }

    /// `Ok` when the host is associated with a device network; otherwise
    /// the reason the static address must not be touched.
    async fn static_address_precondition(&self) -> Result<(), String> {
        let prefix = &self.config.device_ssid_prefix;
        match self.network.current_status().await {
            Ok(status) if status.is_on_device_network(prefix) => {
                self.sink.info(format!(
                    "Host is on '{}' with address {}",
                    status.ssid_or_na(),
                    status.address_or_na()
                ));
                Ok(())
            }
            Ok(status) => Err(format!(
                "host is associated with '{}', not a '{prefix}' network",
                status.ssid_or_na()
            )),
            Err(e) => Err(format!("host network status unavailable: {e}")),
        }
    }

    async fn apply_static_address(&self, run: &mut WorkflowRun) -> Result<(), ProvisionError> {
        let block = &self.config.static_address;
        self.sink.info(format!(
            "Applying static address {}/{} via {} to '{}'",
            block.address, block.mask, block.gateway, self.config.adapter_name
        ));
        self.network
            .set_static_address(block)
            .await
            .map_err(|e| ProvisionError::from_network(Phase::ApplyingStaticAddress, e))?;
        run.address_state.applied_by_us = true;
        self.sink.info("Static address applied");
        self.settle(self.config.delays.static_settle).await
    }

    async fn issue_console_command(
        &self,
        driver: &dyn DeviceUiDriver,
    ) -> Result<(), ProvisionError> {
        let err = ui_error(Phase::IssuingConsoleCommand);
        let cfg = &self.config;

        driver.refresh().await.map_err(&err)?;
        self.settle(cfg.delays.reload_settle).await?;
        let console = driver
            .wait_clickable(&cfg.ui.console_link, cfg.timeouts.console_link)
            .await
            .map_err(&err)?;
        driver.click(&console).await.map_err(&err)?;
        self.settle(cfg.delays.after_navigation).await?;

        let input = driver
            .wait_visible(&cfg.ui.console_input, cfg.timeouts.console_input)
            .await
            .map_err(&err)?;
        driver.clear(&input).await.map_err(&err)?;
        driver
            .type_text(&input, &cfg.console_command)
            .await
            .map_err(&err)?;
        driver.submit_enter(&input).await.map_err(&err)?;
        self.sink.info(format!("Submitted console command '{}'", cfg.console_command));
        self.settle(cfg.delays.after_command).await
    }
}
