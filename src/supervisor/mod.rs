//! Worker lifecycle: setup, wiring, start and bounded shutdown.
//!
//! The supervisor owns one [`WorkerHandle`] per resolved capability. All
//! workers share a single event channel whose receiver belongs to the
//! orchestrator; each worker has its own FIFO command queue. Nothing here
//! blocks on a worker except [`WorkerSupervisor::shutdown_all`], which bounds
//! every wait with a timeout.

pub mod wiring;

pub use wiring::{DEFAULT_WIRING, WiringError, WiringReport, WiringTable, default_wiring};

use crate::capability::{CapabilityId, GENERIC_EVENTS};
use crate::config::RobotConfig;
use crate::error::{Result, RobotError, panic_message};
use crate::resolver::{ProviderKind, ResolutionReport, WorkerProvider};
use crate::worker::{
    Command, CommandEnvelope, CommandInbox, EventEmitter, EventEnvelope, StateCell, Worker,
    WorkerContext, WorkerControl, WorkerState, command_channel, run_worker,
};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

// ── Handles ─────────────────────────────────────────────────────────────────

/// Supervisor-side record of one worker.
pub struct WorkerHandle {
    capability: CapabilityId,
    provider: Option<Arc<dyn WorkerProvider>>,
    control: WorkerControl,
    commands: Option<mpsc::UnboundedSender<Command>>,
    pending: Option<(Box<dyn Worker>, CommandInbox)>,
    /// event name -> orchestrator handler
    routes: BTreeMap<&'static str, &'static str>,
    /// command name -> worker entry point
    entry_points: BTreeMap<&'static str, &'static str>,
    wired: bool,
    join: Option<JoinHandle<()>>,
    setup_error: Option<String>,
    generation: u64,
}

impl WorkerHandle {
    fn ready(capability: CapabilityId, provider: Arc<dyn WorkerProvider>, worker: Box<dyn Worker>) -> Self {
        let (tx, inbox) = command_channel();
        Self {
            capability,
            provider: Some(provider),
            control: WorkerControl::new(StateCell::new(WorkerState::Constructed)),
            commands: Some(tx),
            pending: Some((worker, inbox)),
            routes: BTreeMap::new(),
            entry_points: BTreeMap::new(),
            wired: false,
            join: None,
            setup_error: None,
            generation: 0,
        }
    }

    fn failed(capability: CapabilityId, provider: Option<Arc<dyn WorkerProvider>>, error: String) -> Self {
        Self {
            capability,
            provider,
            control: WorkerControl::new(StateCell::new(WorkerState::Failed)),
            commands: None,
            pending: None,
            routes: BTreeMap::new(),
            entry_points: BTreeMap::new(),
            wired: false,
            join: None,
            setup_error: Some(error),
            generation: 0,
        }
    }

    /// Replace a finished or retiring worker with a freshly built one,
    /// keeping its wiring. Events still in flight from the old task carry the
    /// previous generation.
    fn rebuild(&mut self, worker: Box<dyn Worker>) {
        let (tx, inbox) = command_channel();
        self.generation += 1;
        self.control = WorkerControl::new(StateCell::new(WorkerState::Constructed));
        self.commands = Some(tx);
        self.pending = Some((worker, inbox));
        self.join = None;
        self.setup_error = None;
    }

    pub fn capability(&self) -> CapabilityId {
        self.capability
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.name())
    }

    pub fn kind(&self) -> Option<ProviderKind> {
        self.provider.as_ref().map(|p| p.kind())
    }

    pub fn state(&self) -> WorkerState {
        self.control.state().get()
    }

    /// Stop/shutdown control, usable from any task.
    pub fn control(&self) -> &WorkerControl {
        &self.control
    }

    /// Why setup failed, for handles in the `Failed` state from birth.
    pub fn setup_error(&self) -> Option<&str> {
        self.setup_error.as_deref()
    }

    pub fn is_wired(&self) -> bool {
        self.wired
    }

    /// Orchestrator handler wired to `event`.
    pub fn handler_for(&self, event: &str) -> Option<&'static str> {
        self.routes.get(event).copied()
    }

    /// Whether `command` was wired to an entry point.
    pub fn accepts_command(&self, command: &str) -> bool {
        self.entry_points.contains_key(command)
    }

    /// Whether the worker task was launched and has not finished yet.
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|join| !join.is_finished())
    }

    /// Incarnation counter, bumped each time the worker is rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    async fn shutdown(&mut self, timeout: Duration, grace: Duration) -> ShutdownOutcome {
        self.control.shutdown();
        self.commands = None;
        self.pending = None;

        let Some(mut join) = self.join.take() else {
            return ShutdownOutcome::NotRunning;
        };
        if join.is_finished() {
            if let Err(e) = join.await {
                debug!(capability = %self.capability, error = %e, "worker task ended abnormally");
            }
            return ShutdownOutcome::NotRunning;
        }

        if tokio::time::timeout(timeout, &mut join).await.is_ok() {
            return ShutdownOutcome::Graceful;
        }
        join.abort();
        if tokio::time::timeout(grace, &mut join).await.is_ok() {
            self.control.state().advance(WorkerState::Stopped);
            ShutdownOutcome::ForcedTermination
        } else {
            self.control.state().advance(WorkerState::Failed);
            ShutdownOutcome::TerminationFailed
        }
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("capability", &self.capability)
            .field("provider", &self.provider_name())
            .field("state", &self.state())
            .field("wired", &self.wired)
            .field("setup_error", &self.setup_error)
            .finish_non_exhaustive()
    }
}

// ── Shutdown report ─────────────────────────────────────────────────────────

/// How one worker ended during [`WorkerSupervisor::shutdown_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Finished within its timeout.
    Graceful,
    /// Timed out and was aborted.
    ForcedTermination,
    /// Timed out and did not end even after being aborted.
    TerminationFailed,
    /// Was never launched, or had already finished.
    NotRunning,
}

impl ShutdownOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::ForcedTermination => "forced_termination",
            Self::TerminationFailed => "termination_failed",
            Self::NotRunning => "not_running",
        }
    }
}

impl fmt::Display for ShutdownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`WorkerSupervisor::shutdown_all`].
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    pub outcomes: Vec<(CapabilityId, ShutdownOutcome)>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn outcome(&self, capability: CapabilityId) -> Option<ShutdownOutcome> {
        self.outcomes
            .iter()
            .find(|(c, _)| *c == capability)
            .map(|(_, outcome)| *outcome)
    }

    /// True when no worker had to be aborted.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|(_, outcome)| {
            matches!(outcome, ShutdownOutcome::Graceful | ShutdownOutcome::NotRunning)
        })
    }
}

// ── Supervisor ──────────────────────────────────────────────────────────────

/// Owns every worker for the lifetime of the application.
pub struct WorkerSupervisor {
    handles: BTreeMap<CapabilityId, WorkerHandle>,
    events: mpsc::UnboundedSender<EventEnvelope>,
}

impl WorkerSupervisor {
    /// New supervisor and the receiver for every worker's events.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                handles: BTreeMap::new(),
                events,
            },
            rx,
        )
    }

    /// Build one worker per resolved capability.
    ///
    /// A capability whose constructor fails or panics gets a `Failed` handle;
    /// the others are set up regardless. Returns the capabilities that failed.
    pub fn setup_all(&mut self, report: &ResolutionReport, config: &RobotConfig) -> Vec<CapabilityId> {
        let mut failed = Vec::new();
        for (capability, resolution) in report.iter() {
            let provider = Arc::clone(resolution.provider());
            let handle = match instantiate(capability, provider.as_ref(), config) {
                Ok(worker) => {
                    debug!(%capability, provider = provider.name(), "worker constructed");
                    WorkerHandle::ready(capability, provider, worker)
                }
                Err(e) => {
                    error!(%capability, provider = provider.name(), error = %e, "worker setup failed");
                    failed.push(capability);
                    WorkerHandle::failed(capability, Some(provider), e.to_string())
                }
            };
            if let Some(previous) = self.handles.insert(capability, handle) {
                if previous.join.is_some() {
                    warn!(%capability, "replaced a launched worker during setup");
                }
            }
        }
        failed
    }

    /// Connect a worker's events and commands according to `table`.
    ///
    /// `handlers` lists the handler names the orchestrator implements.
    /// Every broken pair is logged and reported; the remaining pairs are
    /// still wired. Wire before [`WorkerSupervisor::start`]: the event filter
    /// is fixed when the worker launches.
    pub fn wire(&mut self, capability: CapabilityId, table: &WiringTable, handlers: &[&str]) -> WiringReport {
        let mut report = WiringReport::empty(capability);
        let provider = match self.handles.get(&capability) {
            Some(WorkerHandle {
                provider: Some(provider),
                setup_error: None,
                ..
            }) => Arc::clone(provider),
            _ => {
                report.errors.push(WiringError::NotSetUp);
                error!(%capability, "cannot wire a worker that was not set up");
                return report;
            }
        };
        if table.capability != capability {
            report.errors.push(WiringError::WrongCapability {
                table: table.capability,
            });
            error!(%capability, table = %table.capability, "wiring table mismatch");
            return report;
        }

        let mut routes = BTreeMap::new();
        for &(event, handler) in table.events {
            if !handlers.contains(&handler) {
                report.errors.push(WiringError::MissingHandler { event, handler });
                continue;
            }
            if !provider.events().contains(&event) && !GENERIC_EVENTS.contains(&event) {
                report.errors.push(WiringError::MissingEvent { event });
                continue;
            }
            routes.insert(event, handler);
            report.events.push(event);
        }
        let mut entry_points = BTreeMap::new();
        for &(command, entry_point) in table.commands {
            if !provider.commands().contains(&entry_point) {
                report.errors.push(WiringError::MissingEntryPoint {
                    command,
                    entry_point,
                });
                continue;
            }
            entry_points.insert(command, entry_point);
            report.commands.push(command);
        }

        for e in &report.errors {
            error!(%capability, error = %e, "wiring error");
        }
        if let Some(handle) = self.handles.get_mut(&capability) {
            handle.routes = routes;
            handle.entry_points = entry_points;
            handle.wired = true;
        }
        debug!(
            %capability,
            events = report.events.len(),
            commands = report.commands.len(),
            "worker wired"
        );
        report
    }

    /// Wire every handle with its built-in table.
    pub fn wire_all(&mut self, handlers: &[&str]) -> Vec<WiringReport> {
        let capabilities: Vec<_> = self.handles.keys().copied().collect();
        capabilities
            .into_iter()
            .map(|capability| self.wire(capability, default_wiring(capability), handlers))
            .collect()
    }

    /// Launch a worker's task. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability has no handle or failed setup.
    pub fn start(&mut self, capability: CapabilityId) -> Result<()> {
        let handle = self
            .handles
            .get_mut(&capability)
            .ok_or_else(|| RobotError::Setup(format!("{capability} was not set up")))?;
        if handle.join.is_some() {
            return Ok(());
        }
        if let Some(error) = &handle.setup_error {
            return Err(RobotError::Setup(format!("{capability} failed setup: {error}")));
        }
        if handle.control.is_stop_requested() {
            debug!(%capability, "stopped before launch");
            handle.pending = None;
            return Ok(());
        }
        let Some((worker, inbox)) = handle.pending.take() else {
            return Err(RobotError::Setup(format!("{capability} has no worker to start")));
        };

        handle.control.state().advance(WorkerState::Started);
        let mut emitter =
            EventEmitter::new(capability, self.events.clone()).with_generation(handle.generation);
        if handle.wired {
            let subscribed: HashSet<&'static str> = handle.routes.keys().copied().collect();
            emitter = emitter.with_subscriptions(subscribed);
        }
        let ctx = WorkerContext::new(emitter, handle.control.clone());
        let span = info_span!("worker", capability = %capability);
        handle.join = Some(tokio::spawn(run_worker(worker, inbox, ctx).instrument(span)));
        info!(%capability, provider = handle.provider_name().unwrap_or("?"), "worker started");
        Ok(())
    }

    /// Start every constructed worker. Looping workers are skipped unless
    /// `include_looping`. Failures are logged and returned.
    pub fn start_all(&mut self, include_looping: bool) -> Vec<(CapabilityId, RobotError)> {
        let capabilities: Vec<_> = self
            .handles
            .iter()
            .filter(|(capability, handle)| {
                handle.setup_error.is_none() && (include_looping || !capability.is_looping())
            })
            .map(|(capability, _)| *capability)
            .collect();
        let mut failures = Vec::new();
        for capability in capabilities {
            if let Err(e) = self.start(capability) {
                warn!(%capability, error = %e, "worker did not start");
                failures.push((capability, e));
            }
        }
        failures
    }

    /// Make sure `capability` has a live worker, rebuilding it from its
    /// provider if the previous one finished or was asked to stop.
    ///
    /// A task still winding down after a stop request is shut down and
    /// aborted; its remaining events belong to the old generation.
    /// # Errors
    ///
    /// Returns an error if the capability has no provider or the rebuild fails.
    pub fn ensure_running(&mut self, capability: CapabilityId, config: &RobotConfig) -> Result<()> {
        let handle = self
            .handles
            .get_mut(&capability)
            .ok_or_else(|| RobotError::Setup(format!("{capability} was not set up")))?;
        let retiring = handle.control.is_stop_requested();
        if handle.is_running() && !retiring {
            return Ok(());
        }
        if handle.join.is_some() || handle.pending.is_none() || retiring {
            let provider = handle
                .provider
                .clone()
                .ok_or_else(|| RobotError::Setup(format!("{capability} has no provider")))?;
            if let Some(join) = handle.join.take() {
                if !join.is_finished() {
                    debug!(%capability, generation = handle.generation, "replacing retiring worker");
                    handle.control.shutdown();
                }
                join.abort();
            }
            match instantiate(capability, provider.as_ref(), config) {
                Ok(worker) => handle.rebuild(worker),
                Err(e) => {
                    error!(%capability, error = %e, "worker rebuild failed");
                    return Err(e);
                }
            }
            debug!(%capability, "worker rebuilt");
        }
        self.start(capability)
    }

    /// Queue a command without waiting. Returns false if the command was not
    /// wired or the worker no longer accepts commands.
    pub fn send(&self, envelope: CommandEnvelope) -> bool {
        let CommandEnvelope { target, command } = envelope;
        let name = command.name();
        let Some(handle) = self.handles.get(&target) else {
            warn!(capability = %target, command = name, "command for unknown worker dropped");
            return false;
        };
        if !handle.accepts_command(name) {
            warn!(capability = %target, command = name, "unwired command dropped");
            return false;
        }
        let Some(tx) = &handle.commands else {
            debug!(capability = %target, command = name, "worker not accepting commands");
            return false;
        };
        if tx.send(command).is_err() {
            debug!(capability = %target, command = name, "worker already finished");
            return false;
        }
        true
    }

    /// Ask a worker to stop cooperatively. Idempotent.
    pub fn stop(&self, capability: CapabilityId) -> bool {
        match self.handles.get(&capability) {
            Some(handle) => {
                handle.control.stop();
                true
            }
            None => false,
        }
    }

    pub fn handle(&self, capability: CapabilityId) -> Option<&WorkerHandle> {
        self.handles.get(&capability)
    }

    pub fn handles(&self) -> impl Iterator<Item = &WorkerHandle> + '_ {
        self.handles.values()
    }

    /// Whether `envelope` came from the current incarnation of its worker.
    pub fn is_current(&self, envelope: &EventEnvelope) -> bool {
        self.handles
            .get(&envelope.source)
            .is_none_or(|handle| handle.generation == envelope.generation)
    }

    /// Orchestrator handler wired for `event` from `source`.
    pub fn handler_for(&self, source: CapabilityId, event: &str) -> Option<&'static str> {
        self.handles.get(&source)?.handler_for(event)
    }

    /// Current state of every worker.
    pub fn states(&self) -> BTreeMap<CapabilityId, WorkerState> {
        self.handles
            .iter()
            .map(|(capability, handle)| (*capability, handle.state()))
            .collect()
    }

    /// Shut every worker down, one after another.
    ///
    /// Each worker gets `timeout` to finish after its shutdown request; a
    /// worker still running after that is aborted and given `grace` more.
    /// Returns within `N * (timeout + grace)` whatever the workers do.
    pub async fn shutdown_all(&mut self, timeout: Duration, grace: Duration) -> ShutdownReport {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(self.handles.len());
        for (capability, handle) in &mut self.handles {
            let outcome = handle.shutdown(timeout, grace).await;
            match outcome {
                ShutdownOutcome::Graceful => info!(%capability, "worker stopped gracefully"),
                ShutdownOutcome::NotRunning => debug!(%capability, "worker was not running"),
                ShutdownOutcome::ForcedTermination => warn!(
                    %capability,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker force-terminated; its device may need cleanup"
                ),
                ShutdownOutcome::TerminationFailed => error!(
                    %capability,
                    "worker did not terminate; abandoning it"
                ),
            }
            outcomes.push((*capability, outcome));
        }
        let report = ShutdownReport {
            outcomes,
            elapsed: started.elapsed(),
        };
        info!(
            elapsed_ms = report.elapsed.as_millis() as u64,
            clean = report.is_clean(),
            "all workers shut down"
        );
        report
    }
}

impl Drop for WorkerSupervisor {
    fn drop(&mut self) {
        for handle in self.handles.values_mut() {
            if let Some(join) = handle.join.take() {
                handle.control.shutdown();
                join.abort();
            }
        }
    }
}

/// Build a worker, turning constructor errors and panics into setup errors.
fn instantiate(
    capability: CapabilityId,
    provider: &dyn WorkerProvider,
    config: &RobotConfig,
) -> Result<Box<dyn Worker>> {
    let worker = catch_unwind(AssertUnwindSafe(|| provider.build(config)))
        .map_err(|panic| {
            RobotError::Setup(format!(
                "{} constructor panicked: {}",
                provider.name(),
                panic_message(panic.as_ref())
            ))
        })??;
    if worker.capability() != capability {
        return Err(RobotError::Setup(format!(
            "{} built a {} worker for {capability}",
            provider.name(),
            worker.capability()
        )));
    }
    Ok(worker)
}
