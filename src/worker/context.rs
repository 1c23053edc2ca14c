//! Per-worker execution context: event emission and stop signalling.

use super::messages::{Command, Event, EventEnvelope};
use super::state::{StateCell, WorkerState};
use crate::capability::CapabilityId;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, trace};

/// Sends events from one worker to the orchestrator.
///
/// Event names outside the capability contract are dropped and logged, as
/// are events nobody subscribed to during wiring. Cheap to clone; helper
/// tasks spawned by a worker carry their own copy.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    capability: CapabilityId,
    tx: mpsc::UnboundedSender<EventEnvelope>,
    subscribed: Option<Arc<HashSet<&'static str>>>,
    generation: u64,
}

impl EventEmitter {
    /// Emitter delivering every contract event.
    pub fn new(capability: CapabilityId, tx: mpsc::UnboundedSender<EventEnvelope>) -> Self {
        Self {
            capability,
            tx,
            subscribed: None,
            generation: 0,
        }
    }

    /// Restrict delivery to the given event names.
    #[must_use]
    pub fn with_subscriptions(mut self, events: HashSet<&'static str>) -> Self {
        self.subscribed = Some(Arc::new(events));
        self
    }

    /// Stamp every envelope with the worker's generation.
    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn capability(&self) -> CapabilityId {
        self.capability
    }

    /// Emit `event`. Returns whether it was delivered.
    pub fn emit(&self, event: Event) -> bool {
        let name = event.name();
        if !self.capability.contract().declares_event(name) {
            error!(
                capability = %self.capability,
                event = name,
                "event outside capability contract dropped"
            );
            return false;
        }
        if let Some(subscribed) = &self.subscribed {
            if !subscribed.contains(name) {
                trace!(capability = %self.capability, event = name, "unsubscribed event dropped");
                return false;
            }
        }
        if self
            .tx
            .send(EventEnvelope::new(self.capability, event).with_generation(self.generation))
            .is_err()
        {
            debug!(capability = %self.capability, event = name, "event receiver closed");
            return false;
        }
        true
    }

    /// Emit a structured `error` event.
    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emit(Event::Error {
            message: message.into(),
        })
    }

    /// Emit a transient `status` message for the UI.
    pub fn status(&self, message: impl Into<String>, duration: Duration) -> bool {
        self.emit(Event::Status {
            message: message.into(),
            duration,
        })
    }
}

/// Thread-safe stop/shutdown control for one worker.
///
/// Both requests are idempotent and never block. `stop` lets an in-flight
/// command finish; `shutdown` also abandons it.
#[derive(Debug, Clone)]
pub struct WorkerControl {
    stop: CancellationToken,
    shutdown: CancellationToken,
    state: StateCell,
}

impl WorkerControl {
    pub fn new(state: StateCell) -> Self {
        let shutdown = CancellationToken::new();
        let stop = shutdown.child_token();
        Self {
            stop,
            shutdown,
            state,
        }
    }

    /// Request cooperative termination.
    pub fn stop(&self) {
        self.mark_stop_requested();
        self.stop.cancel();
    }

    /// Request termination and abandon any in-flight command.
    pub fn shutdown(&self) {
        self.mark_stop_requested();
        self.shutdown.cancel();
    }

    fn mark_stop_requested(&self) {
        match self.state.get() {
            // Never launched: nothing will run, so it is already finished.
            WorkerState::Constructed => {
                self.state.advance(WorkerState::Stopped);
            }
            _ => {
                self.state.advance(WorkerState::StopRequested);
            }
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }
}

/// Everything a running worker needs: its emitter and its stop signals.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    emitter: EventEmitter,
    control: WorkerControl,
}

impl WorkerContext {
    pub fn new(emitter: EventEmitter, control: WorkerControl) -> Self {
        Self { emitter, control }
    }

    /// Context wired to a fresh, unfiltered event channel.
    ///
    /// Useful for driving a worker directly without a supervisor.
    pub fn standalone(capability: CapabilityId) -> (Self, mpsc::UnboundedReceiver<EventEnvelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = WorkerControl::new(StateCell::new(WorkerState::Started));
        (Self::new(EventEmitter::new(capability, tx), control), rx)
    }

    pub fn capability(&self) -> CapabilityId {
        self.emitter.capability()
    }

    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    pub fn control(&self) -> &WorkerControl {
        &self.control
    }

    pub fn emit(&self, event: Event) -> bool {
        self.emitter.emit(event)
    }

    pub fn error(&self, message: impl Into<String>) -> bool {
        self.emitter.error(message)
    }

    pub fn status(&self, message: impl Into<String>, duration: Duration) -> bool {
        self.emitter.status(message, duration)
    }

    /// Whether a stop (or shutdown) has been requested.
    pub fn is_stopping(&self) -> bool {
        self.control.is_stop_requested()
    }

    /// Resolves once a stop (or shutdown) has been requested.
    pub fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.control.stop.cancelled()
    }

    /// Resolves once a shutdown has been requested.
    pub fn shutdown_requested(&self) -> WaitForCancellationFuture<'_> {
        self.control.shutdown.cancelled()
    }

    /// Token cancelled on stop, for helper tasks spawned by the worker.
    pub fn stop_token(&self) -> CancellationToken {
        self.control.stop.clone()
    }

    /// Stop from inside the worker (e.g. on a `stop` command).
    pub fn request_stop(&self) {
        self.control.stop();
    }

    /// Record that the worker is serving.
    pub fn mark_running(&self) {
        self.control.state.advance(WorkerState::Running);
    }

    pub fn state(&self) -> WorkerState {
        self.control.state.get()
    }
}

/// Receiving half of a worker's command queue.
#[derive(Debug)]
pub struct CommandInbox {
    rx: mpsc::UnboundedReceiver<Command>,
}

impl CommandInbox {
    /// Next command, or `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Command> {
        self.rx.recv().await
    }

    /// Next queued command without waiting.
    pub fn try_recv(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

/// Create a command queue for one worker.
pub fn command_channel() -> (mpsc::UnboundedSender<Command>, CommandInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, CommandInbox { rx })
}
