//! Workers: one running instance of a capability on its own task.
//!
//! A worker receives [`Command`]s through its [`CommandInbox`] and reports
//! back exclusively through [`Event`]s sent via its [`WorkerContext`].
//! Failures never cross the task boundary: the runner turns them into an
//! `error` event, and every worker emits `completed` as its last event.

pub mod context;
pub mod messages;
mod runner;
pub mod state;

pub use context::{CommandInbox, EventEmitter, WorkerContext, WorkerControl, command_channel};
pub use messages::{
    Command, CommandEnvelope, Event, EventEnvelope, Frame, NlpResponse, SegmentStyle, Voice,
};
pub use runner::run_worker;
pub use state::{StateCell, WorkerState};

use crate::capability::CapabilityId;
use crate::error::{Result, RobotError};
use async_trait::async_trait;

/// How a worker spends its time once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Idle until a command arrives.
    EventDriven,
    /// Runs [`Worker::run_loop`] until stopped.
    Looping,
}

/// Behaviour of one capability backend, real or fallback.
#[async_trait]
pub trait Worker: Send {
    /// Capability this worker implements.
    fn capability(&self) -> CapabilityId;

    fn activation(&self) -> Activation {
        if self.capability().is_looping() {
            Activation::Looping
        } else {
            Activation::EventDriven
        }
    }

    /// One-time initialization on the worker's own task.
    ///
    /// An error here emits `error`, marks the worker failed and ends it.
    async fn start(&mut self, _ctx: &WorkerContext) -> Result<()> {
        Ok(())
    }

    /// Handle one command. An error is reported as an `error` event and the
    /// worker keeps serving.
    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()>;

    /// Loop body for [`Activation::Looping`] workers.
    ///
    /// Must poll [`WorkerContext::is_stopping`] at least once per iteration
    /// and release its device before returning, on every path.
    async fn run_loop(&mut self, _inbox: &mut CommandInbox, _ctx: &WorkerContext) -> Result<()> {
        Err(RobotError::Worker(format!(
            "{} worker has no capture loop",
            self.capability()
        )))
    }

    /// Release resources. Called once, before `completed` is emitted.
    async fn shutdown(&mut self, _ctx: &WorkerContext) {}
}

/// Error for a command that does not belong to the worker's contract.
pub fn unsupported(capability: CapabilityId, command: &Command) -> RobotError {
    RobotError::Worker(format!(
        "{capability} worker does not handle command {}",
        command.name()
    ))
}
