//! Task body shared by every worker.

use super::context::{CommandInbox, WorkerContext};
use super::messages::Event;
use super::state::WorkerState;
use super::{Activation, Worker};
use crate::error::{Result, RobotError, panic_message};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// Drive `worker` until it stops, fails or its command queue closes.
///
/// The worker's resources are released through [`Worker::shutdown`] and the
/// final event is always `completed`, preceded by `error` on failure. Panics
/// inside the worker are caught and reported the same way.
pub async fn run_worker(mut worker: Box<dyn Worker>, mut inbox: CommandInbox, ctx: WorkerContext) {
    let capability = ctx.capability();
    debug!(%capability, "worker task started");

    let outcome = match AssertUnwindSafe(drive(worker.as_mut(), &mut inbox, &ctx))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => Err(RobotError::Worker(format!(
            "worker panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    if AssertUnwindSafe(worker.shutdown(&ctx))
        .catch_unwind()
        .await
        .is_err()
    {
        warn!(%capability, "worker panicked while releasing resources");
    }

    match outcome {
        Ok(()) => {
            ctx.control().state().advance(WorkerState::Stopped);
            info!(%capability, "worker stopped");
        }
        Err(e) => {
            error!(%capability, error = %e, "worker failed");
            ctx.error(e.to_string());
            ctx.control().state().advance(WorkerState::Failed);
        }
    }
    ctx.emit(Event::Completed);
}

async fn drive(worker: &mut dyn Worker, inbox: &mut CommandInbox, ctx: &WorkerContext) -> Result<()> {
    if ctx.is_stopping() {
        return Ok(());
    }
    worker.start(ctx).await?;

    match worker.activation() {
        Activation::Looping => worker.run_loop(inbox, ctx).await,
        Activation::EventDriven => {
            ctx.mark_running();
            serve(worker, inbox, ctx).await;
            Ok(())
        }
    }
}

async fn serve(worker: &mut dyn Worker, inbox: &mut CommandInbox, ctx: &WorkerContext) {
    let capability = ctx.capability();
    loop {
        let command = tokio::select! {
            biased;
            () = ctx.stopped() => break,
            command = inbox.recv() => match command {
                Some(command) => command,
                None => {
                    debug!(%capability, "command queue closed");
                    break;
                }
            },
        };

        let name = command.name();
        debug!(%capability, command = name, "handling command");
        tokio::select! {
            biased;
            () = ctx.shutdown_requested() => {
                warn!(%capability, command = name, "shutdown abandoned in-flight command");
                break;
            }
            result = worker.handle(command, ctx) => {
                if let Err(e) = result {
                    warn!(%capability, command = name, error = %e, "command failed");
                    ctx.error(e.to_string());
                }
            }
        }
    }
}
