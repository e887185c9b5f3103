//! Multi-transfer scheduler
//!
//! One poll task services every registered transfer: all driver futures are
//! multiplexed on a single `FuturesUnordered`, so each wakeup is one
//! non-blocking readiness pass across all active transfers, and every
//! delegate callback runs synchronously inside that pass. Registration is an
//! unbounded channel send, safe from any thread. The loop idles when no
//! transfers are active and resumes on the next registration.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::FuturesUnordered;
use futures::{Future, FutureExt, StreamExt};
use tokio::sync::mpsc;
use towline_types::TransferState;
use tracing::{debug, error, info, warn};

use crate::engine::driver::TransferDriver;
use crate::error::{SchedulerCode, TransferError};
use crate::handle::Transfer;

type DriveFuture = Pin<Box<dyn Future<Output = (Arc<Transfer>, Result<(), TransferError>)> + Send>>;

enum Command {
    Register(TransferDriver),
    Shutdown,
}

/// Coordinates any number of concurrent transfers on one poll loop.
///
/// Create inside a tokio runtime. After [`Scheduler::shutdown`] (or drop),
/// new registrations are refused with a scheduler-domain error; transfers
/// already active are driven to completion before the loop exits.
pub struct Scheduler {
    command_tx: mpsc::UnboundedSender<Command>,
    shut_down: Arc<AtomicBool>,
}

impl Scheduler {
    /// Spawn the poll loop and return a handle to it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new() -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(poll_loop(command_rx));
        Self {
            command_tx,
            shut_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stop accepting registrations and let active transfers run out.
    ///
    /// Idempotent. Transfers registered concurrently with the shutdown that
    /// miss the loop are failed with a scheduler-domain error rather than
    /// left without a terminal callback.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::AcqRel) {
            info!("scheduler shutting down");
            let _ = self.command_tx.send(Command::Shutdown);
        }
    }

    /// Hand a transfer to the poll loop. Safe from any thread.
    pub(crate) fn register(&self, driver: TransferDriver) -> Result<(), TransferError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(TransferError::scheduler(SchedulerCode::ShutDown));
        }
        debug!("registering transfer for {}", driver.url());
        self.command_tx
            .send(Command::Register(driver))
            .map_err(|_| TransferError::scheduler(SchedulerCode::ShutDown))
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn poll_loop(mut command_rx: mpsc::UnboundedReceiver<Command>) {
    let mut active: FuturesUnordered<DriveFuture> = FuturesUnordered::new();

    loop {
        tokio::select! {
            command = command_rx.recv() => match command {
                Some(Command::Register(driver)) => active.push(drive(driver)),
                Some(Command::Shutdown) | None => break,
            },
            Some((handle, outcome)) = active.next(), if !active.is_empty() => {
                finalize(&handle, outcome);
            }
        }
    }

    // Refuse anything still queued so no handle is left without a terminal
    // callback, then finish what is already active.
    command_rx.close();
    while let Some(command) = command_rx.recv().await {
        if let Command::Register(driver) = command {
            finalize(
                &driver.handle_arc(),
                Err(TransferError::scheduler(SchedulerCode::ShutDown)),
            );
        }
    }
    while let Some((handle, outcome)) = active.next().await {
        finalize(&handle, outcome);
    }
    debug!("scheduler loop exited");
}

/// Wrap a driver so a panicking callback fails one transfer, not the loop.
fn drive(driver: TransferDriver) -> DriveFuture {
    let handle = driver.handle_arc();
    Box::pin(async move {
        let outcome = match AssertUnwindSafe(driver.run()).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(
                    "transfer for {} panicked while being serviced",
                    handle.url()
                );
                Err(TransferError::scheduler(SchedulerCode::Internal))
            }
        };
        (handle, outcome)
    })
}

/// Move a transfer to its terminal state and deliver the one terminal
/// callback.
///
/// Entry order: state becomes `Completed`, the error (if any) is recorded on
/// the handle, the delegate is notified exactly once, and the delegate
/// reference is released. A transfer that was canceling reports a
/// cancellation error regardless of what the engine observed during unwind.
pub(crate) fn finalize(handle: &Arc<Transfer>, outcome: Result<(), TransferError>) {
    let prior = handle.enter_completed();
    if prior == TransferState::Completed {
        warn!("duplicate terminal transition for {}", handle.url());
        return;
    }

    let outcome = if prior == TransferState::Canceling {
        // Cancellation wins over whatever the engine reported while unwinding
        Err(TransferError::cancelled())
    } else {
        outcome
    };

    let delegate = handle.release_delegate();

    match outcome {
        Ok(()) => {
            info!("transfer finished: {}", handle.url());
            if let Some(delegate) = delegate {
                let notified =
                    std::panic::catch_unwind(AssertUnwindSafe(|| delegate.on_finished(handle)));
                if notified.is_err() {
                    error!("delegate panicked in finish callback for {}", handle.url());
                }
            }
        }
        Err(error) => {
            let error = error
                .with_response_code(handle.last_response_code())
                .with_url(handle.url().clone());
            info!("transfer failed: {}: {}", handle.url(), error);
            handle.record_error(error.clone());
            if let Some(delegate) = delegate {
                let notified = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    delegate.on_failed(handle, &error)
                }));
                if notified.is_err() {
                    error!("delegate panicked in failure callback for {}", handle.url());
                }
            }
        }
    }
}
