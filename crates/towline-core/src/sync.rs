//! Blocking convenience wrapper
//!
//! Runs the same poll loop the scheduler uses, but on the calling thread,
//! returning only once the transfer is completed. Prefer the asynchronous
//! path; this exists for callers without a runtime of their own.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::engine::driver::TransferDriver;
use crate::engine::scheduler::finalize;
use crate::error::{SchedulerCode, TransferError};
use crate::handle::{Transfer, TransferBuilder};

/// A transfer built for the blocking path but not yet driven.
///
/// The handle is available before [`perform`](BlockingTransfer::perform)
/// blocks, so another thread can hold it and cancel mid-flight; the loop
/// observes the cancel at its next iteration and `perform` returns after the
/// failure callback ran.
pub struct BlockingTransfer {
    handle: Arc<Transfer>,
    driver: TransferDriver,
}

impl BlockingTransfer {
    /// The transfer handle, for observing state or cancelling from another
    /// thread while `perform` blocks.
    pub fn handle(&self) -> Arc<Transfer> {
        self.handle.clone()
    }

    /// Drive the transfer to completion on the calling thread.
    ///
    /// Delegate callbacks run on the calling thread. The returned handle is
    /// always `Completed`; the outcome is reported through the delegate like
    /// on the asynchronous path.
    ///
    /// Must not be called from within an async runtime.
    pub fn perform(self) -> Arc<Transfer> {
        let BlockingTransfer { handle, driver } = self;

        let outcome = match tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .enable_time()
            .build()
        {
            Ok(runtime) => {
                match runtime.block_on(AssertUnwindSafe(driver.run()).catch_unwind()) {
                    Ok(outcome) => outcome,
                    Err(_) => Err(TransferError::scheduler(SchedulerCode::Internal)),
                }
            }
            Err(_) => Err(TransferError::scheduler(SchedulerCode::Internal)),
        };
        finalize(&handle, outcome);
        handle
    }
}

impl TransferBuilder {
    /// Build for the blocking path without registering with a scheduler.
    ///
    /// Fails fast with the same usage errors as
    /// [`start`](TransferBuilder::start).
    pub fn build_blocking(self) -> Result<BlockingTransfer, TransferError> {
        let (handle, driver) = self.into_parts()?;
        Ok(BlockingTransfer { handle, driver })
    }
}

/// Build and drive a transfer to completion on the calling thread.
///
/// Shorthand for [`TransferBuilder::build_blocking`] followed by
/// [`BlockingTransfer::perform`].
pub fn perform_blocking(builder: TransferBuilder) -> Result<Arc<Transfer>, TransferError> {
    Ok(builder.build_blocking()?.perform())
}
