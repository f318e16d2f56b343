//! Kernel facilities behind the ring
//!
//! A `Driver` is the kernel boundary: it accepts raw submission entries,
//! executes them asynchronously, and hands back raw completion entries.
//! Everything above this trait (pending-operation tracking, buffer group
//! state, validation) is shared by every facility.

use std::sync::Arc;

use crate::error::Result;
use crate::sync::notify::EventNotifier;

use super::{
    config::Backend,
    entry::{CompletionEntry, SubmissionEntry},
};

pub mod soft;
pub use soft::SoftDriver;

#[cfg(target_os = "linux")]
pub mod uring;
#[cfg(target_os = "linux")]
pub use uring::UringDriver;

/// A submission/completion facility
pub trait Driver: Send {
    /// Facility this driver talks to
    fn backend(&self) -> Backend;

    /// Place one entry in the submission queue
    ///
    /// Fails with `QueueFull` when no slot is free; nothing is queued then.
    fn push(&mut self, entry: SubmissionEntry) -> Result<()>;

    /// Hand queued entries to the kernel without waiting
    fn submit(&mut self) -> Result<usize>;

    /// Pop and acknowledge one completion if one is ready
    fn reap(&mut self) -> Result<Option<CompletionEntry>>;

    /// Block until at least one completion may be ready
    fn wait(&mut self) -> Result<()>;

    /// Signal raised whenever the kernel posts a completion
    fn completion_signal(&self) -> Arc<EventNotifier>;

    /// Block until one completion is ready, then pop and acknowledge it
    fn wait_completion(&mut self) -> Result<CompletionEntry> {
        loop {
            if let Some(entry) = self.reap()? {
                return Ok(entry);
            }
            self.wait()?;
        }
    }
}
