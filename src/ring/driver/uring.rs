//! Linux io_uring driver
//!
//! Buffer selection here is done by the running kernel. Recent kernels hand
//! out provided buffers in the order they were added rather than LIFO; the
//! group mirror above this driver counts such selections instead of assuming
//! an order.

use std::{sync::Arc, time::Duration};

use io_uring::{cqueue, opcode, squeue, types, IoUring};
use log::debug;

use crate::error::{RingError, Result};
use crate::ring::{
    config::{Backend, RingConfig},
    entry::{CompletionEntry, Operation, SubmissionEntry, SubmissionToken},
};
use crate::sync::notify::EventNotifier;

use super::Driver;

/// Driver backed by a kernel io_uring instance
pub struct UringDriver {
    ring: IoUring,
    completions: Arc<EventNotifier>,
    poll: Duration,
    unsubmitted: usize,
}

impl UringDriver {
    /// Set up an io_uring instance sized for `config`
    pub fn new(config: &RingConfig) -> Result<Self> {
        config.validate()?;

        let ring = IoUring::new(config.queue_depth)
            .map_err(|e| RingError::ring_init_io(e, "Failed to set up io_uring"))?;

        let completions = Arc::new(EventNotifier::new()?);
        ring.submitter()
            .register_eventfd(completions.raw_fd())
            .map_err(|e| RingError::ring_init_io(e, "Failed to register completion eventfd"))?;

        debug!(
            "{}: io_uring ready (sq={}, cq={})",
            config.name,
            ring.params().sq_entries(),
            ring.params().cq_entries()
        );

        Ok(Self {
            ring,
            completions,
            poll: config.completion_poll,
            unsubmitted: 0,
        })
    }

    /// Whether the running kernel lets this process create a ring
    pub fn is_available() -> bool {
        IoUring::new(2).is_ok()
    }

    fn encode(entry: &SubmissionEntry) -> squeue::Entry {
        let user_data = entry.token.as_raw();
        match entry.op {
            Operation::Read {
                fd,
                len,
                offset,
                buf_group: Some(group),
                ..
            } => opcode::Read::new(types::Fd(fd), std::ptr::null_mut(), len)
                .offset(offset)
                .buf_group(group)
                .build()
                .flags(squeue::Flags::BUFFER_SELECT)
                .user_data(user_data),
            Operation::Read {
                fd,
                addr,
                len,
                offset,
                buf_group: None,
            } => opcode::Read::new(types::Fd(fd), addr as *mut u8, len)
                .offset(offset)
                .build()
                .user_data(user_data),
            Operation::ProvideBuffers {
                addr,
                len,
                count,
                group,
                bid_start,
            } => opcode::ProvideBuffers::new(addr as *mut u8, len as i32, count, group, bid_start)
                .build()
                .user_data(user_data),
        }
    }
}

impl Driver for UringDriver {
    fn backend(&self) -> Backend {
        Backend::Kernel
    }

    fn push(&mut self, entry: SubmissionEntry) -> Result<()> {
        let sqe = Self::encode(&entry);
        let mut sq = self.ring.submission();
        let capacity = sq.capacity();
        let queued = sq.len();

        // The entry only carries addresses of memory the ring context keeps
        // alive until the matching completion is reaped
        unsafe { sq.push(&sqe) }.map_err(|_| RingError::queue_full(capacity as u32, queued))?;
        self.unsubmitted += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let submitted = self
            .ring
            .submit()
            .map_err(|e| RingError::from_io(e, "io_uring_enter failed"))?;
        self.unsubmitted = self.unsubmitted.saturating_sub(submitted);
        Ok(submitted)
    }

    fn reap(&mut self) -> Result<Option<CompletionEntry>> {
        Ok(self.ring.completion().next().map(|cqe| CompletionEntry {
            token: SubmissionToken::from_raw(cqe.user_data()),
            result: cqe.result(),
            buffer_id: cqueue::buffer_select(cqe.flags()),
        }))
    }

    fn wait(&mut self) -> Result<()> {
        if !self.ring.completion().is_empty() {
            return Ok(());
        }
        if self.unsubmitted > 0 {
            self.submit()?;
        }
        self.completions.wait(Some(self.poll))?;
        Ok(())
    }

    fn completion_signal(&self) -> Arc<EventNotifier> {
        Arc::clone(&self.completions)
    }
}
