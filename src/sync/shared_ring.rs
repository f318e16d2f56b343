//! A ring shared between threads
//!
//! A plain [`RingContext`] needs `&mut` for every call, so the compiler
//! rejects handing it to several threads at once:
//!
//! ```compile_fail
//! use bgring::RingContext;
//!
//! let mut ring = RingContext::create(8).unwrap();
//! let shared = &mut ring;
//! std::thread::scope(|s| {
//!     s.spawn(move || shared.close());
//!     s.spawn(move || shared.close());
//! });
//! ```
//!
//! `SharedRing` is the supported way to do it. Submissions and provisioning
//! run inside the coordinator's critical section, and a single
//! [`DesignatedWaiter`] consumes completions. The waiter parks on the
//! kernel's completion signal without holding the ring lock, so submitters
//! are never blocked behind it.

use std::{
    os::fd::RawFd,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use log::debug;
use parking_lot::Mutex;

use crate::buffers::{BufferId, BufferRegion, GroupId};
use crate::error::{RingError, Result};
use crate::ring::{Completion, RingContext, RingStats, Selector, SubmissionToken};

use super::{coordinator::Coordinator, notify::EventNotifier};

/// Ring context usable from several threads
pub struct SharedRing {
    coordinator: Coordinator,
    ring: Mutex<RingContext>,
    signal: Arc<EventNotifier>,
    poll: Duration,
    waiter_claimed: AtomicBool,
}

impl SharedRing {
    /// Share `ring` under `coordinator`'s critical section
    pub fn new(ring: RingContext, coordinator: Coordinator) -> Result<Arc<Self>> {
        let signal = ring.completion_signal()?;
        let poll = ring.config().completion_poll;

        Ok(Arc::new(Self {
            coordinator,
            ring: Mutex::new(ring),
            signal,
            poll,
            waiter_claimed: AtomicBool::new(false),
        }))
    }

    /// Coordinator guarding submissions
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Run `f` on the ring inside the critical section
    pub fn with_ring<R>(&self, f: impl FnOnce(&mut RingContext) -> R) -> R {
        let _section = self.coordinator.section();
        let mut ring = self.ring.lock();
        f(&mut ring)
    }

    /// Provide buffers; see [`RingContext::provide`]
    pub fn provide(
        &self,
        region: BufferRegion,
        length: usize,
        count: usize,
        group_id: GroupId,
        bid_start: BufferId,
    ) -> Result<SubmissionToken> {
        self.with_ring(|ring| ring.provide(region, length, count, group_id, bid_start))
    }

    /// Submit a read; see [`RingContext::submit_read`]
    pub fn submit_read(
        &self,
        source: RawFd,
        size: i64,
        offset: i64,
        selector: Selector,
    ) -> Result<SubmissionToken> {
        self.with_ring(|ring| ring.submit_read(source, size, offset, selector))
    }

    /// Hand a buffer back to the kernel; see [`RingContext::recycle`]
    pub fn recycle(&self, group_id: GroupId, buffer_id: BufferId) -> Result<SubmissionToken> {
        self.with_ring(|ring| ring.recycle(group_id, buffer_id))
    }

    /// Retire a selected buffer; see [`RingContext::release`]
    pub fn release(&self, group_id: GroupId, buffer_id: BufferId) -> Result<()> {
        self.with_ring(|ring| ring.release(group_id, buffer_id))
    }

    /// Copy of the bytes read into a selected buffer
    pub fn buffer_contents(&self, group_id: GroupId, buffer_id: BufferId) -> Result<Vec<u8>> {
        let ring = self.ring.lock();
        ring.buffer(group_id, buffer_id).map(<[u8]>::to_vec)
    }

    /// Operations whose completion has not been consumed
    pub fn in_flight(&self) -> usize {
        self.ring.lock().in_flight()
    }

    /// Snapshot of the ring statistics
    pub fn stats(&self) -> RingStats {
        self.ring.lock().stats().clone()
    }

    /// Close the ring; see [`RingContext::close`]
    pub fn close(&self) -> Result<()> {
        self.with_ring(|ring| ring.close())
    }

    /// Become the thread that consumes completions
    ///
    /// Only one waiter exists at a time; a second claim fails with
    /// `Coordination` until the first waiter is dropped.
    pub fn claim_waiter(self: &Arc<Self>) -> Result<DesignatedWaiter> {
        if self
            .waiter_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RingError::coordination(
                "Completion waiter already claimed",
            ));
        }

        debug!("{}: completion waiter claimed", self.coordinator.name());
        Ok(DesignatedWaiter {
            shared: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for SharedRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRing")
            .field("coordinator", &self.coordinator.name())
            .field("waiter_claimed", &self.waiter_claimed.load(Ordering::Relaxed))
            .finish()
    }
}

/// The single consumer of a shared ring's completions
pub struct DesignatedWaiter {
    shared: Arc<SharedRing>,
}

impl DesignatedWaiter {
    /// Consume one completion if one is ready
    pub fn try_wait_one(&self) -> Result<Option<Completion>> {
        self.shared.ring.lock().try_wait_one()
    }

    /// Block until one completion is available and consume it
    pub fn wait_one(&self) -> Result<Completion> {
        loop {
            if let Some(completion) = self.try_wait_one()? {
                return Ok(completion);
            }
            self.shared.signal.wait(Some(self.shared.poll))?;
        }
    }

    /// Like [`wait_one`](Self::wait_one), giving up with `Coordination`
    /// after `timeout`
    pub fn wait_one_timeout(&self, timeout: Duration) -> Result<Completion> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(completion) = self.try_wait_one()? {
                return Ok(completion);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(RingError::coordination(format!(
                    "No completion within {:?}",
                    timeout
                )));
            }
            self.shared
                .signal
                .wait(Some(self.shared.poll.min(deadline - now)))?;
        }
    }

    /// Ring this waiter consumes from
    pub fn shared(&self) -> &Arc<SharedRing> {
        &self.shared
    }
}

impl Drop for DesignatedWaiter {
    fn drop(&mut self) {
        self.shared.waiter_claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_ring() -> Arc<SharedRing> {
        let coordinator = Coordinator::builder("shared-test").build().unwrap();
        SharedRing::new(RingContext::create(8).unwrap(), coordinator).unwrap()
    }

    #[test]
    fn test_single_waiter() {
        let shared = shared_ring();
        let waiter = shared.claim_waiter().unwrap();
        assert!(matches!(
            shared.claim_waiter(),
            Err(RingError::Coordination { .. })
        ));

        drop(waiter);
        assert!(shared.claim_waiter().is_ok());
    }

    #[test]
    fn test_waiter_times_out_without_work() {
        let shared = shared_ring();
        let waiter = shared.claim_waiter().unwrap();
        assert!(matches!(
            waiter.wait_one_timeout(Duration::from_millis(20)),
            Err(RingError::Coordination { .. })
        ));
    }

    #[test]
    fn test_provide_through_shared_ring() {
        let shared = shared_ring();
        let waiter = shared.claim_waiter().unwrap();
        let token = shared
            .provide(BufferRegion::for_buffers(64, 4).unwrap(), 64, 4, 0, 0)
            .unwrap();

        let completion = waiter.wait_one().unwrap();
        assert_eq!(completion.token, token);
        assert_eq!(shared.in_flight(), 0);
        assert_eq!(shared.stats().provided_buffers, 4);
    }
}
