//! Event notification using eventfd
//!
//! A notifier is the doorbell between the ring owner and the kernel side:
//! the software kernel rings it after posting completions, io_uring rings it
//! through a registered eventfd, and waiters park on it instead of spinning.
//! The eventfd counter is level-triggered, so a notification posted before
//! the waiter parks is never lost.

use std::{
    os::fd::{AsRawFd, OwnedFd, RawFd},
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags},
    sys::eventfd::{eventfd, EfdFlags},
    unistd::{read, write},
};

use crate::error::{RingError, Result};

/// Event-based notifier backed by a non-blocking eventfd
#[derive(Debug)]
pub struct EventNotifier {
    event_fd: OwnedFd,
    notify_count: AtomicU64,
    wait_count: AtomicU64,
}

impl EventNotifier {
    /// Create a new event notifier
    pub fn new() -> Result<Self> {
        let event_fd = eventfd(0, EfdFlags::EFD_CLOEXEC | EfdFlags::EFD_NONBLOCK)
            .map_err(|e| RingError::from_io(e.into(), "Failed to create eventfd"))?;

        Ok(Self {
            event_fd,
            notify_count: AtomicU64::new(0),
            wait_count: AtomicU64::new(0),
        })
    }

    /// Wake anyone waiting on this notifier
    pub fn notify(&self) -> Result<()> {
        self.notify_count.fetch_add(1, Ordering::Relaxed);

        let buf = 1u64.to_ne_bytes();
        match write(self.event_fd.as_raw_fd(), &buf) {
            Ok(_) => Ok(()),
            // Counter saturated; a wakeup is already pending
            Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(RingError::from_io(e.into(), "Failed to signal eventfd")),
        }
    }

    /// Wait for a notification
    ///
    /// Returns `false` when the timeout elapsed first. Spurious wakeups are
    /// possible; callers re-check their condition in a loop.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<bool> {
        self.wait_count.fetch_add(1, Ordering::Relaxed);

        let timeout_ms = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);
        let mut fds = [PollFd::new(&self.event_fd, PollFlags::POLLIN)];

        match poll(&mut fds, timeout_ms) {
            Ok(0) => Ok(false),
            Ok(_) => {
                self.drain();
                Ok(true)
            }
            Err(Errno::EINTR) => Ok(false),
            Err(e) => Err(RingError::from_io(e.into(), "Failed to poll eventfd")),
        }
    }

    /// Clear any pending notification without blocking
    pub fn drain(&self) {
        let mut buf = [0u8; 8];
        // EAGAIN just means nothing was pending
        let _ = read(self.event_fd.as_raw_fd(), &mut buf);
    }

    /// File descriptor for external registration (io_uring eventfd)
    pub fn raw_fd(&self) -> RawFd {
        self.event_fd.as_raw_fd()
    }

    /// Get notification statistics
    pub fn stats(&self) -> NotificationStats {
        NotificationStats {
            notify_count: self.notify_count.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for a notifier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotificationStats {
    pub notify_count: u64,
    pub wait_count: u64,
}
