//! Ring context: the single gateway to the kernel facility
//!
//! The context owns the driver, the buffer group registry and the table of
//! operations that have been submitted but whose completion has not been
//! consumed yet. Every mutating call takes `&mut self`; sharing a ring
//! between threads goes through [`SharedRing`](crate::sync::SharedRing).

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use log::{debug, info, trace, warn};

use crate::buffers::{GroupId, GroupRegistry, ProvideBatch};
use crate::error::{RingError, Result};
use crate::sync::notify::EventNotifier;

use super::{
    config::{Backend, RingConfig},
    driver::{Driver, SoftDriver},
    entry::{Completion, Operation, SubmissionEntry, SubmissionToken},
    stats::RingStats,
};

/// Book-keeping for one submitted operation
#[derive(Debug)]
pub(crate) enum Pending {
    /// Provide call, including single-buffer hand-backs
    Provide { batch: ProvideBatch },
    /// Read that lets the kernel pick a buffer from `group_id`
    SelectRead { group_id: GroupId, requested: usize },
    /// Read into a caller buffer the ring holds until completion
    FixedRead { buffer: Vec<u8>, requested: usize },
}

/// An asynchronous I/O ring with kernel-selected buffer groups
pub struct RingContext {
    pub(crate) config: RingConfig,
    // Declared before the registry and the pending table so the kernel side
    // shuts down before the memory it may write is freed
    pub(crate) driver: Option<Box<dyn Driver>>,
    pub(crate) groups: GroupRegistry,
    pub(crate) pending: HashMap<SubmissionToken, Pending>,
    /// Completions consumed while waiting for a specific token
    pub(crate) backlog: VecDeque<(SubmissionToken, Result<Completion>)>,
    next_token: u64,
    pub(crate) stats: RingStats,
}

impl RingContext {
    /// Create a ring of the given depth on the default backend
    pub fn create(queue_depth: u32) -> Result<Self> {
        Self::with_config(RingConfig::new(queue_depth))
    }

    /// Create a ring from a full configuration
    pub fn with_config(config: RingConfig) -> Result<Self> {
        config.validate()?;
        config.warn_adjustments();

        let driver: Box<dyn Driver> = match config.backend {
            Backend::Soft => Box::new(SoftDriver::new(&config)?),
            Backend::Kernel => kernel_driver(&config)?,
            Backend::Auto => match kernel_driver(&config) {
                Ok(driver) => driver,
                Err(e) => {
                    info!("{}: io_uring unavailable ({}), using soft kernel", config.name, e);
                    Box::new(SoftDriver::new(&config)?)
                }
            },
        };

        Self::with_driver(config, driver)
    }

    /// Create a ring around an existing driver
    pub fn with_driver(config: RingConfig, driver: Box<dyn Driver>) -> Result<Self> {
        config.validate()?;

        debug!(
            "{}: ring created (depth={}, backend={})",
            config.name,
            config.queue_depth,
            driver.backend().name()
        );

        Ok(Self {
            config,
            driver: Some(driver),
            groups: GroupRegistry::new(),
            pending: HashMap::new(),
            backlog: VecDeque::new(),
            next_token: 1,
            stats: RingStats::new(),
        })
    }

    /// Drain outstanding operations and release the kernel facility
    ///
    /// Completions consumed while draining are discarded. Closing twice is a
    /// no-op; every other call on a closed ring fails with `RingClosed`.
    pub fn close(&mut self) -> Result<()> {
        let backend = match self.driver.as_ref() {
            Some(driver) => driver.backend(),
            None => return Ok(()),
        };

        // A kernel ring keeps writing into caller memory until every
        // operation has completed, so it is always drained
        let drain = self.config.drain_on_close || backend == Backend::Kernel;
        let mut result = Ok(());
        if drain {
            result = self.drain();
        }

        self.backlog.clear();
        self.driver = None;

        debug!("{}: ring closed; {}", self.config.name, self.stats.summary());
        result
    }

    fn drain(&mut self) -> Result<()> {
        let mut discarded = 0usize;
        while !self.pending.is_empty() {
            let entry = self.driver_mut()?.wait_completion()?;
            if let Err(e) = self.resolve(entry) {
                debug!("{}: discarding failed completion while closing: {}", self.config.name, e);
            }
            discarded += 1;
        }
        if discarded > 0 {
            debug!("{}: drained {} operations on close", self.config.name, discarded);
        }
        Ok(())
    }

    /// Whether the ring was closed
    pub fn is_closed(&self) -> bool {
        self.driver.is_none()
    }

    /// Facility executing submissions, `None` once closed
    pub fn backend(&self) -> Option<Backend> {
        self.driver.as_ref().map(|d| d.backend())
    }

    /// Ring configuration
    pub fn config(&self) -> &RingConfig {
        &self.config
    }

    /// Maximum number of undrained operations
    pub fn queue_depth(&self) -> u32 {
        self.config.queue_depth
    }

    /// Operations submitted whose completion has not been consumed
    pub fn in_flight(&self) -> usize {
        self.pending.len() + self.backlog.len()
    }

    /// Ring statistics
    pub fn stats(&self) -> &RingStats {
        &self.stats
    }

    /// Signal raised whenever the kernel posts a completion
    pub fn completion_signal(&self) -> Result<Arc<EventNotifier>> {
        self.driver
            .as_ref()
            .map(|d| d.completion_signal())
            .ok_or(RingError::RingClosed)
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.driver.is_none() {
            return Err(RingError::RingClosed);
        }
        Ok(())
    }

    pub(crate) fn ensure_capacity(&mut self) -> Result<()> {
        let in_flight = self.in_flight();
        if in_flight >= self.config.queue_depth as usize {
            self.stats.queue_full_rejections += 1;
            return Err(RingError::queue_full(self.config.queue_depth, in_flight));
        }
        Ok(())
    }

    pub(crate) fn driver_mut(&mut self) -> Result<&mut (dyn Driver + 'static)> {
        self.driver.as_deref_mut().ok_or(RingError::RingClosed)
    }

    /// Queue one operation and ring the doorbell
    pub(crate) fn enqueue(&mut self, op: Operation, pending: Pending) -> Result<SubmissionToken> {
        let token = SubmissionToken::from_raw(self.next_token);
        let name = op.name();

        let driver = self.driver_mut()?;
        if let Err(e) = driver.push(SubmissionEntry { token, op }) {
            if matches!(e, RingError::QueueFull { .. }) {
                self.stats.queue_full_rejections += 1;
            }
            return Err(e);
        }
        if let Err(e) = driver.submit() {
            // The entry stays queued and goes out with the next enter
            warn!("{}: submit of {} failed: {}", self.config.name, token, e);
        }

        self.next_token += 1;
        self.pending.insert(token, pending);
        self.stats.submitted += 1;
        let in_flight = self.in_flight();
        self.stats.record_in_flight(in_flight);

        trace!("{}: submitted {} {}", self.config.name, token, name);
        Ok(token)
    }
}

impl Drop for RingContext {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("{}: error while closing ring: {}", self.config.name, e);
        }
    }
}

impl std::fmt::Debug for RingContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingContext")
            .field("name", &self.config.name)
            .field("queue_depth", &self.config.queue_depth)
            .field("backend", &self.backend())
            .field("in_flight", &self.in_flight())
            .field("groups", &self.groups.group_ids().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn kernel_driver(config: &RingConfig) -> Result<Box<dyn Driver>> {
    Ok(Box::new(super::driver::UringDriver::new(config)?))
}

#[cfg(not(target_os = "linux"))]
fn kernel_driver(_config: &RingConfig) -> Result<Box<dyn Driver>> {
    Err(RingError::ring_init("io_uring is only available on Linux"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_close() {
        let mut ring = RingContext::create(8).unwrap();
        assert_eq!(ring.queue_depth(), 8);
        assert_eq!(ring.backend(), Some(Backend::Soft));
        assert_eq!(ring.in_flight(), 0);

        ring.close().unwrap();
        assert!(ring.is_closed());
        assert_eq!(ring.backend(), None);
        ring.close().unwrap();
        assert!(matches!(ring.completion_signal(), Err(RingError::RingClosed)));
    }

    #[test]
    fn test_invalid_depth() {
        assert!(matches!(
            RingContext::create(0),
            Err(RingError::RingInit { .. })
        ));
        assert!(matches!(
            RingContext::create(40_000),
            Err(RingError::RingInit { .. })
        ));
    }

    #[test]
    fn test_auto_backend_always_builds() {
        let ring = RingContext::with_config(RingConfig::new(4).with_backend(Backend::Auto)).unwrap();
        assert!(matches!(
            ring.backend(),
            Some(Backend::Soft) | Some(Backend::Kernel)
        ));
    }
}
