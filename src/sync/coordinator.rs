//! Concurrency coordinator
//!
//! A coordinator bundles the shared state of one session: named counters and
//! flags, a re-entrant critical section, and helpers to start participant
//! threads. It never touches a ring itself; [`SharedRing`](super::SharedRing)
//! runs ring calls inside its section.
//!
//! Latches follow one pattern: the publisher finishes its writes, then calls
//! [`Coordinator::publish`]; a waiter that observes the flag through
//! [`Coordinator::wait_for_flag`] also observes every write made before the
//! publish.

use std::{
    hint,
    sync::{
        atomic::{fence, AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, warn};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::{RingError, Result};

use super::{
    affinity::pin_current_thread,
    state::{SharedState, SlotKind, StateBacking},
};

const SPIN_LIMIT: u32 = 64;
const YIELD_LIMIT: u32 = 128;
const MAX_BACKOFF: Duration = Duration::from_millis(1);

/// Builder for a coordinator's state layout
#[derive(Debug)]
pub struct CoordinatorBuilder {
    name: String,
    slots: Vec<(String, SlotKind)>,
    backing: StateBacking,
}

impl CoordinatorBuilder {
    /// Start a layout
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
            backing: StateBacking::Heap,
        }
    }

    /// Declare a counter
    pub fn counter(mut self, name: impl Into<String>) -> Self {
        self.slots.push((name.into(), SlotKind::Counter));
        self
    }

    /// Declare a flag
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.slots.push((name.into(), SlotKind::Flag));
        self
    }

    /// Place the state in a mapping shared across `fork`
    pub fn shared_across_fork(mut self) -> Self {
        self.backing = StateBacking::MemFd;
        self
    }

    /// Build the coordinator
    pub fn build(self) -> Result<Coordinator> {
        let state = SharedState::new(&self.name, self.slots, self.backing)?;
        debug!(
            "{}: coordinator ready with {} slots ({:?})",
            self.name,
            state.len(),
            state.backing()
        );

        Ok(Coordinator {
            inner: Arc::new(CoordinatorInner {
                name: self.name,
                state,
                section: ReentrantMutex::new(()),
                torn_down: AtomicBool::new(false),
            }),
        })
    }
}

struct CoordinatorInner {
    name: String,
    state: SharedState,
    section: ReentrantMutex<()>,
    torn_down: AtomicBool,
}

/// Shared counters, flags and critical section of one session
///
/// Cloning is cheap; every clone refers to the same state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    /// Start a layout
    pub fn builder(name: impl Into<String>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(name)
    }

    /// Session name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Underlying state table
    pub fn state(&self) -> &SharedState {
        &self.inner.state
    }

    /// Enter the critical section
    ///
    /// The section is re-entrant: a thread already inside may enter again.
    /// The guard cannot leave the thread that took it.
    pub fn section(&self) -> ReentrantMutexGuard<'_, ()> {
        self.inner.section.lock()
    }

    /// Run `f` inside the critical section
    pub fn critical<R>(&self, f: impl FnOnce() -> R) -> R {
        let _section = self.section();
        f()
    }

    /// Set a flag after all earlier writes of this thread
    pub fn publish(&self, flag: &str) -> Result<()> {
        let slot = self.inner.state.slot(flag, SlotKind::Flag)?;
        fence(Ordering::SeqCst);
        slot.store(1, Ordering::Release);
        Ok(())
    }

    /// Lower a flag
    pub fn clear(&self, flag: &str) -> Result<()> {
        self.inner
            .state
            .slot(flag, SlotKind::Flag)?
            .store(0, Ordering::Release);
        Ok(())
    }

    /// Whether a flag is set
    pub fn is_set(&self, flag: &str) -> Result<bool> {
        Ok(self
            .inner
            .state
            .slot(flag, SlotKind::Flag)?
            .load(Ordering::Acquire)
            != 0)
    }

    /// Block until a flag is set
    ///
    /// Polls with backoff: spinning first, then yielding, then sleeping.
    /// Fails with `Coordination` on timeout or when the session is torn down.
    pub fn wait_for_flag(&self, flag: &str, timeout: Option<Duration>) -> Result<()> {
        let slot = self.inner.state.slot(flag, SlotKind::Flag)?;
        self.poll_until(timeout, || slot.load(Ordering::Acquire) != 0)
            .map_err(|e| self.describe_wait(e, format!("flag '{}'", flag)))
    }

    /// Add `delta` to a counter inside the critical section; returns the new value
    pub fn add(&self, counter: &str, delta: i64) -> Result<i64> {
        let slot = self.inner.state.slot(counter, SlotKind::Counter)?;
        let _section = self.section();
        Ok(slot.fetch_add(delta, Ordering::AcqRel) + delta)
    }

    /// Current value of a counter
    pub fn counter(&self, counter: &str) -> Result<i64> {
        Ok(self
            .inner
            .state
            .slot(counter, SlotKind::Counter)?
            .load(Ordering::Acquire))
    }

    /// Overwrite a counter
    pub fn set_counter(&self, counter: &str, value: i64) -> Result<()> {
        let slot = self.inner.state.slot(counter, SlotKind::Counter)?;
        let _section = self.section();
        slot.store(value, Ordering::Release);
        Ok(())
    }

    /// Block until a counter reaches `at_least`; returns the observed value
    pub fn wait_for_count(
        &self,
        counter: &str,
        at_least: i64,
        timeout: Option<Duration>,
    ) -> Result<i64> {
        let slot = self.inner.state.slot(counter, SlotKind::Counter)?;
        self.poll_until(timeout, || slot.load(Ordering::Acquire) >= at_least)
            .map_err(|e| self.describe_wait(e, format!("counter '{}' >= {}", counter, at_least)))?;
        Ok(slot.load(Ordering::Acquire))
    }

    /// Start a participant thread, optionally pinned to `core`
    ///
    /// Pinning failures are logged and the participant runs unpinned.
    pub fn spawn_participant<F, T>(
        &self,
        name: impl Into<String>,
        core: Option<usize>,
        f: F,
    ) -> Result<JoinHandle<T>>
    where
        F: FnOnce(Coordinator) -> T + Send + 'static,
        T: Send + 'static,
    {
        let name = name.into();
        let coordinator = self.clone();
        let thread_name = format!("{}-{}", self.inner.name, name);

        thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                if let Some(core) = core {
                    match pin_current_thread(core) {
                        Ok(()) => debug!("participant {} pinned to CPU {}", name, core),
                        Err(e) => warn!("participant {} runs unpinned: {}", name, e),
                    }
                }
                f(coordinator)
            })
            .map_err(|e| RingError::from_io(e, "Failed to spawn participant"))
    }

    /// End the session; blocked waiters give up with `Coordination`
    pub fn teardown(&self) {
        if !self.inner.torn_down.swap(true, Ordering::AcqRel) {
            debug!("{}: coordinator torn down", self.inner.name);
        }
    }

    /// Whether the session was torn down
    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.load(Ordering::Acquire)
    }

    fn poll_until(
        &self,
        timeout: Option<Duration>,
        mut ready: impl FnMut() -> bool,
    ) -> std::result::Result<(), WaitFailure> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut attempt = 0u32;
        let mut sleep = Duration::from_micros(10);

        loop {
            if ready() {
                return Ok(());
            }
            if self.is_torn_down() {
                return Err(WaitFailure::TornDown);
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                return Err(WaitFailure::TimedOut);
            }

            attempt = attempt.saturating_add(1);
            if attempt < SPIN_LIMIT {
                hint::spin_loop();
            } else if attempt < YIELD_LIMIT {
                thread::yield_now();
            } else {
                thread::sleep(sleep);
                sleep = (sleep * 2).min(MAX_BACKOFF);
            }
        }
    }

    fn describe_wait(&self, failure: WaitFailure, what: String) -> RingError {
        match failure {
            WaitFailure::TimedOut => {
                RingError::coordination(format!("{}: timed out waiting for {}", self.inner.name, what))
            }
            WaitFailure::TornDown => RingError::coordination(format!(
                "{}: torn down while waiting for {}",
                self.inner.name, what
            )),
        }
    }
}

enum WaitFailure {
    TimedOut,
    TornDown,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("name", &self.inner.name)
            .field("state", &self.inner.state)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> Coordinator {
        Coordinator::builder("test")
            .flag("go")
            .counter("hits")
            .build()
            .unwrap()
    }

    #[test]
    fn test_section_is_reentrant() {
        let coordinator = coordinator();
        let outer = coordinator.section();
        let value = coordinator.critical(|| coordinator.add("hits", 2).unwrap());
        drop(outer);
        assert_eq!(value, 2);
    }

    #[test]
    fn test_wait_for_flag_times_out() {
        let coordinator = coordinator();
        let err = coordinator
            .wait_for_flag("go", Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(matches!(err, RingError::Coordination { .. }));
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn test_teardown_releases_waiters() {
        let coordinator = coordinator();
        let waiter = coordinator
            .spawn_participant("waiter", None, |c| c.wait_for_flag("go", None))
            .unwrap();

        thread::sleep(Duration::from_millis(10));
        coordinator.teardown();
        assert!(matches!(
            waiter.join().unwrap(),
            Err(RingError::Coordination { .. })
        ));
    }

    #[test]
    fn test_unknown_names() {
        let coordinator = coordinator();
        assert!(coordinator.publish("hits").is_err());
        assert!(coordinator.add("go", 1).is_err());
        assert!(coordinator.counter("nope").is_err());
    }
}
