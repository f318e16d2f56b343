//! Ring configuration

use std::time::Duration;

use log::warn;

use crate::error::{RingError, Result};

/// Default submission queue depth
pub const DEFAULT_QUEUE_DEPTH: u32 = 256;

/// Largest depth the kernel facility accepts
pub const MAX_QUEUE_DEPTH: u32 = 32768;

/// Kernel facility that executes submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process worker thread; always available, selects buffers LIFO
    Soft,
    /// Linux io_uring
    Kernel,
    /// io_uring when the running kernel allows it, `Soft` otherwise
    Auto,
}

impl Default for Backend {
    fn default() -> Self {
        Self::Soft
    }
}

impl Backend {
    /// Get a human-readable name for the backend
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Soft => "soft",
            Backend::Kernel => "kernel",
            Backend::Auto => "auto",
        }
    }

    /// Parse a backend name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "soft" => Some(Backend::Soft),
            "kernel" | "io_uring" => Some(Backend::Kernel),
            "auto" => Some(Backend::Auto),
            _ => None,
        }
    }
}

/// Configuration for a ring
#[derive(Debug, Clone, PartialEq)]
pub struct RingConfig {
    /// Name used in logs
    pub name: String,
    /// Submission queue depth; also the bound on undrained operations
    pub queue_depth: u32,
    /// Kernel facility
    pub backend: Backend,
    /// How long a blocked waiter sleeps on the completion signal before
    /// re-checking the queue
    pub completion_poll: Duration,
    /// Whether `close` waits for outstanding operations
    pub drain_on_close: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            name: "ring".to_string(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            backend: Backend::default(),
            completion_poll: Duration::from_millis(10),
            drain_on_close: true,
        }
    }
}

impl RingConfig {
    /// Create a configuration with the given depth
    pub fn new(queue_depth: u32) -> Self {
        Self {
            queue_depth,
            ..Default::default()
        }
    }

    /// Set the name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set queue depth
    pub fn with_queue_depth(mut self, depth: u32) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Set backend
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set completion poll interval
    pub fn with_completion_poll(mut self, interval: Duration) -> Self {
        self.completion_poll = interval;
        self
    }

    /// Set drain-on-close behaviour
    pub fn with_drain_on_close(mut self, drain: bool) -> Self {
        self.drain_on_close = drain;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(RingError::ring_init("Queue depth must be positive"));
        }

        if self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(RingError::ring_init(format!(
                "Queue depth {} exceeds {}",
                self.queue_depth, MAX_QUEUE_DEPTH
            )));
        }

        if self.completion_poll.is_zero() {
            return Err(RingError::ring_init("Completion poll interval cannot be zero"));
        }

        Ok(())
    }

    /// Log settings that are valid but adjusted by the kernel
    pub(crate) fn warn_adjustments(&self) {
        if !self.queue_depth.is_power_of_two() {
            warn!(
                "{}: queue depth {} is not a power of two; the kernel rounds it up",
                self.name, self.queue_depth
            );
        }
    }

    /// Capacity of the submission queue slots
    pub fn sq_entries(&self) -> usize {
        (self.queue_depth as usize).next_power_of_two()
    }

    /// Capacity of the completion queue slots
    pub fn cq_entries(&self) -> usize {
        self.sq_entries() * 2
    }
}

/// Builder pattern for ring configuration
pub struct RingConfigBuilder {
    config: RingConfig,
}

impl RingConfigBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: RingConfig::default().with_name(name),
        }
    }

    /// Set queue depth
    pub fn queue_depth(mut self, depth: u32) -> Self {
        self.config.queue_depth = depth;
        self
    }

    /// Set backend
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set completion poll interval
    pub fn completion_poll(mut self, interval: Duration) -> Self {
        self.config.completion_poll = interval;
        self
    }

    /// Skip draining outstanding operations on close
    pub fn no_drain(mut self) -> Self {
        self.config.drain_on_close = false;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<RingConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RingConfig::default();
        config.validate().unwrap();
        assert_eq!(config.queue_depth, DEFAULT_QUEUE_DEPTH);
        assert_eq!(config.backend, Backend::Soft);
    }

    #[test]
    fn test_invalid_depths() {
        assert!(matches!(
            RingConfig::new(0).validate(),
            Err(RingError::RingInit { .. })
        ));
        assert!(matches!(
            RingConfig::new(MAX_QUEUE_DEPTH + 1).validate(),
            Err(RingError::RingInit { .. })
        ));
    }

    #[test]
    fn test_queue_slot_sizes() {
        let config = RingConfig::new(12);
        config.validate().unwrap();
        assert_eq!(config.sq_entries(), 16);
        assert_eq!(config.cq_entries(), 32);
    }

    #[test]
    fn test_builder() {
        let config = RingConfigBuilder::new("builder")
            .queue_depth(8)
            .backend(Backend::Auto)
            .no_drain()
            .build()
            .unwrap();
        assert_eq!(config.name, "builder");
        assert_eq!(config.queue_depth, 8);
        assert!(!config.drain_on_close);

        assert!(RingConfigBuilder::new("bad").queue_depth(0).build().is_err());
    }

    #[test]
    fn test_backend_names() {
        for backend in [Backend::Soft, Backend::Kernel, Backend::Auto] {
            assert_eq!(Backend::from_name(backend.name()), Some(backend));
        }
        assert_eq!(Backend::from_name("epoll"), None);
    }
}
