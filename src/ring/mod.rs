//! The submission/completion ring
//!
//! A [`RingContext`] owns one kernel facility (a [`Driver`]), the buffer
//! groups registered on it and the operations in flight. Reads are queued
//! through a [`Submitter`] and consumed through a [`CompletionWaiter`]; a
//! buffer-selecting read names a group instead of a destination and the
//! kernel reports which buffer it filled.

pub mod completion;
pub mod config;
pub mod context;
pub mod driver;
pub mod entry;
pub mod provision;
pub mod stats;
pub mod submit;

pub use completion::CompletionWaiter;
pub use config::{Backend, RingConfig, RingConfigBuilder, DEFAULT_QUEUE_DEPTH, MAX_QUEUE_DEPTH};
pub use context::RingContext;
pub use driver::{Driver, SoftDriver};
#[cfg(target_os = "linux")]
pub use driver::UringDriver;
pub use entry::{
    Completion, CompletionEntry, CompletionKind, Operation, Selector, SubmissionEntry,
    SubmissionToken,
};
pub use stats::RingStats;
pub use submit::Submitter;
