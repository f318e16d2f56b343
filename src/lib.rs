//! # bgring - Asynchronous I/O Ring with Kernel-Selected Buffer Groups
//!
//! bgring drives reads through a submission/completion ring. Instead of
//! naming a destination, a read can name a buffer group: a pool of
//! equally sized buffers handed to the kernel in advance. The kernel picks a
//! buffer from the pool, most recently provided first, and reports its id
//! with the result.
//!
//! ## Features
//!
//! - **Two kernel facilities**: an in-process soft kernel and Linux io_uring
//! - **Buffer groups**: contiguous ids, LIFO selection, explicit hand-back
//! - **Fixed reads**: caller buffers that travel with the operation
//! - **Coordination**: shared counters and flags, a re-entrant section,
//!   CPU pinning, and a ring shared between threads with one completion waiter
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   submit   ┌──────────────────────────────┐
//! │  Submitter   │──────────▶│         RingContext           │
//! └──────────────┘            │  pending ops │ GroupRegistry  │
//! ┌──────────────┐  complete  │──────────────┴────────────────│
//! │CompletionWait│◀──────────│   Driver (soft | io_uring)     │
//! └──────────────┘            └──────────────────────────────┘
//!         ▲
//!         │ SharedRing: section + designated waiter
//! ┌──────────────┐
//! │ Coordinator  │  counters, flags, latches, pinning
//! └──────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::os::fd::AsRawFd;
//! use bgring::{BufferRegion, RingContext, Selector};
//!
//! # fn main() -> bgring::Result<()> {
//! let file = std::fs::File::open("/etc/hostname")?;
//! let mut ring = RingContext::create(16)?;
//! ring.provide_and_wait(BufferRegion::for_buffers(0x50, 3)?, 0x50, 3, 0, 0)?;
//!
//! ring.submit_read(file.as_raw_fd(), 0x50, 0, Selector::GroupId(0))?;
//! let completion = ring.wait_one()?;
//! let bid = completion.buffer_id().expect("selecting read");
//! println!("buffer {}: {:?}", bid, ring.buffer(0, bid)?);
//! ring.recycle(0, bid)?;
//! # Ok(())
//! # }
//! ```

pub mod buffers;
pub mod error;
pub mod ring;
pub mod ringbuf;
pub mod sync;

// Main API re-exports
pub use buffers::{
    BufferDescriptor, BufferGroup, BufferId, BufferRegion, BufferState, GroupId, GroupRegistry,
    GroupStats,
};
pub use error::{RingError, Result};
pub use ring::{
    Backend, Completion, CompletionKind, CompletionWaiter, Driver, RingConfig, RingConfigBuilder,
    RingContext, RingStats, Selector, SubmissionToken, Submitter,
};
pub use sync::{
    pin_current_thread, Coordinator, CoordinatorBuilder, DesignatedWaiter, EventNotifier,
    SharedRing, StateBacking,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 3;
pub const VERSION_PATCH: u32 = 0;

/// Default configuration constants
pub mod config {
    pub use crate::ring::config::{DEFAULT_QUEUE_DEPTH, MAX_QUEUE_DEPTH};

    /// Default buffer length used by the command line tool
    pub const DEFAULT_BUFFER_LENGTH: usize = 0x50;

    /// Default number of buffers per group used by the command line tool
    pub const DEFAULT_BUFFER_COUNT: usize = 3;
}
