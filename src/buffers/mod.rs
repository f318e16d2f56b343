//! Buffer groups and the memory that backs them
//!
//! This module provides the pool side of the engine: owned regions carved
//! into equally sized buffers, descriptors tracking each buffer's lifecycle,
//! and the per-ring registry of groups.

pub mod descriptor;
pub mod group;
pub mod region;
pub mod registry;
pub mod stats;

// Re-export main types
pub use descriptor::{BufferDescriptor, BufferId, BufferState, GroupId};
pub use group::{BufferGroup, ProvideBatch, MAX_BUFFER_LENGTH};
pub use region::{BufferRegion, DEFAULT_REGION_ALIGNMENT};
pub use registry::GroupRegistry;
pub use stats::GroupStats;
