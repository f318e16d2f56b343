//! Buffer descriptors and their lifecycle states

use std::fmt;

/// Buffer group identifier (bgid), as carried in a selecting read
pub type GroupId = u16;

/// Buffer identifier (bid) within a group, as returned in a completion
pub type BufferId = u16;

/// Lifecycle state of one pool slot
///
/// Ownership handed to the kernel is a state, not a move: a descriptor in
/// `Provided` may be written by the kernel at any time and must not be read
/// by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Registered, outside the kernel pool, owned by the application
    Free,
    /// In the kernel pool, eligible for selection
    Provided,
    /// Chosen by the kernel for a completed read, owned by the application
    Selected,
}

impl BufferState {
    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            BufferState::Free => "Free",
            BufferState::Provided => "Provided",
            BufferState::Selected => "Selected",
        }
    }
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One slot of a buffer group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Identity assigned at registration
    pub buffer_id: BufferId,
    /// Start address of the slot
    pub address: usize,
    /// Capacity of the slot in bytes
    pub length: usize,
    /// Current lifecycle state
    pub state: BufferState,
    /// Bytes produced by the read that selected this slot
    pub filled: usize,
    /// Index of the backing region inside the owning group
    pub(crate) region: usize,
}

impl BufferDescriptor {
    pub(crate) fn new(buffer_id: BufferId, address: usize, length: usize, region: usize) -> Self {
        Self {
            buffer_id,
            address,
            length,
            state: BufferState::Provided,
            filled: 0,
            region,
        }
    }

    /// Whether the kernel may currently select this slot
    pub fn is_provided(&self) -> bool {
        self.state == BufferState::Provided
    }

    /// Whether the application currently owns this slot's contents
    pub fn is_selected(&self) -> bool {
        self.state == BufferState::Selected
    }
}
