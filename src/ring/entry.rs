//! Submission and completion entries
//!
//! `SubmissionEntry` and `CompletionEntry` are the raw records exchanged with
//! a driver. `Completion` is what the waiter hands back to callers once the
//! raw entry has been resolved against the pending-operation table and the
//! buffer groups.

use std::{fmt, os::fd::RawFd};

use crate::buffers::{BufferId, GroupId};

/// Opaque correlation token for one submitted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubmissionToken(u64);

impl SubmissionToken {
    /// Build a token from raw user data
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Raw user data carried through the kernel
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubmissionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Destination of a read
#[derive(Debug)]
pub enum Selector {
    /// Let the kernel pick a buffer from this group
    GroupId(GroupId),
    /// Read into a caller buffer; it travels with the operation and comes
    /// back in the completion
    FixedBuffer(Vec<u8>),
}

/// Operation encoded in a submission entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Read `len` bytes at `offset` from `fd`
    ///
    /// With `buf_group` set the read is buffer-selecting and `addr` is zero;
    /// otherwise `addr` is the destination.
    Read {
        fd: RawFd,
        addr: usize,
        len: u32,
        offset: u64,
        buf_group: Option<GroupId>,
    },
    /// Add `count` buffers of `len` bytes starting at `addr` to a group
    ProvideBuffers {
        addr: usize,
        len: u32,
        count: u16,
        group: GroupId,
        bid_start: BufferId,
    },
}

impl Operation {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Read {
                buf_group: Some(_), ..
            } => "read(select)",
            Operation::Read { .. } => "read",
            Operation::ProvideBuffers { .. } => "provide_buffers",
        }
    }
}

/// One request posted to the submission queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmissionEntry {
    pub token: SubmissionToken,
    pub op: Operation,
}

/// One result posted to the completion queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEntry {
    pub token: SubmissionToken,
    /// Bytes transferred, or a negated errno
    pub result: i32,
    /// Buffer chosen by the kernel; only set for selecting reads
    pub buffer_id: Option<BufferId>,
}

impl CompletionEntry {
    /// Whether the operation failed
    pub fn is_error(&self) -> bool {
        self.result < 0
    }
}

/// What a resolved completion refers to
#[derive(Debug, PartialEq, Eq)]
pub enum CompletionKind {
    /// A provide call was accepted by the kernel
    Provided {
        group_id: GroupId,
        bid_start: BufferId,
        count: u16,
    },
    /// A selecting read filled the buffer the kernel picked
    Selected {
        group_id: GroupId,
        buffer_id: BufferId,
    },
    /// A fixed-destination read; the caller's buffer, truncated to the bytes
    /// produced
    Fixed { buffer: Vec<u8> },
}

/// A successful completion as seen by callers
#[derive(Debug, PartialEq, Eq)]
pub struct Completion {
    pub token: SubmissionToken,
    /// Non-negative kernel result
    pub result: i32,
    /// Bytes the submission asked for; zero for provide calls
    pub requested: usize,
    pub kind: CompletionKind,
}

impl Completion {
    /// Bytes produced by a read
    pub fn bytes(&self) -> usize {
        match self.kind {
            CompletionKind::Provided { .. } => 0,
            _ => self.result as usize,
        }
    }

    /// Buffer id chosen by the kernel for a selecting read
    pub fn buffer_id(&self) -> Option<BufferId> {
        match self.kind {
            CompletionKind::Selected { buffer_id, .. } => Some(buffer_id),
            _ => None,
        }
    }

    /// Group of a selecting read or provide call
    pub fn group_id(&self) -> Option<GroupId> {
        match self.kind {
            CompletionKind::Selected { group_id, .. } | CompletionKind::Provided { group_id, .. } => {
                Some(group_id)
            }
            CompletionKind::Fixed { .. } => None,
        }
    }

    /// Whether a read produced fewer bytes than requested
    ///
    /// Short reads are a normal outcome (end of file, pipes, sockets); the
    /// caller either accepts the partial data or resubmits for the rest.
    pub fn is_short_read(&self) -> bool {
        !matches!(self.kind, CompletionKind::Provided { .. }) && self.bytes() < self.requested
    }

    /// Take back the caller buffer of a fixed read
    pub fn into_buffer(self) -> Option<Vec<u8>> {
        match self.kind {
            CompletionKind::Fixed { buffer } => Some(buffer),
            _ => None,
        }
    }
}
