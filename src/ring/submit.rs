//! Read submission

use std::os::fd::RawFd;

use crate::error::{RingError, Result};

use super::{
    context::{Pending, RingContext},
    entry::{Operation, Selector, SubmissionToken},
};

/// Builds and enqueues read operations on a ring
///
/// Submission validates its arguments, places one entry in the submission
/// queue and rings the doorbell. It never waits for the read itself.
pub struct Submitter<'r> {
    ring: &'r mut RingContext,
}

impl<'r> Submitter<'r> {
    pub(crate) fn new(ring: &'r mut RingContext) -> Self {
        Self { ring }
    }

    /// Submit a read of `size` bytes at `offset` from `source`
    ///
    /// With [`Selector::GroupId`] the kernel picks the destination buffer from
    /// that group and reports its id in the completion. With
    /// [`Selector::FixedBuffer`] the vector travels with the operation and is
    /// returned, truncated to the bytes produced, in the completion.
    ///
    /// Negative sizes or offsets, a size that does not fit the destination,
    /// and a source that is not an open descriptor are rejected here with
    /// `InvalidArgument`; nothing is queued then.
    pub fn submit_read(
        &mut self,
        source: RawFd,
        size: i64,
        offset: i64,
        selector: Selector,
    ) -> Result<SubmissionToken> {
        self.ring.ensure_open()?;

        if size < 0 {
            return Err(RingError::invalid_argument(
                "size",
                format!("Read size {} is negative", size),
            ));
        }
        if size > u32::MAX as i64 {
            return Err(RingError::invalid_argument(
                "size",
                format!("Read size {} exceeds {}", size, u32::MAX),
            ));
        }
        if offset < 0 {
            return Err(RingError::invalid_argument(
                "offset",
                format!("Read offset {} is negative", offset),
            ));
        }
        check_descriptor(source)?;

        let len = size as u32;
        let requested = size as usize;
        let (op, pending) = match selector {
            Selector::GroupId(group_id) => (
                Operation::Read {
                    fd: source,
                    addr: 0,
                    len,
                    offset: offset as u64,
                    buf_group: Some(group_id),
                },
                Pending::SelectRead {
                    group_id,
                    requested,
                },
            ),
            Selector::FixedBuffer(mut buffer) => {
                if requested > buffer.len() {
                    return Err(RingError::invalid_argument(
                        "size",
                        format!(
                            "Read size {} exceeds fixed buffer of {} bytes",
                            size,
                            buffer.len()
                        ),
                    ));
                }
                // The vector's heap block does not move when the vector does
                let addr = buffer.as_mut_ptr() as usize;
                (
                    Operation::Read {
                        fd: source,
                        addr,
                        len,
                        offset: offset as u64,
                        buf_group: None,
                    },
                    Pending::FixedRead { buffer, requested },
                )
            }
        };

        self.ring.ensure_capacity()?;
        self.ring.enqueue(op, pending)
    }
}

/// Reject descriptors that are not open in this process
fn check_descriptor(source: RawFd) -> Result<()> {
    if source < 0 || unsafe { libc::fcntl(source, libc::F_GETFD) } == -1 {
        return Err(RingError::invalid_argument(
            "source",
            format!("{} is not an open descriptor", source),
        ));
    }
    Ok(())
}

impl RingContext {
    /// Submitter for this ring
    pub fn submitter(&mut self) -> Submitter<'_> {
        Submitter::new(self)
    }

    /// Submit a read; see [`Submitter::submit_read`]
    pub fn submit_read(
        &mut self,
        source: RawFd,
        size: i64,
        offset: i64,
        selector: Selector,
    ) -> Result<SubmissionToken> {
        self.submitter().submit_read(source, size, offset, selector)
    }
}
