//! Buffer group provisioning on a ring

use log::debug;

use crate::buffers::{BufferGroup, BufferId, BufferRegion, GroupId, GroupRegistry};
use crate::error::Result;

use super::{
    context::{Pending, RingContext},
    entry::{Completion, Operation, SubmissionToken},
};

impl RingContext {
    /// Hand `count` buffers of `length` bytes carved from `region` to the
    /// kernel under `group_id`, with ids starting at `bid_start`
    ///
    /// The descriptors are `Provided` from this call on; the returned token
    /// completes once the kernel has accepted them. If the kernel rejects the
    /// batch the descriptors fall back to `Free` and the completion carries
    /// the error. Providing to an existing group appends to its pool.
    pub fn provide(
        &mut self,
        region: BufferRegion,
        length: usize,
        count: usize,
        group_id: GroupId,
        bid_start: BufferId,
    ) -> Result<SubmissionToken> {
        self.ensure_open()?;
        match self.groups.get(group_id) {
            Some(group) => group.check_spec(region.len(), length, count, bid_start)?,
            None => BufferGroup::new(group_id).check_spec(region.len(), length, count, bid_start)?,
        }
        self.ensure_capacity()?;

        let batch = self
            .groups
            .register(group_id, region, length, count, bid_start)?;
        let op = Operation::ProvideBuffers {
            addr: batch.address,
            len: batch.length,
            count: batch.count,
            group: group_id,
            bid_start,
        };

        match self.enqueue(op, Pending::Provide { batch }) {
            Ok(token) => {
                self.stats.provided_buffers += count as u64;
                debug!(
                    "{}: providing {} buffers of {} bytes to group {} ({})",
                    self.config.name, count, length, group_id, token
                );
                Ok(token)
            }
            Err(e) => {
                self.groups.group_mut(group_id)?.rollback(&batch);
                Err(e)
            }
        }
    }

    /// Provide buffers and block until the kernel has accepted them
    pub fn provide_and_wait(
        &mut self,
        region: BufferRegion,
        length: usize,
        count: usize,
        group_id: GroupId,
        bid_start: BufferId,
    ) -> Result<Completion> {
        let token = self.provide(region, length, count, group_id, bid_start)?;
        self.wait_for(token)
    }

    /// Return a selected or released buffer to the kernel pool
    ///
    /// The buffer becomes the top of the group's stack again. If the hand-back
    /// cannot be queued the buffer is left `Free` and may be recycled later.
    pub fn recycle(&mut self, group_id: GroupId, buffer_id: BufferId) -> Result<SubmissionToken> {
        self.ensure_open()?;
        self.groups.group(group_id)?;
        self.ensure_capacity()?;

        let batch = self.groups.group_mut(group_id)?.hand_back(buffer_id)?;
        let op = Operation::ProvideBuffers {
            addr: batch.address,
            len: batch.length,
            count: 1,
            group: group_id,
            bid_start: buffer_id,
        };

        match self.enqueue(op, Pending::Provide { batch }) {
            Ok(token) => {
                self.stats.recycled += 1;
                self.stats.provided_buffers += 1;
                Ok(token)
            }
            Err(e) => {
                self.groups.group_mut(group_id)?.rollback(&batch);
                Err(e)
            }
        }
    }

    /// Retire a selected buffer without returning it to the kernel
    pub fn release(&mut self, group_id: GroupId, buffer_id: BufferId) -> Result<()> {
        self.ensure_open()?;
        self.groups.group_mut(group_id)?.release(buffer_id)
    }

    /// Bytes the kernel read into a selected buffer
    pub fn buffer(&self, group_id: GroupId, buffer_id: BufferId) -> Result<&[u8]> {
        self.ensure_open()?;
        self.groups.group(group_id)?.data(buffer_id)
    }

    /// One registered buffer group
    pub fn group(&self, group_id: GroupId) -> Result<&BufferGroup> {
        self.groups.group(group_id)
    }

    /// All registered buffer groups
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::BufferState;
    use crate::error::RingError;
    use crate::ring::entry::CompletionKind;

    #[test]
    fn test_provide_registers_before_completion() {
        let mut ring = RingContext::create(4).unwrap();
        let token = ring
            .provide(BufferRegion::for_buffers(32, 3).unwrap(), 32, 3, 0, 0)
            .unwrap();

        let group = ring.group(0).unwrap();
        assert_eq!(group.len(), 3);
        assert_eq!(group.state(1), Some(BufferState::Provided));

        let completion = ring.wait_for(token).unwrap();
        assert_eq!(
            completion.kind,
            CompletionKind::Provided {
                group_id: 0,
                bid_start: 0,
                count: 3
            }
        );
        assert_eq!(ring.stats().provided_buffers, 3);
    }

    #[test]
    fn test_invalid_specs() {
        let mut ring = RingContext::create(4).unwrap();
        let small = BufferRegion::for_buffers(16, 1).unwrap();
        assert!(matches!(
            ring.provide(small, 16, 2, 0, 0),
            Err(RingError::InvalidBufferSpec { .. })
        ));

        let region = BufferRegion::for_buffers(16, 1).unwrap();
        assert!(matches!(
            ring.provide(region, 0, 1, 0, 0),
            Err(RingError::InvalidBufferSpec { .. })
        ));
        assert!(ring.groups().get(0).is_none());
        assert_eq!(ring.in_flight(), 0);
    }

    #[test]
    fn test_release_and_buffer_access_need_selection() {
        let mut ring = RingContext::create(4).unwrap();
        ring.provide_and_wait(BufferRegion::for_buffers(8, 1).unwrap(), 8, 1, 3, 0)
            .unwrap();

        assert!(matches!(
            ring.buffer(3, 0),
            Err(RingError::BufferState { .. })
        ));
        assert!(matches!(
            ring.release(3, 0),
            Err(RingError::BufferState { .. })
        ));
        assert!(matches!(
            ring.recycle(3, 0),
            Err(RingError::BufferState { .. })
        ));
        assert!(matches!(
            ring.recycle(9, 0),
            Err(RingError::UnknownGroup { group_id: 9 })
        ));
    }
}
