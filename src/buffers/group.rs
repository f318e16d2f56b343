//! Buffer groups: pools of provided buffers and their selection state machine
//!
//! A `BufferGroup` mirrors the kernel's view of one buffer group. The kernel
//! chooses which buffer satisfies a selecting read; the group records that
//! choice when the completion is resolved and refuses every transition that
//! would let a buffer be reused without an explicit hand-back.
//!
//! ```text
//!   register ──▶ Provided ── completion ──▶ Selected ── release ──▶ Free
//!                  ▲  │                        │                    │
//!                  │  └── failed provide ──────┼──────────▶ Free    │
//!                  └────────── recycle ────────┴────────────────────┘
//! ```

use std::collections::BTreeMap;

use log::{trace, warn};

use crate::error::{RingError, Result};

use super::{
    descriptor::{BufferDescriptor, BufferId, BufferState, GroupId},
    region::BufferRegion,
    stats::GroupStats,
};

/// Largest buffer length the provide operation can express
pub const MAX_BUFFER_LENGTH: usize = i32::MAX as usize;

/// Addresses and ids of a contiguous run of buffers handed to the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvideBatch {
    /// Buffer group the run belongs to
    pub group_id: GroupId,
    /// Address of the first buffer
    pub address: usize,
    /// Length of each buffer
    pub length: u32,
    /// Number of buffers
    pub count: u16,
    /// Id of the first buffer; the rest follow contiguously
    pub bid_start: BufferId,
}

impl ProvideBatch {
    /// Ids covered by this batch
    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> {
        let start = self.bid_start as u32;
        (start..start + self.count as u32).map(|bid| bid as BufferId)
    }
}

/// A pool of buffers registered under one group id
#[derive(Debug)]
pub struct BufferGroup {
    group_id: GroupId,
    /// Id of the first buffer ever registered
    bid_start: BufferId,
    descriptors: BTreeMap<BufferId, BufferDescriptor>,
    /// Backing memory; never released before the group itself
    regions: Vec<BufferRegion>,
    /// Provided buffers in hand-over order; the top is the next expected pick
    selectable: Vec<BufferId>,
    stats: GroupStats,
}

impl BufferGroup {
    /// Create an empty group
    pub fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            bid_start: 0,
            descriptors: BTreeMap::new(),
            regions: Vec::new(),
            selectable: Vec::new(),
            stats: GroupStats::new(),
        }
    }

    /// Validate a provisioning request against this group
    pub fn check_spec(
        &self,
        region_len: usize,
        length: usize,
        count: usize,
        bid_start: BufferId,
    ) -> Result<()> {
        if length == 0 {
            return Err(RingError::invalid_buffer_spec(
                "length",
                "Buffer length cannot be zero",
            ));
        }
        if length > MAX_BUFFER_LENGTH {
            return Err(RingError::invalid_buffer_spec(
                "length",
                format!("Buffer length {} exceeds {}", length, MAX_BUFFER_LENGTH),
            ));
        }
        if count == 0 {
            return Err(RingError::invalid_buffer_spec(
                "count",
                "At least one buffer must be provided",
            ));
        }
        if count > u16::MAX as usize {
            return Err(RingError::invalid_buffer_spec(
                "count",
                format!("At most {} buffers fit in one provide call", u16::MAX),
            ));
        }
        if bid_start as usize + count > BufferId::MAX as usize + 1 {
            return Err(RingError::invalid_buffer_spec(
                "bid_start",
                format!(
                    "Buffer ids {}..{} do not fit in 16 bits",
                    bid_start,
                    bid_start as usize + count
                ),
            ));
        }
        let required = length.checked_mul(count).ok_or_else(|| {
            RingError::invalid_buffer_spec("count", "Total size overflows usize")
        })?;
        if region_len < required {
            return Err(RingError::invalid_buffer_spec(
                "region",
                format!(
                    "Region of {} bytes cannot hold {} buffers of {} bytes",
                    region_len, count, length
                ),
            ));
        }

        let end = bid_start as usize + count;
        for (bid, descriptor) in self.descriptors.range(bid_start..) {
            if *bid as usize >= end {
                break;
            }
            if descriptor.state != BufferState::Free {
                return Err(RingError::invalid_buffer_spec(
                    "bid_start",
                    format!("Buffer {} is already {}", bid, descriptor.state),
                ));
            }
        }

        Ok(())
    }

    /// Register `count` buffers of `length` bytes carved from `region`
    ///
    /// The new descriptors start out `Provided` and are pushed on the
    /// selection stack in id order, so the highest id is picked first.
    pub(crate) fn register(
        &mut self,
        region: BufferRegion,
        length: usize,
        count: usize,
        bid_start: BufferId,
    ) -> Result<ProvideBatch> {
        self.check_spec(region.len(), length, count, bid_start)?;

        if self.descriptors.is_empty() && self.regions.is_empty() {
            self.bid_start = bid_start;
        }

        let base = region.address();
        let region_index = self.regions.len();
        self.regions.push(region);

        let batch = ProvideBatch {
            group_id: self.group_id,
            address: base,
            length: length as u32,
            count: count as u16,
            bid_start,
        };

        for (index, bid) in batch.buffer_ids().enumerate() {
            let descriptor = BufferDescriptor::new(bid, base + index * length, length, region_index);
            if self.descriptors.insert(bid, descriptor).is_none() {
                self.stats.registered += 1;
            }
            self.selectable.push(bid);
        }
        self.stats.total_provided += count as u64;

        trace!(
            "group {}: registered buffers {}..{} of {} bytes",
            self.group_id,
            bid_start,
            bid_start as usize + count,
            length
        );

        Ok(batch)
    }

    /// Record that the kernel attached `buffer_id` to a completion
    pub(crate) fn select(&mut self, buffer_id: BufferId, filled: usize) -> Result<()> {
        let group_id = self.group_id;
        let descriptor = self.descriptors.get_mut(&buffer_id).ok_or_else(|| {
            RingError::platform(format!(
                "Kernel selected unregistered buffer {} of group {}",
                buffer_id, group_id
            ))
        })?;

        if descriptor.state != BufferState::Provided {
            return Err(RingError::buffer_state(
                group_id,
                buffer_id,
                "Provided",
                descriptor.state,
            ));
        }
        if filled > descriptor.length {
            return Err(RingError::platform(format!(
                "Kernel reported {} bytes in buffer {} of {} bytes",
                filled, buffer_id, descriptor.length
            )));
        }

        descriptor.state = BufferState::Selected;
        descriptor.filled = filled;

        match self.selectable.iter().rposition(|&bid| bid == buffer_id) {
            Some(position) if position + 1 == self.selectable.len() => {
                self.selectable.pop();
            }
            Some(position) => {
                let expected = self.selectable.last().copied();
                self.selectable.remove(position);
                self.stats.lifo_violations += 1;
                warn!(
                    "group {}: kernel selected buffer {} but LIFO order expected {:?}",
                    group_id, buffer_id, expected
                );
            }
            None => {}
        }

        self.stats.selections += 1;
        let selected = self.selected_count();
        if selected > self.stats.peak_selected {
            self.stats.peak_selected = selected;
        }

        Ok(())
    }

    /// Return a selected or free buffer to the kernel pool
    pub(crate) fn hand_back(&mut self, buffer_id: BufferId) -> Result<ProvideBatch> {
        let group_id = self.group_id;
        let descriptor = self.descriptor_mut(buffer_id)?;

        if descriptor.state == BufferState::Provided {
            return Err(RingError::buffer_state(
                group_id,
                buffer_id,
                "Selected or Free",
                descriptor.state,
            ));
        }

        descriptor.state = BufferState::Provided;
        descriptor.filled = 0;
        let batch = ProvideBatch {
            group_id,
            address: descriptor.address,
            length: descriptor.length as u32,
            count: 1,
            bid_start: buffer_id,
        };

        self.selectable.push(buffer_id);
        self.stats.hand_backs += 1;
        self.stats.total_provided += 1;

        Ok(batch)
    }

    /// Retire a selected buffer without returning it to the kernel
    pub(crate) fn release(&mut self, buffer_id: BufferId) -> Result<()> {
        let group_id = self.group_id;
        let descriptor = self.descriptor_mut(buffer_id)?;

        if descriptor.state != BufferState::Selected {
            return Err(RingError::buffer_state(
                group_id,
                buffer_id,
                "Selected",
                descriptor.state,
            ));
        }

        descriptor.state = BufferState::Free;
        descriptor.filled = 0;
        self.stats.releases += 1;
        Ok(())
    }

    /// Undo a provide the kernel rejected
    pub(crate) fn rollback(&mut self, batch: &ProvideBatch) {
        for bid in batch.buffer_ids() {
            if let Some(descriptor) = self.descriptors.get_mut(&bid) {
                if descriptor.state == BufferState::Provided {
                    descriptor.state = BufferState::Free;
                    self.stats.rollbacks += 1;
                }
            }
            if let Some(position) = self.selectable.iter().rposition(|&b| b == bid) {
                self.selectable.remove(position);
            }
        }
    }

    /// Bytes the kernel produced into a selected buffer
    pub fn data(&self, buffer_id: BufferId) -> Result<&[u8]> {
        let descriptor = self.descriptor(buffer_id).ok_or_else(|| {
            RingError::invalid_argument(
                "buffer_id",
                format!("Buffer {} is not registered in group {}", buffer_id, self.group_id),
            )
        })?;

        if descriptor.state != BufferState::Selected {
            return Err(RingError::buffer_state(
                self.group_id,
                buffer_id,
                "Selected",
                descriptor.state,
            ));
        }

        let region = &self.regions[descriptor.region];
        let offset = descriptor.address - region.address();
        // Selected buffers are outside the kernel pool, so nothing writes them.
        Ok(unsafe { region.range(offset, descriptor.filled) })
    }

    /// Group id
    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Id of the first buffer ever registered in this group
    pub fn bid_start(&self) -> BufferId {
        self.bid_start
    }

    /// Number of registered buffers
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no buffer was ever registered
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Descriptor of one buffer
    pub fn descriptor(&self, buffer_id: BufferId) -> Option<&BufferDescriptor> {
        self.descriptors.get(&buffer_id)
    }

    /// All descriptors in id order
    pub fn descriptors(&self) -> impl Iterator<Item = &BufferDescriptor> {
        self.descriptors.values()
    }

    /// State of one buffer
    pub fn state(&self, buffer_id: BufferId) -> Option<BufferState> {
        self.descriptors.get(&buffer_id).map(|d| d.state)
    }

    /// Number of buffers the kernel may still select
    pub fn available(&self) -> usize {
        self.selectable.len()
    }

    /// Number of buffers currently owned by completions
    pub fn selected_count(&self) -> usize {
        self.descriptors.values().filter(|d| d.is_selected()).count()
    }

    /// The buffer a LIFO kernel will pick next
    pub fn next_selection(&self) -> Option<BufferId> {
        self.selectable.last().copied()
    }

    /// Provided buffers in the order a LIFO kernel will pick them
    pub fn selection_order(&self) -> Vec<BufferId> {
        self.selectable.iter().rev().copied().collect()
    }

    /// Group statistics
    pub fn stats(&self) -> &GroupStats {
        &self.stats
    }

    fn descriptor_mut(&mut self, buffer_id: BufferId) -> Result<&mut BufferDescriptor> {
        let group_id = self.group_id;
        self.descriptors.get_mut(&buffer_id).ok_or_else(|| {
            RingError::invalid_argument(
                "buffer_id",
                format!("Buffer {} is not registered in group {}", buffer_id, group_id),
            )
        })
    }
}
