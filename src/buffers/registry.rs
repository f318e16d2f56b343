//! Buffer group registry owned by a ring

use std::collections::BTreeMap;

use crate::error::{RingError, Result};

use super::{
    descriptor::{BufferId, GroupId},
    group::{BufferGroup, ProvideBatch},
    region::BufferRegion,
};

/// Table of buffer groups registered on one ring
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: BTreeMap<GroupId, BufferGroup>,
}

impl GroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register buffers into a group, creating the group on first use
    pub(crate) fn register(
        &mut self,
        group_id: GroupId,
        region: BufferRegion,
        length: usize,
        count: usize,
        bid_start: BufferId,
    ) -> Result<ProvideBatch> {
        match self.groups.get_mut(&group_id) {
            Some(group) => group.register(region, length, count, bid_start),
            None => {
                let mut group = BufferGroup::new(group_id);
                let batch = group.register(region, length, count, bid_start)?;
                self.groups.insert(group_id, group);
                Ok(batch)
            }
        }
    }

    /// Look up a group
    pub fn get(&self, group_id: GroupId) -> Option<&BufferGroup> {
        self.groups.get(&group_id)
    }

    /// Look up a group, failing if it was never registered
    pub fn group(&self, group_id: GroupId) -> Result<&BufferGroup> {
        self.groups
            .get(&group_id)
            .ok_or_else(|| RingError::unknown_group(group_id))
    }

    pub(crate) fn group_mut(&mut self, group_id: GroupId) -> Result<&mut BufferGroup> {
        self.groups
            .get_mut(&group_id)
            .ok_or_else(|| RingError::unknown_group(group_id))
    }

    /// Whether a group is registered
    pub fn contains(&self, group_id: GroupId) -> bool {
        self.groups.contains_key(&group_id)
    }

    /// Ids of all registered groups
    pub fn group_ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        self.groups.keys().copied()
    }

    /// Total buffers registered across groups
    pub fn total_registered(&self) -> usize {
        self.groups.values().map(BufferGroup::len).sum()
    }

    /// Total buffers the kernel may still select across groups
    pub fn total_available(&self) -> usize {
        self.groups.values().map(BufferGroup::available).sum()
    }
}
