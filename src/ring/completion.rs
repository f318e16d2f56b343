//! Completion consumption and resolution

use log::trace;

use crate::error::{RingError, Result};

use super::{
    context::{Pending, RingContext},
    entry::{Completion, CompletionEntry, CompletionKind, SubmissionToken},
};

/// Consumes completions from a ring
///
/// Every call consumes and acknowledges exactly one completion entry.
/// Failures reported by the kernel surface as `RingError::Io`.
pub struct CompletionWaiter<'r> {
    ring: &'r mut RingContext,
}

impl<'r> CompletionWaiter<'r> {
    pub(crate) fn new(ring: &'r mut RingContext) -> Self {
        Self { ring }
    }

    /// Block until one completion is available and consume it
    pub fn wait_one(&mut self) -> Result<Completion> {
        self.ring.ensure_open()?;
        if let Some((_, completion)) = self.ring.backlog.pop_front() {
            return completion;
        }
        if self.ring.pending.is_empty() {
            return Err(RingError::invalid_argument(
                "wait",
                "No operations in flight",
            ));
        }

        let entry = self.ring.driver_mut()?.wait_completion()?;
        self.ring.resolve(entry)
    }

    /// Consume one completion if one is ready
    pub fn try_wait_one(&mut self) -> Result<Option<Completion>> {
        self.ring.ensure_open()?;
        if let Some((_, completion)) = self.ring.backlog.pop_front() {
            return completion.map(Some);
        }

        match self.ring.driver_mut()?.reap()? {
            Some(entry) => self.ring.resolve(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Block until the completion of `token` arrives
    ///
    /// Completions of other operations consumed on the way are kept and
    /// handed out, in arrival order, by later calls to `wait_one`.
    pub fn wait_for(&mut self, token: SubmissionToken) -> Result<Completion> {
        self.ring.ensure_open()?;
        if let Some(position) = self.ring.backlog.iter().position(|(t, _)| *t == token) {
            if let Some((_, completion)) = self.ring.backlog.remove(position) {
                return completion;
            }
        }
        if !self.ring.pending.contains_key(&token) {
            return Err(RingError::invalid_argument(
                "token",
                format!("{} is not in flight", token),
            ));
        }

        loop {
            let entry = self.ring.driver_mut()?.wait_completion()?;
            let arrived = entry.token;
            let completion = self.ring.resolve(entry);
            if arrived == token {
                return completion;
            }
            self.ring.backlog.push_back((arrived, completion));
        }
    }
}

impl RingContext {
    /// Resolve a raw completion against the pending table and buffer groups
    pub(crate) fn resolve(&mut self, entry: CompletionEntry) -> Result<Completion> {
        let pending = self.pending.remove(&entry.token).ok_or_else(|| {
            RingError::platform(format!("Completion for unknown operation {}", entry.token))
        })?;
        self.stats.completed += 1;
        trace!(
            "{}: completion {} result={} buffer={:?}",
            self.config.name,
            entry.token,
            entry.result,
            entry.buffer_id
        );

        if entry.result < 0 {
            self.stats.failed += 1;
            if let Pending::Provide { batch } = &pending {
                self.groups.group_mut(batch.group_id)?.rollback(batch);
            }
            return Err(RingError::io(entry.token, entry.result));
        }

        let produced = entry.result as usize;
        let (requested, kind) = match pending {
            Pending::Provide { batch } => (
                0,
                CompletionKind::Provided {
                    group_id: batch.group_id,
                    bid_start: batch.bid_start,
                    count: batch.count,
                },
            ),
            Pending::SelectRead {
                group_id,
                requested,
            } => {
                let buffer_id = entry.buffer_id.ok_or_else(|| {
                    RingError::platform(format!(
                        "Selecting read {} completed without a buffer",
                        entry.token
                    ))
                })?;
                self.groups.group_mut(group_id)?.select(buffer_id, produced)?;
                self.stats.selections += 1;
                (
                    requested,
                    CompletionKind::Selected {
                        group_id,
                        buffer_id,
                    },
                )
            }
            Pending::FixedRead {
                mut buffer,
                requested,
            } => {
                buffer.truncate(produced);
                (requested, CompletionKind::Fixed { buffer })
            }
        };

        let completion = Completion {
            token: entry.token,
            result: entry.result,
            requested,
            kind,
        };
        if completion.is_short_read() {
            self.stats.short_reads += 1;
        }
        Ok(completion)
    }

    /// Waiter consuming this ring's completions
    pub fn waiter(&mut self) -> CompletionWaiter<'_> {
        CompletionWaiter::new(self)
    }

    /// Block until one completion is available and consume it
    pub fn wait_one(&mut self) -> Result<Completion> {
        self.waiter().wait_one()
    }

    /// Consume one completion if one is ready
    pub fn try_wait_one(&mut self) -> Result<Option<Completion>> {
        self.waiter().try_wait_one()
    }

    /// Block until the completion of `token` arrives
    pub fn wait_for(&mut self, token: SubmissionToken) -> Result<Completion> {
        self.waiter().wait_for(token)
    }
}
