//! Ring lifecycle tests: creation, close, drop, and completion resolution
//! against a scripted driver

use std::{
    collections::{HashMap, VecDeque},
    io::Write,
    os::fd::AsRawFd,
    sync::Arc,
};

use bgring::{
    ring::{CompletionEntry, Operation, SubmissionEntry},
    Backend, BufferRegion, BufferState, Driver, EventNotifier, Result, RingConfig, RingContext,
    RingError, Selector,
};
use tempfile::NamedTempFile;

/// Driver that completes entries synchronously on submit
///
/// Buffers are handed out oldest first, the way recent kernels do, and
/// provide calls can be made to fail.
struct ScriptedDriver {
    queued: Vec<SubmissionEntry>,
    done: VecDeque<CompletionEntry>,
    pools: HashMap<u16, VecDeque<u16>>,
    reject_provide: bool,
    signal: Arc<EventNotifier>,
}

impl ScriptedDriver {
    fn new(reject_provide: bool) -> Self {
        Self {
            queued: Vec::new(),
            done: VecDeque::new(),
            pools: HashMap::new(),
            reject_provide,
            signal: Arc::new(EventNotifier::new().unwrap()),
        }
    }

    fn complete(&mut self, entry: SubmissionEntry) -> CompletionEntry {
        let (result, buffer_id) = match entry.op {
            Operation::ProvideBuffers { .. } if self.reject_provide => (-libc::EINVAL, None),
            Operation::ProvideBuffers {
                count,
                group,
                bid_start,
                ..
            } => {
                let pool = self.pools.entry(group).or_default();
                pool.extend((0..count).map(|i| bid_start + i));
                (0, None)
            }
            Operation::Read {
                len,
                buf_group: Some(group),
                ..
            } => match self.pools.get_mut(&group).and_then(VecDeque::pop_front) {
                Some(bid) => (len as i32, Some(bid)),
                None => (-libc::ENOBUFS, None),
            },
            Operation::Read { len, .. } => (len as i32, None),
        };
        CompletionEntry {
            token: entry.token,
            result,
            buffer_id,
        }
    }
}

impl Driver for ScriptedDriver {
    fn backend(&self) -> Backend {
        Backend::Soft
    }

    fn push(&mut self, entry: SubmissionEntry) -> Result<()> {
        self.queued.push(entry);
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        let queued: Vec<_> = self.queued.drain(..).collect();
        let count = queued.len();
        for entry in queued {
            let completion = self.complete(entry);
            self.done.push_back(completion);
        }
        self.signal.notify()?;
        Ok(count)
    }

    fn reap(&mut self) -> Result<Option<CompletionEntry>> {
        Ok(self.done.pop_front())
    }

    fn wait(&mut self) -> Result<()> {
        if self.done.is_empty() {
            return Err(RingError::platform("Scripted driver has nothing to complete"));
        }
        Ok(())
    }

    fn completion_signal(&self) -> Arc<EventNotifier> {
        Arc::clone(&self.signal)
    }
}

fn scripted_ring(reject_provide: bool) -> RingContext {
    RingContext::with_driver(
        RingConfig::new(8).with_name("scripted"),
        Box::new(ScriptedDriver::new(reject_provide)),
    )
    .unwrap()
}

#[cfg(test)]
mod ring_lifecycle_tests {
    use super::*;

    /// Test: every call after close fails with RingClosed
    #[test]
    fn test_closed_ring_rejects_everything() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"data").unwrap();
        let fd = file.as_file().as_raw_fd();

        let mut ring = RingContext::create(4).unwrap();
        ring.provide_and_wait(BufferRegion::for_buffers(16, 1).unwrap(), 16, 1, 0, 0)
            .unwrap();
        ring.close().unwrap();

        assert!(matches!(
            ring.provide(BufferRegion::for_buffers(16, 1).unwrap(), 16, 1, 1, 0),
            Err(RingError::RingClosed)
        ));
        assert!(matches!(
            ring.submit_read(fd, 4, 0, Selector::GroupId(0)),
            Err(RingError::RingClosed)
        ));
        assert!(matches!(ring.wait_one(), Err(RingError::RingClosed)));
        assert!(matches!(ring.recycle(0, 0), Err(RingError::RingClosed)));
        assert!(matches!(ring.buffer(0, 0), Err(RingError::RingClosed)));
    }

    /// Test: close waits for outstanding reads before releasing the facility
    #[test]
    fn test_close_drains_outstanding_operations() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[1u8; 0x200]).unwrap();
        let fd = file.as_file().as_raw_fd();

        let mut ring = RingContext::create(8).unwrap();
        for index in 0..4 {
            ring.submit_read(fd, 0x80, index * 0x80, Selector::FixedBuffer(vec![0; 0x80]))
                .unwrap();
        }
        assert_eq!(ring.in_flight(), 4);

        ring.close().unwrap();
        assert_eq!(ring.in_flight(), 0);
        assert_eq!(ring.stats().completed, 4);
    }

    /// Test: dropping a ring with work in flight shuts the kernel side down
    #[test]
    fn test_drop_with_operations_in_flight() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[2u8; 0x100]).unwrap();
        let fd = file.as_file().as_raw_fd();

        for drain in [true, false] {
            let config = RingConfig::new(4).with_drain_on_close(drain);
            let mut ring = RingContext::with_config(config).unwrap();
            ring.provide(BufferRegion::for_buffers(0x40, 2).unwrap(), 0x40, 2, 0, 0)
                .unwrap();
            ring.submit_read(fd, 0x40, 0, Selector::GroupId(0)).unwrap();
            drop(ring);
        }
    }

    /// Test: a provide the kernel rejects rolls its buffers back to Free
    #[test]
    fn test_rejected_provide_rolls_back() {
        let mut ring = scripted_ring(true);
        let token = ring
            .provide(BufferRegion::for_buffers(32, 2).unwrap(), 32, 2, 5, 10)
            .unwrap();
        assert_eq!(ring.group(5).unwrap().state(10), Some(BufferState::Provided));

        match ring.wait_one() {
            Err(RingError::Io { token: failed, code }) => {
                assert_eq!(failed, token);
                assert_eq!(code, libc::EINVAL);
            }
            other => panic!("expected EINVAL, got {:?}", other),
        }

        let group = ring.group(5).unwrap();
        assert_eq!(group.state(10), Some(BufferState::Free));
        assert_eq!(group.state(11), Some(BufferState::Free));
        assert_eq!(group.available(), 0);
        assert_eq!(group.stats().rollbacks, 2);

        // Free ids may be provided again
        ring.provide(BufferRegion::for_buffers(32, 2).unwrap(), 32, 2, 5, 10)
            .unwrap();
    }

    /// Test: a facility that ignores LIFO order is detected, not trusted
    #[test]
    fn test_out_of_order_selection_is_counted() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[3u8; 0x40]).unwrap();
        let fd = file.as_file().as_raw_fd();

        let mut ring = scripted_ring(false);
        ring.provide_and_wait(BufferRegion::for_buffers(16, 3).unwrap(), 16, 3, 0, 0)
            .unwrap();

        let mut picked = Vec::new();
        for _ in 0..3 {
            ring.submit_read(fd, 16, 0, Selector::GroupId(0)).unwrap();
            picked.push(ring.wait_one().unwrap().buffer_id().unwrap());
        }

        assert_eq!(picked, vec![0, 1, 2]);
        let stats = ring.group(0).unwrap().stats();
        assert_eq!(stats.selections, 3);
        assert_eq!(stats.lifo_violations, 2);
        assert!(stats.lifo_conformance() < 0.5);
    }

    /// Test: waiting with nothing in flight is an error instead of a hang
    #[test]
    fn test_wait_without_work() {
        let mut ring = scripted_ring(false);
        assert!(matches!(
            ring.wait_one(),
            Err(RingError::InvalidArgument { .. })
        ));
    }
}
