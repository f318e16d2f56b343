//! Coordinator and shared ring tests
//!
//! Covers latch publication, serialized provisioning from several threads,
//! the single designated waiter, and memfd-backed state.

use std::{
    io::Write,
    os::fd::AsRawFd,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use bgring::{
    BufferRegion, BufferState, Coordinator, RingContext, RingError, Selector, SharedRing,
};
use tempfile::NamedTempFile;

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

#[cfg(test)]
mod coordinator_tests {
    use super::*;

    /// Test: writes made before publish are visible after wait_for_flag
    #[test]
    fn test_latch_publishes_prior_writes() {
        let coordinator = Coordinator::builder("latch").flag("ready").build().unwrap();
        let payload = Arc::new(AtomicU64::new(0));

        let reader_payload = Arc::clone(&payload);
        let reader = coordinator
            .spawn_participant("reader", None, move |c| {
                c.wait_for_flag("ready", TIMEOUT).unwrap();
                reader_payload.load(Ordering::Relaxed)
            })
            .unwrap();

        thread::sleep(Duration::from_millis(5));
        payload.store(0xfeed, Ordering::Relaxed);
        coordinator.publish("ready").unwrap();

        assert_eq!(reader.join().unwrap(), 0xfeed);
        assert!(coordinator.is_set("ready").unwrap());
    }

    /// Test: counters updated from many threads add up
    #[test]
    fn test_counters_from_many_threads() {
        let coordinator = Coordinator::builder("counters")
            .counter("hits")
            .flag("go")
            .build()
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                coordinator
                    .spawn_participant(format!("adder-{}", i), None, |c| {
                        c.wait_for_flag("go", TIMEOUT).unwrap();
                        for _ in 0..1000 {
                            c.add("hits", 1).unwrap();
                        }
                    })
                    .unwrap()
            })
            .collect();

        coordinator.publish("go").unwrap();
        assert_eq!(coordinator.wait_for_count("hits", 4000, TIMEOUT).unwrap(), 4000);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    /// Test: two threads provisioning the same group through a shared ring
    /// never interleave; every buffer ends up registered
    #[test]
    fn test_shared_provisioning_is_serialized() {
        let coordinator = Coordinator::builder("provision")
            .flag("go")
            .counter("provided")
            .build()
            .unwrap();
        let shared = SharedRing::new(RingContext::create(16).unwrap(), coordinator.clone()).unwrap();
        let waiter = shared.claim_waiter().unwrap();

        let handles: Vec<_> = (0..2u16)
            .map(|index| {
                let ring = Arc::clone(&shared);
                coordinator
                    .spawn_participant(format!("provider-{}", index), Some(index as usize), move |c| {
                        c.wait_for_flag("go", TIMEOUT)?;
                        for batch in 0..2u16 {
                            let bid_start = index * 8 + batch * 4;
                            let region = BufferRegion::for_buffers(0x40, 4)?;
                            ring.provide(region, 0x40, 4, 0, bid_start)?;
                            c.add("provided", 4)?;
                        }
                        Ok::<_, RingError>(())
                    })
                    .unwrap()
            })
            .collect();

        coordinator.publish("go").unwrap();
        for _ in 0..4 {
            waiter.wait_one_timeout(Duration::from_secs(10)).unwrap();
        }
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(coordinator.counter("provided").unwrap(), 16);
        shared.with_ring(|ring| {
            let group = ring.group(0).unwrap();
            assert_eq!(group.len(), 16);
            assert_eq!(group.available(), 16);
            assert!(group
                .descriptors()
                .all(|d| d.state == BufferState::Provided));
        });
        assert_eq!(shared.in_flight(), 0);
    }

    /// Test: the designated waiter consumes reads submitted by other threads
    #[test]
    fn test_designated_waiter_consumes_reads() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&[9u8; 0x100]).unwrap();
        file.flush().unwrap();
        let fd = file.as_file().as_raw_fd();

        let coordinator = Coordinator::builder("reads").build().unwrap();
        let shared = SharedRing::new(RingContext::create(8).unwrap(), coordinator).unwrap();
        shared
            .provide(BufferRegion::for_buffers(0x40, 4).unwrap(), 0x40, 4, 1, 0)
            .unwrap();

        let waiter = shared.claim_waiter().unwrap();
        waiter.wait_one().unwrap();

        let submitter = {
            let ring = Arc::clone(&shared);
            thread::spawn(move || {
                for index in 0..4 {
                    ring.submit_read(fd, 0x40, index * 0x40, Selector::GroupId(1))
                        .unwrap();
                }
            })
        };

        let mut picked = Vec::new();
        for _ in 0..4 {
            let completion = waiter.wait_one_timeout(Duration::from_secs(10)).unwrap();
            let bid = completion.buffer_id().unwrap();
            assert_eq!(shared.buffer_contents(1, bid).unwrap(), vec![9u8; 0x40]);
            picked.push(bid);
        }
        submitter.join().unwrap();

        assert_eq!(picked, vec![3, 2, 1, 0]);
    }

    /// Test: only one waiter exists at a time, across threads too
    #[test]
    fn test_single_designated_waiter() {
        let coordinator = Coordinator::builder("waiter").build().unwrap();
        let shared = SharedRing::new(RingContext::create(4).unwrap(), coordinator).unwrap();
        let waiter = shared.claim_waiter().unwrap();

        let contender = Arc::clone(&shared);
        let claimed = thread::spawn(move || contender.claim_waiter().is_ok())
            .join()
            .unwrap();
        assert!(!claimed);

        drop(waiter);
        let contender = Arc::clone(&shared);
        assert!(thread::spawn(move || contender.claim_waiter().is_ok())
            .join()
            .unwrap());
    }

    /// Test: memfd-backed state behaves like heap state
    #[test]
    fn test_memfd_backed_state() {
        let coordinator = Coordinator::builder("memfd")
            .counter("n")
            .flag("done")
            .shared_across_fork()
            .build()
            .unwrap();
        assert!(coordinator.state().raw_fd().is_some());

        let worker = coordinator
            .spawn_participant("worker", None, |c| {
                c.add("n", 5).unwrap();
                c.publish("done").unwrap();
            })
            .unwrap();

        coordinator.wait_for_flag("done", TIMEOUT).unwrap();
        assert_eq!(coordinator.counter("n").unwrap(), 5);
        worker.join().unwrap();
    }
}
