//! Submission validation and fixed-buffer read tests

use std::{
    fs,
    io::Write,
    os::{fd::AsRawFd, unix::net::UnixStream},
    sync::mpsc,
    thread,
    time::Duration,
};

use bgring::{BufferRegion, RingConfig, RingConfigBuilder, RingContext, RingError, Selector};
use tempfile::NamedTempFile;

fn known_file(len: usize) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    file
}

#[cfg(test)]
mod submission_tests {
    use super::*;

    /// Test: invalid arguments are rejected at call time and nothing is queued
    #[test]
    fn test_invalid_arguments_rejected_synchronously() {
        let file = known_file(0x100);
        let fd = file.as_file().as_raw_fd();
        let mut ring = RingContext::create(4).unwrap();

        let cases = [
            (fd, -1, 0),
            (fd, 0x10, -1),
            (-1, 0x10, 0),
            (fd, u32::MAX as i64 + 1, 0),
        ];
        for (source, size, offset) in cases {
            let err = ring
                .submit_read(source, size, offset, Selector::GroupId(0))
                .unwrap_err();
            assert!(
                matches!(err, RingError::InvalidArgument { .. }),
                "({}, {}, {}) gave {:?}",
                source,
                size,
                offset,
                err
            );
        }

        assert_eq!(ring.in_flight(), 0);
        assert_eq!(ring.stats().submitted, 0);
        assert!(ring.try_wait_one().unwrap().is_none());
    }

    /// Test: a number that is not an open descriptor is not accepted
    #[test]
    fn test_unopened_descriptor_rejected() {
        let mut ring = RingContext::create(4).unwrap();
        assert!(matches!(
            ring.submit_read(1 << 20, 0x10, 0, Selector::FixedBuffer(vec![0; 0x10])),
            Err(RingError::InvalidArgument { .. })
        ));
        assert_eq!(ring.in_flight(), 0);
    }

    /// Test: submissions beyond the depth fail without disturbing the
    /// operations already queued
    #[test]
    fn test_queue_full_keeps_earlier_operations() {
        let file = known_file(0x40);
        let fd = file.as_file().as_raw_fd();
        let mut ring = RingContext::with_config(RingConfig::new(2)).unwrap();

        let first = ring
            .submit_read(fd, 0x20, 0, Selector::FixedBuffer(vec![0; 0x20]))
            .unwrap();
        let second = ring
            .submit_read(fd, 0x20, 0x20, Selector::FixedBuffer(vec![0; 0x20]))
            .unwrap();

        let err = ring
            .submit_read(fd, 0x20, 0, Selector::FixedBuffer(vec![0; 0x20]))
            .unwrap_err();
        assert!(matches!(err, RingError::QueueFull { depth: 2, in_flight: 2 }));
        assert!(err.is_recoverable());
        assert_eq!(ring.stats().queue_full_rejections, 1);

        let expected = fs::read(file.path()).unwrap();
        let a = ring.wait_for(first).unwrap();
        let b = ring.wait_for(second).unwrap();
        assert_eq!(a.into_buffer().unwrap(), expected[..0x20].to_vec());
        assert_eq!(b.into_buffer().unwrap(), expected[0x20..].to_vec());

        // Draining frees the slots again
        ring.submit_read(fd, 0x20, 0, Selector::FixedBuffer(vec![0; 0x20]))
            .unwrap();
        ring.wait_one().unwrap();
    }

    /// Test: fixed reads return exactly what a synchronous read returns
    #[test]
    fn test_fixed_reads_match_synchronous_reads() {
        let file = known_file(0x150);
        let fd = file.as_file().as_raw_fd();
        let expected = fs::read(file.path()).unwrap();
        let mut ring = RingContext::create(16).unwrap();

        let mut tokens = Vec::new();
        for index in 0..3usize {
            let token = ring
                .submit_read(
                    fd,
                    0x50,
                    (index * 0x50) as i64,
                    Selector::FixedBuffer(vec![0; 0x50]),
                )
                .unwrap();
            tokens.push((token, index));
        }

        for (token, index) in tokens {
            let completion = ring.wait_for(token).unwrap();
            assert_eq!(completion.buffer_id(), None);
            assert!(!completion.is_short_read());
            let start = index * 0x50;
            assert_eq!(
                completion.into_buffer().unwrap(),
                expected[start..start + 0x50].to_vec()
            );
        }
    }

    /// Test: a zero-length read completes with zero bytes
    #[test]
    fn test_zero_length_read() {
        let file = known_file(0x10);
        let mut ring = RingContext::create(4).unwrap();
        ring.submit_read(file.as_file().as_raw_fd(), 0, 0, Selector::FixedBuffer(Vec::new()))
            .unwrap();
        let completion = ring.wait_one().unwrap();
        assert_eq!(completion.bytes(), 0);
        assert!(!completion.is_short_read());
    }

    /// Test: a read on an idle stream does not hold up later reads, and a
    /// ring that skips draining still drops promptly
    #[test]
    fn test_idle_stream_does_not_block_later_reads() {
        let (reader, _peer) = UnixStream::pair().unwrap();
        let file = known_file(5);
        let config = RingConfigBuilder::new("idle-stream")
            .queue_depth(4)
            .no_drain()
            .build()
            .unwrap();
        let mut ring = RingContext::with_config(config).unwrap();

        ring.submit_read(reader.as_raw_fd(), 4, 0, Selector::FixedBuffer(vec![0; 4]))
            .unwrap();
        let file_token = ring
            .submit_read(file.as_file().as_raw_fd(), 5, 0, Selector::FixedBuffer(vec![0; 5]))
            .unwrap();

        let completion = ring.wait_for(file_token).unwrap();
        assert_eq!(
            completion.into_buffer().unwrap(),
            fs::read(file.path()).unwrap()
        );
        assert_eq!(ring.in_flight(), 1);

        let (done_tx, done_rx) = mpsc::channel();
        thread::spawn(move || {
            drop(ring);
            done_tx.send(()).unwrap();
        });
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    }

    /// Test: a selecting read on a stream takes its buffer once data arrives
    #[test]
    fn test_stream_group_read_completes_when_data_arrives() {
        let (reader, mut peer) = UnixStream::pair().unwrap();
        let mut ring = RingContext::create(4).unwrap();
        ring.provide_and_wait(BufferRegion::for_buffers(0x10, 2).unwrap(), 0x10, 2, 0, 0)
            .unwrap();

        let token = ring
            .submit_read(reader.as_raw_fd(), 0x10, 0, Selector::GroupId(0))
            .unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(ring.try_wait_one().unwrap().is_none());
        assert_eq!(ring.group(0).unwrap().available(), 2);

        peer.write_all(b"arrived").unwrap();
        let completion = ring.wait_for(token).unwrap();
        let bid = completion.buffer_id().unwrap();
        assert_eq!(bid, 1);
        assert_eq!(ring.buffer(0, bid).unwrap(), b"arrived");
    }
}
