//! In-process software kernel
//!
//! The soft kernel is a dedicated worker thread that plays the part of the
//! operating system: it drains the submission queue, executes reads with
//! `pread(2)`, keeps its own per-group buffer lists, and posts completions.
//! Buffer lists are stacks, so a selecting read always receives the most
//! recently provided buffer.
//!
//! Queued entries become visible to the worker as soon as they are pushed,
//! in the manner of a submission-polling kernel thread; `submit` only rings
//! the doorbell so an idle worker wakes up immediately.
//!
//! Reads on pipes, sockets and other streams never block the worker. A stream
//! read whose descriptor has no data yet is parked and retried once the
//! descriptor polls readable, while later entries keep executing. Reads on
//! the same descriptor stay in submission order. Parked reads still waiting
//! at shutdown complete with `ECANCELED`.

use std::{
    collections::{HashMap, VecDeque},
    os::fd::RawFd,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, trace, warn};

use crate::buffers::{BufferId, GroupId};
use crate::error::{RingError, Result};
use crate::ring::{
    config::{Backend, RingConfig},
    entry::{CompletionEntry, Operation, SubmissionEntry},
};
use crate::ringbuf::RingBuffer;
use crate::sync::notify::EventNotifier;

use super::Driver;

/// Queues shared between the ring owner and the worker
struct SoftQueues {
    sq: RingBuffer<SubmissionEntry>,
    cq: RingBuffer<CompletionEntry>,
    doorbell: EventNotifier,
    completions: Arc<EventNotifier>,
    shutdown: AtomicBool,
    executed: AtomicU64,
}

/// Driver backed by the in-process software kernel
pub struct SoftDriver {
    queues: Arc<SoftQueues>,
    worker: Option<JoinHandle<()>>,
    poll: Duration,
    unsubmitted: usize,
}

impl SoftDriver {
    /// Start a soft kernel sized for `config`
    pub fn new(config: &RingConfig) -> Result<Self> {
        config.validate()?;

        let queues = Arc::new(SoftQueues {
            sq: RingBuffer::new(config.sq_entries())?,
            cq: RingBuffer::new(config.cq_entries())?,
            doorbell: EventNotifier::new()?,
            completions: Arc::new(EventNotifier::new()?),
            shutdown: AtomicBool::new(false),
            executed: AtomicU64::new(0),
        });

        let worker_queues = Arc::clone(&queues);
        let idle = config.completion_poll;
        let worker = thread::Builder::new()
            .name(format!("{}-soft-kernel", config.name))
            .spawn(move || SoftKernel::default().run(&worker_queues, idle))
            .map_err(|e| RingError::ring_init_io(e, "Failed to spawn soft kernel worker"))?;

        debug!(
            "{}: soft kernel started (sq={}, cq={})",
            config.name,
            config.sq_entries(),
            config.cq_entries()
        );

        Ok(Self {
            queues,
            worker: Some(worker),
            poll: config.completion_poll,
            unsubmitted: 0,
        })
    }

    /// Number of entries the worker has executed
    pub fn executed(&self) -> u64 {
        self.queues.executed.load(Ordering::Relaxed)
    }

    fn worker_alive(&self) -> bool {
        self.worker.as_ref().map_or(false, |w| !w.is_finished())
    }
}

impl Driver for SoftDriver {
    fn backend(&self) -> Backend {
        Backend::Soft
    }

    fn push(&mut self, entry: SubmissionEntry) -> Result<()> {
        self.queues.sq.producer().try_push(entry).map_err(|_| {
            RingError::queue_full(self.queues.sq.capacity() as u32, self.queues.sq.len())
        })?;
        self.unsubmitted += 1;
        Ok(())
    }

    fn submit(&mut self) -> Result<usize> {
        if !self.worker_alive() {
            return Err(RingError::platform("Soft kernel worker has exited"));
        }
        let submitted = std::mem::take(&mut self.unsubmitted);
        self.queues.doorbell.notify()?;
        Ok(submitted)
    }

    fn reap(&mut self) -> Result<Option<CompletionEntry>> {
        Ok(self.queues.cq.consumer().try_pop())
    }

    fn wait(&mut self) -> Result<()> {
        if !self.queues.cq.is_empty() {
            return Ok(());
        }
        if !self.worker_alive() {
            return Err(RingError::platform("Soft kernel worker has exited"));
        }
        self.queues.completions.wait(Some(self.poll))?;
        Ok(())
    }

    fn completion_signal(&self) -> Arc<EventNotifier> {
        Arc::clone(&self.queues.completions)
    }
}

impl Drop for SoftDriver {
    fn drop(&mut self) {
        self.queues.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.queues.doorbell.notify() {
            warn!("Failed to wake soft kernel for shutdown: {}", e);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Soft kernel worker panicked");
            }
        }
    }
}

/// One buffer in the kernel's list for a group
#[derive(Debug, Clone, Copy)]
struct KernelBuffer {
    addr: usize,
    len: u32,
    bid: BufferId,
}

/// Worker-private kernel state
#[derive(Default)]
struct SoftKernel {
    pools: HashMap<GroupId, Vec<KernelBuffer>>,
    overflow: VecDeque<CompletionEntry>,
    /// Stream reads waiting for their descriptor to become readable
    parked: VecDeque<SubmissionEntry>,
}

impl SoftKernel {
    fn run(mut self, queues: &SoftQueues, idle: Duration) {
        loop {
            self.flush_overflow(queues);
            self.retry_parked(queues);

            while let Some(entry) = queues.sq.consumer().try_pop() {
                if self.must_park(&entry) {
                    trace!("soft kernel: parking {} until its stream is readable", entry.token);
                    self.parked.push_back(entry);
                    continue;
                }
                let completion = self.execute(entry);
                self.post(queues, completion);
            }

            if queues.shutdown.load(Ordering::Acquire) && queues.sq.is_empty() {
                self.cancel_parked(queues);
                if !self.overflow.is_empty() {
                    debug!(
                        "Soft kernel shutting down with {} unposted completions",
                        self.overflow.len()
                    );
                }
                break;
            }

            self.idle(queues, idle);
        }
    }

    fn post(&mut self, queues: &SoftQueues, completion: CompletionEntry) {
        queues.executed.fetch_add(1, Ordering::Relaxed);
        if let Err(completion) = queues.cq.producer().try_push(completion) {
            self.overflow.push_back(completion);
        }
        if let Err(e) = queues.completions.notify() {
            warn!("Soft kernel failed to signal completion: {}", e);
        }
    }

    /// Whether `entry` has to wait behind a stream that has no data yet
    fn must_park(&self, entry: &SubmissionEntry) -> bool {
        match entry.op {
            Operation::Read { fd, len, .. } if len > 0 => {
                self.parked.iter().any(|p| read_fd(p) == Some(fd)) || !stream_ready(fd)
            }
            _ => false,
        }
    }

    fn retry_parked(&mut self, queues: &SoftQueues) {
        if self.parked.is_empty() {
            return;
        }

        let mut blocked: Vec<RawFd> = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.parked.len());
        while let Some(entry) = self.parked.pop_front() {
            let fd = read_fd(&entry).unwrap_or(-1);
            if blocked.contains(&fd) || !stream_ready(fd) {
                blocked.push(fd);
                waiting.push_back(entry);
                continue;
            }
            let completion = self.execute(entry);
            self.post(queues, completion);
        }
        self.parked = waiting;
    }

    fn cancel_parked(&mut self, queues: &SoftQueues) {
        if !self.parked.is_empty() {
            debug!("Soft kernel cancelling {} parked stream reads", self.parked.len());
        }
        while let Some(entry) = self.parked.pop_front() {
            let completion = CompletionEntry {
                token: entry.token,
                result: -libc::ECANCELED,
                buffer_id: None,
            };
            self.post(queues, completion);
        }
    }

    /// Sleep until the doorbell rings, a parked stream polls readable, or
    /// `idle` elapses
    fn idle(&self, queues: &SoftQueues, idle: Duration) {
        if self.parked.is_empty() {
            if let Err(e) = queues.doorbell.wait(Some(idle)) {
                warn!("Soft kernel doorbell failed: {}", e);
                thread::sleep(idle);
            }
            return;
        }

        let mut fds = vec![pollfd(queues.doorbell.raw_fd())];
        for fd in self.parked.iter().filter_map(read_fd) {
            if !fds.iter().any(|p| p.fd == fd) {
                fds.push(pollfd(fd));
            }
        }

        let timeout_ms = idle.as_millis().min(i32::MAX as u128) as libc::c_int;
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 && errno() != libc::EINTR {
            warn!("Soft kernel poll failed: {}", std::io::Error::last_os_error());
            thread::sleep(idle);
            return;
        }
        if fds[0].revents != 0 {
            queues.doorbell.drain();
        }
    }

    fn flush_overflow(&mut self, queues: &SoftQueues) {
        while let Some(completion) = self.overflow.pop_front() {
            if let Err(completion) = queues.cq.producer().try_push(completion) {
                self.overflow.push_front(completion);
                break;
            }
        }
    }

    fn execute(&mut self, entry: SubmissionEntry) -> CompletionEntry {
        let token = entry.token;
        trace!("soft kernel: {} {}", token, entry.op.name());

        match entry.op {
            Operation::ProvideBuffers {
                addr,
                len,
                count,
                group,
                bid_start,
            } => {
                let pool = self.pools.entry(group).or_default();
                for index in 0..count {
                    pool.push(KernelBuffer {
                        addr: addr + index as usize * len as usize,
                        len,
                        bid: bid_start.wrapping_add(index),
                    });
                }
                CompletionEntry {
                    token,
                    result: 0,
                    buffer_id: None,
                }
            }
            Operation::Read {
                fd,
                len,
                offset,
                buf_group: Some(group),
                ..
            } => {
                let buffer = match self.pools.get_mut(&group).and_then(Vec::pop) {
                    Some(buffer) => buffer,
                    None => {
                        return CompletionEntry {
                            token,
                            result: -libc::ENOBUFS,
                            buffer_id: None,
                        }
                    }
                };

                match read_at(fd, buffer.addr, len.min(buffer.len), offset) {
                    Ok(produced) => CompletionEntry {
                        token,
                        result: produced as i32,
                        buffer_id: Some(buffer.bid),
                    },
                    Err(errno) => {
                        // Failed reads leave the buffer in the list
                        self.pools.entry(group).or_default().push(buffer);
                        CompletionEntry {
                            token,
                            result: -errno,
                            buffer_id: None,
                        }
                    }
                }
            }
            Operation::Read {
                fd,
                addr,
                len,
                offset,
                buf_group: None,
            } => CompletionEntry {
                token,
                result: match read_at(fd, addr, len, offset) {
                    Ok(produced) => produced as i32,
                    Err(errno) => -errno,
                },
                buffer_id: None,
            },
        }
    }
}

fn read_fd(entry: &SubmissionEntry) -> Option<RawFd> {
    match entry.op {
        Operation::Read { fd, .. } => Some(fd),
        Operation::ProvideBuffers { .. } => None,
    }
}

fn pollfd(fd: RawFd) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    }
}

/// Whether a read on `fd` can run without blocking the worker
///
/// Regular files and block devices always can. Anything else is polled; a
/// descriptor that cannot be inspected is reported ready so the read itself
/// surfaces the error.
fn stream_ready(fd: RawFd) -> bool {
    if fd < 0 {
        return true;
    }

    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } < 0 {
        return true;
    }
    let mode = unsafe { stat.assume_init() }.st_mode & libc::S_IFMT;
    if mode == libc::S_IFREG || mode == libc::S_IFBLK {
        return true;
    }

    let mut fds = [pollfd(fd)];
    loop {
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), 1, 0) };
        if ret >= 0 {
            return ret > 0;
        }
        if errno() != libc::EINTR {
            return true;
        }
    }
}

/// Positional read into raw memory, falling back to a plain read for
/// streams that cannot seek
fn read_at(fd: RawFd, addr: usize, len: u32, offset: u64) -> std::result::Result<usize, i32> {
    if len == 0 {
        return Ok(0);
    }

    loop {
        let ret = unsafe {
            libc::pread(
                fd,
                addr as *mut libc::c_void,
                len as libc::size_t,
                offset as libc::off_t,
            )
        };
        if ret >= 0 {
            return Ok(ret as usize);
        }

        match errno() {
            libc::EINTR => continue,
            libc::ESPIPE => break,
            code => return Err(code),
        }
    }

    loop {
        let ret = unsafe { libc::read(fd, addr as *mut libc::c_void, len as libc::size_t) };
        if ret >= 0 {
            return Ok(ret as usize);
        }
        match errno() {
            libc::EINTR => continue,
            code => return Err(code),
        }
    }
}

fn errno() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO)
}
