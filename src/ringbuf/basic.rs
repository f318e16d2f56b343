//! Lock-free single-producer single-consumer ring buffer
//!
//! Used as the submission and completion queues of the software kernel: the
//! ring owner produces submissions and consumes completions, the kernel
//! worker does the opposite.

use std::{
    alloc::{alloc, dealloc, Layout},
    marker::PhantomData,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::error::{RingError, Result};

/// Lock-free single-producer single-consumer ring buffer
#[derive(Debug)]
pub struct RingBuffer<T> {
    /// Slot storage
    buffer: NonNull<T>,
    /// Capacity (power of 2)
    capacity: usize,
    /// Mask for fast modulo operation
    mask: usize,
    /// Tail, advanced by the producer
    write_pos: AtomicUsize,
    /// Head, advanced by the consumer
    read_pos: AtomicUsize,
    _phantom: PhantomData<T>,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the given capacity
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(RingError::invalid_argument(
                "capacity",
                "Capacity must be a power of 2 and greater than 0",
            ));
        }

        let layout = Layout::array::<T>(capacity)
            .map_err(|_| RingError::platform("Failed to create layout for ring buffer"))?;
        if layout.size() == 0 {
            return Err(RingError::invalid_argument(
                "capacity",
                "Zero-sized slots are not supported",
            ));
        }

        let buffer = unsafe {
            let ptr = alloc(layout) as *mut T;
            NonNull::new(ptr).ok_or_else(|| RingError::platform("Failed to allocate ring buffer"))?
        };

        Ok(Self {
            buffer,
            capacity,
            mask: capacity - 1,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
            _phantom: PhantomData,
        })
    }

    /// Get the capacity of the ring buffer
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the current number of entries in the buffer
    pub fn len(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        write_pos.wrapping_sub(read_pos)
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if the buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Create a producer handle
    ///
    /// Only one thread may hold a producer at a time.
    pub fn producer(&self) -> Producer<'_, T> {
        Producer {
            buffer: self.buffer,
            capacity: self.capacity,
            mask: self.mask,
            write_pos: &self.write_pos,
            read_pos: &self.read_pos,
            _phantom: PhantomData,
        }
    }

    /// Create a consumer handle
    ///
    /// Only one thread may hold a consumer at a time.
    pub fn consumer(&self) -> Consumer<'_, T> {
        Consumer {
            buffer: self.buffer,
            mask: self.mask,
            write_pos: &self.write_pos,
            read_pos: &self.read_pos,
            _phantom: PhantomData,
        }
    }
}

impl<T> Drop for RingBuffer<T> {
    fn drop(&mut self) {
        // Drop any remaining entries
        let consumer = self.consumer();
        while consumer.try_pop().is_some() {}

        if let Ok(layout) = Layout::array::<T>(self.capacity) {
            unsafe {
                dealloc(self.buffer.as_ptr() as *mut u8, layout);
            }
        }
    }
}

unsafe impl<T: Send> Send for RingBuffer<T> {}
unsafe impl<T: Send> Sync for RingBuffer<T> {}

/// Producer handle for writing to the ring buffer
#[derive(Debug)]
pub struct Producer<'a, T> {
    buffer: NonNull<T>,
    capacity: usize,
    mask: usize,
    write_pos: &'a AtomicUsize,
    read_pos: &'a AtomicUsize,
    _phantom: PhantomData<T>,
}

impl<'a, T> Producer<'a, T> {
    /// Try to push an entry, handing it back when the ring is full
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);

        if write_pos.wrapping_sub(read_pos) >= self.capacity {
            return Err(item);
        }

        let index = write_pos & self.mask;
        unsafe {
            std::ptr::write(self.buffer.as_ptr().add(index), item);
        }

        // Publish the slot
        self.write_pos
            .store(write_pos.wrapping_add(1), Ordering::Release);

        Ok(())
    }

    /// Push an entry, spinning until space is available
    pub fn push(&self, mut item: T) {
        loop {
            match self.try_push(item) {
                Ok(()) => return,
                Err(returned) => {
                    item = returned;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Get available space for writing
    pub fn available_space(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Relaxed);
        let read_pos = self.read_pos.load(Ordering::Acquire);
        self.capacity - write_pos.wrapping_sub(read_pos)
    }
}

/// Consumer handle for reading from the ring buffer
#[derive(Debug)]
pub struct Consumer<'a, T> {
    buffer: NonNull<T>,
    mask: usize,
    write_pos: &'a AtomicUsize,
    read_pos: &'a AtomicUsize,
    _phantom: PhantomData<T>,
}

impl<'a, T> Consumer<'a, T> {
    /// Try to pop the oldest entry
    pub fn try_pop(&self) -> Option<T> {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        if read_pos == write_pos {
            return None;
        }

        let index = read_pos & self.mask;
        let item = unsafe { std::ptr::read(self.buffer.as_ptr().add(index)) };

        // Release the slot back to the producer
        self.read_pos
            .store(read_pos.wrapping_add(1), Ordering::Release);

        Some(item)
    }

    /// Peek at the oldest entry without consuming it
    pub fn peek(&self) -> Option<&T> {
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        let write_pos = self.write_pos.load(Ordering::Acquire);

        if read_pos == write_pos {
            return None;
        }

        let index = read_pos & self.mask;
        Some(unsafe { &*self.buffer.as_ptr().add(index) })
    }

    /// Get the number of entries ready to consume
    pub fn available_items(&self) -> usize {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let read_pos = self.read_pos.load(Ordering::Relaxed);
        write_pos.wrapping_sub(read_pos)
    }
}
