//! Owned memory regions that back provided buffers

use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    fmt,
    ptr::NonNull,
    slice,
};

use crate::error::{RingError, Result};

/// Default alignment for regions; one page keeps every slot O_DIRECT friendly
pub const DEFAULT_REGION_ALIGNMENT: usize = 4096;

/// A zero-initialised, aligned heap allocation handed to a buffer group
///
/// The allocation never moves once created, so the addresses of the slots
/// carved out of it stay valid for as long as the region is alive. Providing
/// a region moves it into the ring's group registry, which keeps it alive
/// until the ring is closed.
pub struct BufferRegion {
    /// Pointer to the start of the allocation
    data: NonNull<u8>,
    /// Size in bytes
    size: usize,
    /// Layout used for deallocation
    layout: Layout,
}

impl BufferRegion {
    /// Allocate a region of `size` bytes with the default alignment
    pub fn new(size: usize) -> Result<Self> {
        Self::with_alignment(size, DEFAULT_REGION_ALIGNMENT)
    }

    /// Allocate a region of `size` bytes aligned to `align`
    pub fn with_alignment(size: usize, align: usize) -> Result<Self> {
        if size == 0 {
            return Err(RingError::invalid_buffer_spec(
                "size",
                "Region size cannot be zero",
            ));
        }
        if !align.is_power_of_two() {
            return Err(RingError::invalid_buffer_spec(
                "alignment",
                "Alignment must be a power of two",
            ));
        }

        let layout = Layout::from_size_align(size, align)
            .map_err(|_| RingError::invalid_buffer_spec("size", "Invalid region layout"))?;

        let data = unsafe { alloc_zeroed(layout) };
        let data = NonNull::new(data).ok_or_else(|| {
            RingError::platform(format!("Failed to allocate {} byte region", size))
        })?;

        Ok(Self { data, size, layout })
    }

    /// Allocate a region sized for `count` buffers of `length` bytes
    pub fn for_buffers(length: usize, count: usize) -> Result<Self> {
        let size = length.checked_mul(count).ok_or_else(|| {
            RingError::invalid_buffer_spec("count", "Region size overflows usize")
        })?;
        Self::new(size)
    }

    /// Allocate a region and fill it with `bytes`
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut region = Self::new(bytes.len())?;
        region.as_mut_slice().copy_from_slice(bytes);
        Ok(region)
    }

    /// Size of the region in bytes
    pub fn len(&self) -> usize {
        self.size
    }

    /// Regions are never empty; kept for API symmetry with slices
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Alignment of the allocation
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Address of the first byte
    pub fn as_ptr(&self) -> *const u8 {
        self.data.as_ptr()
    }

    /// Mutable address of the first byte
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// The region as a byte slice
    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.size) }
    }

    /// The region as a mutable byte slice
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.size) }
    }

    /// Start address as an integer handle
    pub(crate) fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Bytes `[offset, offset + len)` of the region
    ///
    /// # Safety
    /// The caller must ensure no kernel write to the range is in flight.
    pub(crate) unsafe fn range(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.size);
        slice::from_raw_parts(self.data.as_ptr().add(offset), len)
    }
}

impl Drop for BufferRegion {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr(), self.layout);
        }
    }
}

impl fmt::Debug for BufferRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferRegion")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size)
            .field("alignment", &self.layout.align())
            .finish()
    }
}

// The region is a plain heap allocation; access discipline is enforced by
// the descriptor state machine of the owning group.
unsafe impl Send for BufferRegion {}
unsafe impl Sync for BufferRegion {}
