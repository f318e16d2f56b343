//! Named shared counters and flags
//!
//! The layout is fixed when the state is built: every name maps to one
//! 64-bit atomic slot. Heap backing is enough for threads; memfd backing
//! puts the slots in a `MAP_SHARED` mapping so forked children keep seeing
//! the same values.

use std::{
    ffi::CString,
    fmt,
    os::fd::{AsRawFd, OwnedFd, RawFd},
    sync::atomic::AtomicI64,
};

use memmap2::{MmapMut, MmapOptions};
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};

use crate::error::{RingError, Result};

const SLOT_SIZE: usize = std::mem::size_of::<AtomicI64>();

/// Where the slots live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateBacking {
    /// Process-private heap memory
    #[default]
    Heap,
    /// Anonymous memfd mapping shared across `fork`
    MemFd,
}

/// Kind of a named slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Counter,
    Flag,
}

impl fmt::Display for SlotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotKind::Counter => write!(f, "counter"),
            SlotKind::Flag => write!(f, "flag"),
        }
    }
}

enum Storage {
    Heap(Box<[AtomicI64]>),
    Mapped {
        mmap: MmapMut,
        fd: OwnedFd,
    },
}

/// Fixed table of named atomic slots
pub struct SharedState {
    slots: Vec<(String, SlotKind)>,
    storage: Storage,
}

impl SharedState {
    /// Lay out one slot per name; names must be unique
    pub fn new(name: &str, slots: Vec<(String, SlotKind)>, backing: StateBacking) -> Result<Self> {
        for (index, (slot, _)) in slots.iter().enumerate() {
            if slots[..index].iter().any(|(other, _)| other == slot) {
                return Err(RingError::coordination(format!(
                    "Duplicate shared state name '{}'",
                    slot
                )));
            }
        }

        let storage = match backing {
            StateBacking::Heap => {
                Storage::Heap((0..slots.len()).map(|_| AtomicI64::new(0)).collect())
            }
            StateBacking::MemFd => Self::map_memfd(name, slots.len())?,
        };

        Ok(Self { slots, storage })
    }

    fn map_memfd(name: &str, count: usize) -> Result<Storage> {
        let name_cstr = CString::new(name)
            .map_err(|_| RingError::invalid_argument("name", "Name contains null bytes"))?;
        let fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| RingError::from_io(e.into(), "Failed to create memfd"))?;

        // A zero-length mapping is rejected by mmap
        let size = (count * SLOT_SIZE).max(SLOT_SIZE);
        ftruncate(&fd, size as i64)
            .map_err(|e| RingError::from_io(e.into(), "Failed to size memfd"))?;

        let mmap = unsafe {
            MmapOptions::new()
                .len(size)
                .map_mut(&fd)
                .map_err(|e| RingError::from_io(e, "Failed to map shared state"))?
        };

        // ftruncate zero-fills, which is a valid AtomicI64 of value 0
        Ok(Storage::Mapped { mmap, fd })
    }

    /// Slot for `name`, which must have been declared with `kind`
    pub fn slot(&self, name: &str, kind: SlotKind) -> Result<&AtomicI64> {
        let index = self
            .slots
            .iter()
            .position(|(slot, _)| slot == name)
            .ok_or_else(|| RingError::coordination(format!("Unknown {} '{}'", kind, name)))?;

        let declared = self.slots[index].1;
        if declared != kind {
            return Err(RingError::coordination(format!(
                "'{}' is a {}, not a {}",
                name, declared, kind
            )));
        }

        Ok(self.slot_at(index))
    }

    fn slot_at(&self, index: usize) -> &AtomicI64 {
        match &self.storage {
            Storage::Heap(slots) => &slots[index],
            Storage::Mapped { mmap, .. } => {
                // The mapping is page aligned and sized for every slot
                unsafe { &*(mmap.as_ptr().add(index * SLOT_SIZE) as *const AtomicI64) }
            }
        }
    }

    /// Declared names with their kinds
    pub fn names(&self) -> impl Iterator<Item = (&str, SlotKind)> {
        self.slots.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot was declared
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Backing of the slots
    pub fn backing(&self) -> StateBacking {
        match self.storage {
            Storage::Heap(_) => StateBacking::Heap,
            Storage::Mapped { .. } => StateBacking::MemFd,
        }
    }

    /// The memfd behind a shared mapping
    pub fn raw_fd(&self) -> Option<RawFd> {
        match &self.storage {
            Storage::Heap(_) => None,
            Storage::Mapped { fd, .. } => Some(fd.as_raw_fd()),
        }
    }
}

impl fmt::Debug for SharedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedState")
            .field("slots", &self.slots)
            .field("backing", &self.backing())
            .finish()
    }
}
