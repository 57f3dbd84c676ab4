//! Buffer handles
//!
//! A [`BufferHandle`] is the unit of ownership for one allocated
//! buffer. The holder that received it from `allocate` owns it and is
//! responsible for freeing it; anyone else only ever receives the
//! [`RawHandle`] projection (shared-memory id + size + flags), which
//! is all the state needed to reconstruct a mapping elsewhere.

use bitflags::bitflags;

use crate::alloc::ShmId;
use crate::{Error, Result};

/// Tag checked by [`BufferHandle::validate`]; poisoned on free so a
/// stale handle is detectable
const HANDLE_MAGIC: u32 = 0x6772_6266; // "grbf"

bitflags! {
    /// Per-handle flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HandleFlags: u32 {
        /// Buffer lives in a display-memory slot, not a shared-memory
        /// segment
        const FRAMEBUFFER = 1 << 0;
        /// Handle was imported via `register`, so the segment is owned
        /// by the original allocator, not this holder
        const IMPORTED = 1 << 1;
    }
}

/// Serializable projection of a handle for cross-boundary sharing
///
/// Descriptor and size are the only state a second process or
/// subsystem needs to independently map the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHandle {
    pub shm: ShmId,
    pub size: usize,
    pub offset: usize,
    pub flags: HandleFlags,
}

/// Opaque reference to one allocated graphics buffer
#[derive(Debug)]
pub struct BufferHandle {
    magic: u32,
    /// Backing segment; `None` for framebuffer-slot buffers
    shm: Option<ShmId>,
    size: usize,
    offset: usize,
    flags: HandleFlags,
    /// Slot index, stored at acquisition for framebuffer buffers so
    /// release never derives it from address arithmetic
    slot: Option<usize>,
    /// Process-local mapped base address, when mapped
    base: Option<usize>,
}

impl BufferHandle {
    /// Handle for a shared-memory backed buffer, not yet mapped.
    pub(crate) fn new_shm(shm: ShmId, size: usize) -> Self {
        Self {
            magic: HANDLE_MAGIC,
            shm: Some(shm),
            size,
            offset: 0,
            flags: HandleFlags::empty(),
            slot: None,
            base: None,
        }
    }

    /// Handle for a framebuffer slot, mapped at construction.
    pub(crate) fn new_framebuffer(slot: usize, base: usize, size: usize) -> Self {
        Self {
            magic: HANDLE_MAGIC,
            shm: None,
            size,
            offset: 0,
            flags: HandleFlags::FRAMEBUFFER,
            slot: Some(slot),
            base: Some(base),
        }
    }

    /// Handle reconstructed from an imported [`RawHandle`].
    pub(crate) fn new_imported(raw: RawHandle) -> Self {
        Self {
            magic: HANDLE_MAGIC,
            shm: Some(raw.shm),
            size: raw.size,
            offset: raw.offset,
            flags: raw.flags | HandleFlags::IMPORTED,
            slot: None,
            base: None,
        }
    }

    /// Structural validation; must pass before any destructive
    /// operation on the handle.
    pub fn validate(&self) -> Result<()> {
        if self.magic != HANDLE_MAGIC {
            return Err(Error::InvalidHandle);
        }
        // Exactly one backing: a segment or a pool slot.
        match (self.shm, self.slot) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Projection handed across process/subsystem boundaries.
    ///
    /// Only meaningful for shared-memory backed buffers; framebuffer
    /// slots never leave the compositor process.
    pub fn raw_parts(&self) -> Result<RawHandle> {
        self.validate()?;
        let shm = self.shm.ok_or(Error::InvalidHandle)?;
        Ok(RawHandle {
            shm,
            size: self.size,
            offset: self.offset,
            flags: self.flags & !HandleFlags::IMPORTED,
        })
    }

    pub fn shm(&self) -> Option<ShmId> {
        self.shm
    }

    /// Total size of the backing allocation in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Base offset within the backing segment
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn flags(&self) -> HandleFlags {
        self.flags
    }

    pub fn is_framebuffer(&self) -> bool {
        self.flags.contains(HandleFlags::FRAMEBUFFER)
    }

    pub fn is_imported(&self) -> bool {
        self.flags.contains(HandleFlags::IMPORTED)
    }

    /// Slot index for framebuffer-backed handles
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Process-local mapped base address, if mapped
    pub fn mapped_base(&self) -> Option<usize> {
        self.base
    }

    pub(crate) fn set_mapped(&mut self, base: usize) {
        self.base = Some(base);
    }

    pub(crate) fn clear_mapped(&mut self) {
        self.base = None;
    }

    /// Invalidate after free; every later use fails validation.
    pub(crate) fn poison(&mut self) {
        self.magic = 0;
        self.shm = None;
        self.slot = None;
        self.base = None;
    }
}
