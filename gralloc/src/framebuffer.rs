//! Framebuffer slot pool
//!
//! Scanout buffers come from a fixed pool of pre-existing
//! display-memory slots rather than from fresh shared-memory
//! segments. The pool is sized once from the geometry the display
//! device reports and never grows or shrinks; the only shared mutable
//! state is the in-use bitmask, held under a lock for the bit
//! scan/set/clear only.

use spin::Mutex;

use crate::{Error, Result};

/// Maximum slots the u32 in-use mask can track
pub const MAX_SLOTS: usize = 32;

/// Display-memory geometry, reported once by the display device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    /// Bytes per scanline
    pub line_length: usize,
    /// Vertical resolution in lines
    pub yres: usize,
    /// Base address of the display-memory region
    pub base: usize,
    /// Number of concurrently displayable framebuffers
    pub slot_count: usize,
}

/// Fixed pool of display-memory slots
pub struct FramebufferPool {
    base: usize,
    slot_size: usize,
    slot_count: usize,
    in_use: Mutex<u32>,
}

impl FramebufferPool {
    /// Build the pool from display geometry. Slot size is one full
    /// frame (`line_length * yres`).
    pub fn new(geometry: DisplayGeometry) -> Result<Self> {
        let slot_size = geometry
            .line_length
            .checked_mul(geometry.yres)
            .ok_or(Error::InvalidArgument)?;
        if slot_size == 0 || geometry.slot_count == 0 || geometry.slot_count > MAX_SLOTS {
            return Err(Error::InvalidArgument);
        }
        Ok(Self {
            base: geometry.base,
            slot_size,
            slot_count: geometry.slot_count,
            in_use: Mutex::new(0),
        })
    }

    /// Bytes per slot (one full frame)
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Mapped address of a slot
    pub fn slot_base(&self, index: usize) -> usize {
        self.base + index * self.slot_size
    }

    /// Claim the lowest-numbered free slot.
    pub fn acquire(&self) -> Result<usize> {
        let mut mask = self.in_use.lock();
        let index = (!*mask).trailing_zeros() as usize;
        if index >= self.slot_count {
            return Err(Error::OutOfSlots);
        }
        *mask |= 1 << index;
        Ok(index)
    }

    /// Return a slot to the pool. The index must come from a handle
    /// produced by [`acquire`](Self::acquire); out-of-range or
    /// already-free indices are rejected rather than silently
    /// corrupting the mask.
    pub fn release(&self, index: usize) -> Result<()> {
        if index >= self.slot_count {
            return Err(Error::InvalidHandle);
        }
        let mut mask = self.in_use.lock();
        let bit = 1u32 << index;
        if *mask & bit == 0 {
            return Err(Error::InvalidHandle);
        }
        *mask &= !bit;
        Ok(())
    }

    /// Number of slots currently claimed
    pub fn in_use(&self) -> usize {
        self.in_use.lock().count_ones() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(slots: usize) -> FramebufferPool {
        FramebufferPool::new(DisplayGeometry {
            line_length: 1920 * 4,
            yres: 1080,
            base: 0xd000_0000,
            slot_count: slots,
        })
        .unwrap()
    }

    #[test]
    fn slots_hand_out_lowest_free_first() {
        let pool = pool(3);
        assert_eq!(pool.acquire(), Ok(0));
        assert_eq!(pool.acquire(), Ok(1));
        pool.release(0).unwrap();
        assert_eq!(pool.acquire(), Ok(0));
        assert_eq!(pool.acquire(), Ok(2));
        assert_eq!(pool.acquire(), Err(Error::OutOfSlots));
    }

    #[test]
    fn slot_addresses_are_spaced_by_frame_size() {
        let pool = pool(2);
        assert_eq!(pool.slot_size(), 1920 * 4 * 1080);
        assert_eq!(pool.slot_base(0), 0xd000_0000);
        assert_eq!(pool.slot_base(1), 0xd000_0000 + 1920 * 4 * 1080);
    }

    #[test]
    fn release_validates_index() {
        let pool = pool(2);
        assert_eq!(pool.release(5), Err(Error::InvalidHandle));
        // In-range but never acquired.
        assert_eq!(pool.release(1), Err(Error::InvalidHandle));
        let idx = pool.acquire().unwrap();
        pool.release(idx).unwrap();
        assert_eq!(pool.release(idx), Err(Error::InvalidHandle));
    }

    #[test]
    fn bad_geometry_rejected() {
        let mut geom = DisplayGeometry {
            line_length: 0,
            yres: 1080,
            base: 0,
            slot_count: 2,
        };
        assert!(FramebufferPool::new(geom).is_err());
        geom.line_length = 4096;
        geom.slot_count = 0;
        assert!(FramebufferPool::new(geom).is_err());
        geom.slot_count = MAX_SLOTS + 1;
        assert!(FramebufferPool::new(geom).is_err());
        geom.slot_count = MAX_SLOTS;
        assert!(FramebufferPool::new(geom).is_ok());
    }
}
