//! Graphics buffer allocator
//!
//! This crate computes byte-accurate memory layouts for graphics
//! buffers (packed RGB/BGR families and semi-planar YUV 4:2:0) and
//! manages their lifetime as opaque, shareable handles backed by a
//! shared-memory segment.
//!
//! # Architecture
//!
//! The allocator sits between buffer consumers (display scanout, GPU
//! samplers, video codecs) and the platform's shared-memory primitive.
//! Every consumer recomputes stride and plane offsets from
//! width/height/format alone, so the layout arithmetic here is a
//! shared contract that must be reproducible bit-for-bit. It provides:
//!
//! - Format resolution (usage-dependent mapping of flexible formats)
//! - Layout computation (stride, total size, chroma plane geometry)
//! - Buffer handle lifecycle (create, map, free, import)
//! - A fixed-slot pool for buffers placed in display memory
//!
//! # Usage
//!
//! ```ignore
//! use gralloc::{Allocator, BufferUsage, PixelFormat};
//!
//! let alloc = Allocator::new(shm);
//! let (mut handle, stride) =
//!     alloc.allocate(1920, 1080, PixelFormat::Rgba8888, BufferUsage::empty())?;
//! let vaddr = alloc.lock(&handle)?;
//! // ... CPU access ...
//! alloc.unlock(&handle)?;
//! alloc.free(&mut handle)?;
//! ```

#![cfg_attr(not(test), no_std)]

pub mod alloc;
pub mod format;
pub mod framebuffer;
pub mod handle;
pub mod layout;

// Re-exports
pub use crate::alloc::{Allocator, ShmId, ShmService};
pub use crate::format::{BufferUsage, FormatDescriptor, PixelFormat, ResolvedFormat};
pub use crate::framebuffer::{DisplayGeometry, FramebufferPool};
pub use crate::handle::{BufferHandle, HandleFlags, RawHandle};
pub use crate::layout::{BufferLayout, PlaneLayout};

/// Allocator version
pub const GRALLOC_VERSION: (u32, u32, u32) = (0, 1, 0);

/// Page size used when rounding shared-memory segment sizes
pub const PAGE_SIZE: usize = 4096;

/// Tile width in pixels for non-planar layouts
pub const TILE_WIDTH: usize = 2;

/// Tile height in rows for non-planar layouts
pub const TILE_HEIGHT: usize = 2;

/// Slack appended to every non-planar allocation, reserved for
/// format-specific metadata and as a safety margin for consumers that
/// read slightly past the nominal bound
pub const SIZE_SLACK: usize = 4;

/// Result type for allocator operations
pub type Result<T> = core::result::Result<T, Error>;

/// Allocator error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Invalid dimensions, unrecognized pixel format, or a flexible
    /// format that cannot be resolved for the given usage
    InvalidArgument,
    /// Shared-memory segment creation failed (quota or OOM)
    OutOfMemory,
    /// No free slot in the framebuffer pool
    OutOfSlots,
    /// Segment created but could not be mapped
    MapFailed,
    /// Handle failed structural validation (freed, corrupted, or not
    /// produced by this allocator)
    InvalidHandle,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::OutOfMemory => write!(f, "Out of shared memory"),
            Error::OutOfSlots => write!(f, "Out of framebuffer slots"),
            Error::MapFailed => write!(f, "Mapping failed"),
            Error::InvalidHandle => write!(f, "Invalid buffer handle"),
        }
    }
}

/// Round `value` up to a multiple of `alignment` (`alignment >= 1`).
#[inline]
pub(crate) fn align(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Round a byte size up to the platform page size.
#[inline]
pub fn round_up_to_page(size: usize) -> usize {
    align(size, PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_basics() {
        assert_eq!(align(0, 2), 0);
        assert_eq!(align(1, 2), 2);
        assert_eq!(align(2, 2), 2);
        assert_eq!(align(175, 1), 175);
        assert_eq!(align(4097, 4096), 8192);
    }

    #[test]
    fn page_rounding() {
        assert_eq!(round_up_to_page(1), PAGE_SIZE);
        assert_eq!(round_up_to_page(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(round_up_to_page(8_294_404), 8_298_496);
    }
}
