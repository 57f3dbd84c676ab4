//! Buffer allocation and handle lifecycle
//!
//! The allocator owns the shared-memory service seam and, when the
//! host configures one, the framebuffer slot pool. Every successful
//! allocation performs exactly one segment create and one map; every
//! free performs exactly one unmap and release. A mapping failure
//! tears the fresh segment back down before the error returns, so no
//! failure path leaks a descriptor.

use log::{debug, error};

use crate::format::{BufferUsage, PixelFormat};
use crate::framebuffer::FramebufferPool;
use crate::handle::{BufferHandle, RawHandle};
use crate::layout::BufferLayout;
use crate::{round_up_to_page, Error, Result};

/// Diagnostic tag attached to every created segment
const SEGMENT_NAME: &str = "gralloc-buffer";

/// Identifier of one shared-memory segment, issued by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmId(pub u32);

/// Shared-memory primitive consumed by the allocator
///
/// Implementations provide segment creation, CPU mapping, and
/// teardown. All calls are synchronous and may block on system-level
/// primitives, but are expected to complete promptly or fail outright.
pub trait ShmService {
    /// Create a segment of at least `size` bytes tagged with a
    /// diagnostic `name`.
    fn create(&self, name: &str, size: usize) -> Result<ShmId>;

    /// Map `size` bytes of a segment into the caller's address space.
    fn map(&self, id: ShmId, size: usize) -> Result<usize>;

    /// Undo a mapping established by [`map`](Self::map).
    fn unmap(&self, id: ShmId, base: usize, size: usize) -> Result<()>;

    /// Release the segment descriptor. The segment disappears once
    /// every holder has released it.
    fn release(&self, id: ShmId) -> Result<()>;
}

/// Graphics buffer allocator
///
/// A request is resolved, laid out, and then backed either by the
/// framebuffer slot pool (scanout requests that fit a slot) or by a
/// fresh shared-memory segment. The general path has no shared state,
/// so concurrent allocations on different handles never contend; only
/// the pool's bitmask is locked, briefly, on the scanout path.
pub struct Allocator<S: ShmService> {
    shm: S,
    pool: Option<FramebufferPool>,
}

impl<S: ShmService> Allocator<S> {
    /// Allocator without display memory; every request takes the
    /// shared-memory path.
    pub fn new(shm: S) -> Self {
        Self { shm, pool: None }
    }

    /// Allocator with a framebuffer pool for scanout requests.
    pub fn with_framebuffer(shm: S, pool: FramebufferPool) -> Self {
        Self {
            shm,
            pool: Some(pool),
        }
    }

    pub fn framebuffer_pool(&self) -> Option<&FramebufferPool> {
        self.pool.as_ref()
    }

    /// The shared-memory service this allocator drives.
    pub fn shm_service(&self) -> &S {
        &self.shm
    }

    /// Allocate a `width` x `height` buffer.
    ///
    /// Returns the handle, already mapped for CPU access, and the row
    /// stride in pixels. The stride is reported as 0 when `format` is
    /// the flexible YCbCr format: callers of that format query plane
    /// strides out-of-band instead of assuming a single linear stride.
    pub fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: BufferUsage,
    ) -> Result<(BufferHandle, usize)> {
        let resolved = format.resolve(usage)?;
        let layout = BufferLayout::compute(width, height, &resolved.descriptor())?;

        let handle = match self.framebuffer_target(usage, layout.frame_size()) {
            Some(pool) => self.acquire_framebuffer(pool)?,
            None => self.alloc_buffer(layout.size)?,
        };

        debug!(
            "gralloc: allocated {width}x{height} {format:?} usage {usage:?}: \
             size {} stride {}",
            handle.size(),
            layout.stride
        );

        let stride = if format.is_flexible() { 0 } else { layout.stride };
        Ok((handle, stride))
    }

    /// Free a buffer produced by [`allocate`](Self::allocate).
    ///
    /// The handle is poisoned afterwards; freeing it again (or any
    /// other use) fails with [`Error::InvalidHandle`].
    pub fn free(&self, handle: &mut BufferHandle) -> Result<()> {
        handle.validate()?;
        if handle.is_imported() {
            // Imported handles are unregistered, not freed: the
            // exporter still owns the segment.
            return Err(Error::InvalidHandle);
        }

        if handle.is_framebuffer() {
            let pool = self.pool.as_ref().ok_or(Error::InvalidHandle)?;
            let slot = handle.slot().ok_or(Error::InvalidHandle)?;
            pool.release(slot)?;
        } else {
            self.teardown_mapping(handle)?;
            let id = handle.shm().ok_or(Error::InvalidHandle)?;
            self.shm.release(id)?;
        }

        handle.poison();
        Ok(())
    }

    /// Mapped base address for CPU access.
    pub fn lock(&self, handle: &BufferHandle) -> Result<usize> {
        handle.validate()?;
        handle.mapped_base().ok_or(Error::InvalidHandle)
    }

    /// End a CPU access begun with [`lock`](Self::lock).
    ///
    /// Mappings are long-lived, so this only validates; it exists so
    /// lock/unlock pairs bracket CPU access in caller code.
    pub fn unlock(&self, handle: &BufferHandle) -> Result<()> {
        handle.validate()
    }

    /// Import a handle exported by another holder and map it locally.
    ///
    /// Ownership of the segment stays with the exporter; the imported
    /// handle is torn down with [`unregister`](Self::unregister), not
    /// [`free`](Self::free).
    pub fn register(&self, raw: RawHandle) -> Result<BufferHandle> {
        let mut handle = BufferHandle::new_imported(raw);
        handle.validate()?;
        let base = self.shm.map(raw.shm, raw.size).map_err(|err| {
            error!("gralloc: failed to map imported segment {:?}: {err}", raw.shm);
            err
        })?;
        handle.set_mapped(base);
        Ok(handle)
    }

    /// Unmap an imported handle. The exporter's segment is untouched.
    pub fn unregister(&self, handle: &mut BufferHandle) -> Result<()> {
        handle.validate()?;
        if !handle.is_imported() {
            return Err(Error::InvalidHandle);
        }
        self.teardown_mapping(handle)?;
        handle.poison();
        Ok(())
    }

    /// Scanout requests whose frame fits one display slot go to the
    /// pool. The comparison uses the tight frame size: a slot holds
    /// exactly one native-mode frame, with no room for the slack pad.
    fn framebuffer_target(&self, usage: BufferUsage, frame_size: usize) -> Option<&FramebufferPool> {
        if !usage.contains(BufferUsage::DISPLAY_SCANOUT) {
            return None;
        }
        self.pool
            .as_ref()
            .filter(|pool| frame_size <= pool.slot_size())
    }

    fn acquire_framebuffer(&self, pool: &FramebufferPool) -> Result<BufferHandle> {
        let slot = pool.acquire().map_err(|err| {
            error!("gralloc: framebuffer pool exhausted ({} slots)", pool.slot_count());
            err
        })?;
        Ok(BufferHandle::new_framebuffer(
            slot,
            pool.slot_base(slot),
            pool.slot_size(),
        ))
    }

    /// General path: one segment create plus one map, with the segment
    /// released again if the map fails.
    fn alloc_buffer(&self, size: usize) -> Result<BufferHandle> {
        let size = round_up_to_page(size);

        let id = self.shm.create(SEGMENT_NAME, size).map_err(|err| {
            error!("gralloc: couldn't create shm segment of {size} bytes: {err}");
            err
        })?;

        let mut handle = BufferHandle::new_shm(id, size);
        match self.shm.map(id, size) {
            Ok(base) => {
                handle.set_mapped(base);
                Ok(handle)
            }
            Err(err) => {
                error!("gralloc: mapping fresh segment {id:?} failed: {err}");
                // The half-built allocation must not survive the error.
                let _ = self.shm.release(id);
                Err(err)
            }
        }
    }

    fn teardown_mapping(&self, handle: &mut BufferHandle) -> Result<()> {
        let id = handle.shm().ok_or(Error::InvalidHandle)?;
        if let Some(base) = handle.mapped_base() {
            self.shm.unmap(id, base, handle.size())?;
            handle.clear_mapped();
        }
        Ok(())
    }
}
