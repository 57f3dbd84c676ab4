//! Heap-backed allocator backends
//!
//! This crate implements the allocator's external seams over plain
//! heap memory: [`MemShm`] stands in for the system shared-memory
//! service and [`MemDisplay`] for the display device. Both are used
//! in-process and by the integration tests; the fault-injection knobs
//! on [`MemShm`] exist so the allocator's failure paths can be
//! exercised deterministically.

use std::collections::HashMap;
use std::sync::Mutex;

use log::trace;

use gralloc::{DisplayGeometry, Error, Result, ShmId, ShmService};

/// One simulated segment. The payload is boxed so its address stays
/// stable while the map entry moves around.
struct Segment {
    data: Box<[u8]>,
    mapped: u32,
}

#[derive(Default)]
struct ShmState {
    segments: HashMap<u32, Segment>,
    next_id: u32,
    created: u64,
    fail_next_map: bool,
}

/// In-process shared-memory service
///
/// Segments are zero-filled boxed slices; mapping hands out the
/// slice's address. An optional segment quota and a forced-map-failure
/// switch support failure-path testing.
pub struct MemShm {
    state: Mutex<ShmState>,
    quota: Option<usize>,
}

impl MemShm {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ShmState::default()),
            quota: None,
        }
    }

    /// Service that refuses to create more than `quota` live segments.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            state: Mutex::new(ShmState::default()),
            quota: Some(quota),
        }
    }

    /// Make the next `map` call fail, as an unmappable segment would.
    pub fn fail_next_map(&self) {
        self.state.lock().unwrap().fail_next_map = true;
    }

    /// Live (created and not yet released) segments
    pub fn segment_count(&self) -> usize {
        self.state.lock().unwrap().segments.len()
    }

    /// Total segments ever created
    pub fn created(&self) -> u64 {
        self.state.lock().unwrap().created
    }

    /// Number of active mappings of one segment
    pub fn mapping_count(&self, id: ShmId) -> usize {
        self.state
            .lock()
            .unwrap()
            .segments
            .get(&id.0)
            .map_or(0, |seg| seg.mapped as usize)
    }
}

impl Default for MemShm {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmService for MemShm {
    fn create(&self, name: &str, size: usize) -> Result<ShmId> {
        let mut state = self.state.lock().unwrap();
        if self.quota.is_some_and(|quota| state.segments.len() >= quota) {
            return Err(Error::OutOfMemory);
        }
        let id = state.next_id;
        state.next_id += 1;
        state.created += 1;
        state.segments.insert(
            id,
            Segment {
                data: vec![0u8; size].into_boxed_slice(),
                mapped: 0,
            },
        );
        trace!("mem-shm: created segment {id} ({name}, {size} bytes)");
        Ok(ShmId(id))
    }

    fn map(&self, id: ShmId, size: usize) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.fail_next_map {
            state.fail_next_map = false;
            return Err(Error::MapFailed);
        }
        let seg = state.segments.get_mut(&id.0).ok_or(Error::MapFailed)?;
        if size > seg.data.len() {
            return Err(Error::MapFailed);
        }
        seg.mapped += 1;
        Ok(seg.data.as_ptr() as usize)
    }

    fn unmap(&self, id: ShmId, base: usize, _size: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let seg = state.segments.get_mut(&id.0).ok_or(Error::InvalidHandle)?;
        if seg.mapped == 0 || base != seg.data.as_ptr() as usize {
            return Err(Error::InvalidHandle);
        }
        seg.mapped -= 1;
        Ok(())
    }

    fn release(&self, id: ShmId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .segments
            .remove(&id.0)
            .map(|_| ())
            .ok_or(Error::InvalidHandle)
    }
}

/// In-process display device: owns a heap region standing in for
/// display memory and reports the geometry the framebuffer pool is
/// built from.
pub struct MemDisplay {
    region: Box<[u8]>,
    line_length: usize,
    yres: usize,
    slot_count: usize,
}

impl MemDisplay {
    /// Display of `width` x `yres` pixels at 4 bytes each, with
    /// `slot_count` flippable framebuffers.
    pub fn new(width: usize, yres: usize, slot_count: usize) -> Self {
        let line_length = width * 4;
        Self {
            region: vec![0u8; line_length * yres * slot_count].into_boxed_slice(),
            line_length,
            yres,
            slot_count,
        }
    }

    pub fn geometry(&self) -> DisplayGeometry {
        DisplayGeometry {
            line_length: self.line_length,
            yres: self.yres,
            base: self.region.as_ptr() as usize,
            slot_count: self.slot_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_map_release() {
        let shm = MemShm::new();
        let id = shm.create("test", 4096).unwrap();
        let base = shm.map(id, 4096).unwrap();
        assert_ne!(base, 0);
        assert_eq!(shm.mapping_count(id), 1);
        shm.unmap(id, base, 4096).unwrap();
        shm.release(id).unwrap();
        assert_eq!(shm.segment_count(), 0);
        assert_eq!(shm.release(id), Err(Error::InvalidHandle));
    }

    #[test]
    fn quota_is_enforced() {
        let shm = MemShm::with_quota(1);
        let id = shm.create("a", 4096).unwrap();
        assert_eq!(shm.create("b", 4096), Err(Error::OutOfMemory));
        shm.release(id).unwrap();
        assert!(shm.create("c", 4096).is_ok());
    }

    #[test]
    fn oversized_map_rejected() {
        let shm = MemShm::new();
        let id = shm.create("small", 4096).unwrap();
        assert_eq!(shm.map(id, 8192), Err(Error::MapFailed));
    }

    #[test]
    fn forced_map_failure_is_one_shot() {
        let shm = MemShm::new();
        let id = shm.create("flaky", 4096).unwrap();
        shm.fail_next_map();
        assert_eq!(shm.map(id, 4096), Err(Error::MapFailed));
        assert!(shm.map(id, 4096).is_ok());
    }

    #[test]
    fn display_geometry_matches_region() {
        let display = MemDisplay::new(1920, 1080, 2);
        let geom = display.geometry();
        assert_eq!(geom.line_length, 1920 * 4);
        assert_eq!(geom.yres, 1080);
        assert_eq!(geom.slot_count, 2);
        assert_ne!(geom.base, 0);
    }
}
