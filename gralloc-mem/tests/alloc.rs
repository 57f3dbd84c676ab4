//! End-to-end allocator behavior over the heap-backed backends.

use std::sync::Arc;
use std::thread;

use gralloc::{
    Allocator, BufferUsage, Error, FramebufferPool, PixelFormat, round_up_to_page,
};
use gralloc_mem::{MemDisplay, MemShm};

fn allocator() -> Allocator<MemShm> {
    Allocator::new(MemShm::new())
}

#[test]
fn fullhd_rgba_size_and_stride() {
    let alloc = allocator();
    let (mut handle, stride) = alloc
        .allocate(1920, 1080, PixelFormat::Rgba8888, BufferUsage::empty())
        .unwrap();

    assert_eq!(stride, 1920);
    // 1080 * 1920 * 4 + 4 slack, rounded up to the page size.
    assert_eq!(handle.size(), round_up_to_page(8_294_404));
    assert_eq!(handle.size(), 8_298_496);
    assert!(handle.mapped_base().is_some());

    alloc.free(&mut handle).unwrap();
}

#[test]
fn qcif_semi_planar_size() {
    let alloc = allocator();
    let (mut handle, stride) = alloc
        .allocate(176, 144, PixelFormat::YCrCb420Sp, BufferUsage::empty())
        .unwrap();

    assert_eq!(stride, 176);
    assert_eq!(handle.size(), round_up_to_page(38_016));

    alloc.free(&mut handle).unwrap();
}

#[test]
fn zero_width_rejected_before_any_allocation() {
    let shm = MemShm::new();
    let alloc = Allocator::new(shm);
    let err = alloc
        .allocate(0, 100, PixelFormat::Rgba8888, BufferUsage::empty())
        .unwrap_err();
    assert_eq!(err, Error::InvalidArgument);
    assert_eq!(alloc.shm_service().created(), 0);
}

#[test]
fn flexible_format_reports_zero_stride() {
    let alloc = allocator();
    let (mut handle, stride) = alloc
        .allocate(640, 480, PixelFormat::YCbCr420Flex, BufferUsage::CAMERA_WRITE)
        .unwrap();

    // Allocated as semi-planar YUV, but the caller-visible stride is
    // forced to 0: plane strides are queried out-of-band.
    assert_eq!(stride, 0);
    assert!(handle.size() >= 640 * 480 + 2 * (240 * 320));

    alloc.free(&mut handle).unwrap();

    // With no camera-write intent there is no concrete mapping.
    assert_eq!(
        alloc
            .allocate(640, 480, PixelFormat::YCbCr420Flex, BufferUsage::GPU_TEXTURE)
            .unwrap_err(),
        Error::InvalidArgument
    );
}

#[test]
fn double_free_returns_invalid_handle() {
    let alloc = allocator();
    let (mut handle, _) = alloc
        .allocate(64, 64, PixelFormat::Rgb565, BufferUsage::CPU_WRITE)
        .unwrap();

    alloc.free(&mut handle).unwrap();
    assert_eq!(alloc.free(&mut handle), Err(Error::InvalidHandle));
    assert_eq!(alloc.lock(&handle), Err(Error::InvalidHandle));
}

#[test]
fn map_failure_releases_fresh_segment() {
    let shm = MemShm::new();
    shm.fail_next_map();
    let alloc = Allocator::new(shm);

    let err = alloc
        .allocate(320, 240, PixelFormat::Rgb888, BufferUsage::empty())
        .unwrap_err();
    assert_eq!(err, Error::MapFailed);

    // The segment was created, then torn down on the failure path.
    assert_eq!(alloc.shm_service().created(), 1);
    assert_eq!(alloc.shm_service().segment_count(), 0);
}

#[test]
fn shm_quota_surfaces_as_out_of_memory() {
    let alloc = Allocator::new(MemShm::with_quota(0));
    assert_eq!(
        alloc
            .allocate(64, 64, PixelFormat::Rgba8888, BufferUsage::empty())
            .unwrap_err(),
        Error::OutOfMemory
    );
}

#[test]
fn lock_gives_cpu_access_to_mapped_pixels() {
    let alloc = allocator();
    let (mut handle, stride) = alloc
        .allocate(8, 8, PixelFormat::Rgba8888, BufferUsage::CPU_WRITE)
        .unwrap();

    let vaddr = alloc.lock(&handle).unwrap();
    assert_eq!(Some(vaddr), handle.mapped_base());
    unsafe {
        let pixels = vaddr as *mut u8;
        pixels.write(0xab);
        pixels.add(stride * 4).write(0xcd);
        assert_eq!(pixels.read(), 0xab);
    }
    alloc.unlock(&handle).unwrap();

    alloc.free(&mut handle).unwrap();
}

#[test]
fn register_maps_without_taking_ownership() {
    let alloc = allocator();
    let (mut exported, _) = alloc
        .allocate(320, 240, PixelFormat::Rgba8888, BufferUsage::GPU_TEXTURE)
        .unwrap();

    let raw = exported.raw_parts().unwrap();
    let mut imported = alloc.register(raw).unwrap();
    assert!(imported.is_imported());
    assert!(imported.mapped_base().is_some());
    assert_eq!(imported.size(), exported.size());

    // Importers unregister; only the exporter frees.
    assert_eq!(alloc.free(&mut imported), Err(Error::InvalidHandle));
    alloc.unregister(&mut imported).unwrap();

    alloc.free(&mut exported).unwrap();
    assert_eq!(alloc.shm_service().segment_count(), 0);
}

#[test]
fn native_mode_scanout_uses_framebuffer_slots() {
    // Pool built from the display's own mode: a slot holds exactly
    // one 1920x1080 frame, and a scanout request for that mode must
    // land in it rather than falling back to shared memory.
    let display = MemDisplay::new(1920, 1080, 2);
    let pool = FramebufferPool::new(display.geometry()).unwrap();
    let alloc = Allocator::with_framebuffer(MemShm::new(), pool);

    let (mut a, _) = alloc
        .allocate(1920, 1080, PixelFormat::Rgba8888, BufferUsage::DISPLAY_SCANOUT)
        .unwrap();
    let (mut b, _) = alloc
        .allocate(1920, 1080, PixelFormat::Rgba8888, BufferUsage::DISPLAY_SCANOUT)
        .unwrap();

    assert!(a.is_framebuffer());
    assert!(b.is_framebuffer());
    assert_eq!(a.slot(), Some(0));
    assert_eq!(b.slot(), Some(1));
    // No shared-memory traffic on the display path.
    assert_eq!(alloc.shm_service().created(), 0);
    // Slots are spaced by one full frame.
    let geom = display.geometry();
    assert_eq!(
        b.mapped_base().unwrap() - a.mapped_base().unwrap(),
        geom.line_length * geom.yres
    );

    alloc.free(&mut a).unwrap();
    alloc.free(&mut b).unwrap();
    assert_eq!(alloc.framebuffer_pool().unwrap().in_use(), 0);

    // A frame larger than the slot cannot scan out of the pool.
    let (mut big, _) = alloc
        .allocate(1920, 1200, PixelFormat::Rgba8888, BufferUsage::DISPLAY_SCANOUT)
        .unwrap();
    assert!(!big.is_framebuffer());
    alloc.free(&mut big).unwrap();
}

#[test]
fn scanout_without_pool_falls_back_to_shared_memory() {
    let alloc = allocator();
    let (mut handle, _) = alloc
        .allocate(640, 480, PixelFormat::Rgb565, BufferUsage::DISPLAY_SCANOUT)
        .unwrap();
    assert!(!handle.is_framebuffer());
    alloc.free(&mut handle).unwrap();
}

#[test]
fn concurrent_scanout_allocations_get_distinct_slots() {
    const SLOTS: usize = 8;

    let display = MemDisplay::new(1280, 720, SLOTS);
    let pool = FramebufferPool::new(display.geometry()).unwrap();
    let alloc = Arc::new(Allocator::with_framebuffer(MemShm::new(), pool));

    let workers: Vec<_> = (0..SLOTS)
        .map(|_| {
            let alloc = Arc::clone(&alloc);
            thread::spawn(move || {
                alloc
                    .allocate(1280, 720, PixelFormat::Rgba8888, BufferUsage::DISPLAY_SCANOUT)
                    .unwrap()
                    .0
            })
        })
        .collect();

    let mut handles: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();

    let mut slots: Vec<_> = handles.iter().map(|h| h.slot().unwrap()).collect();
    slots.sort_unstable();
    slots.dedup();
    assert_eq!(slots.len(), SLOTS, "every allocation got its own slot");

    // Pool is full; one more scanout request is refused.
    assert_eq!(
        alloc
            .allocate(1280, 720, PixelFormat::Rgba8888, BufferUsage::DISPLAY_SCANOUT)
            .unwrap_err(),
        Error::OutOfSlots
    );

    for handle in &mut handles {
        alloc.free(handle).unwrap();
    }
    assert_eq!(alloc.framebuffer_pool().unwrap().in_use(), 0);
}
