//! Pixel formats and usage-dependent format resolution
//!
//! Every consumer of a buffer recomputes its layout from the format,
//! so the byte widths here are a fixed contract. The flexible
//! [`PixelFormat::YCbCr420Flex`] format is not allocatable as-is: it
//! must first be resolved to a concrete on-device format based on the
//! caller's usage intent.

use bitflags::bitflags;

use crate::{Error, Result};

bitflags! {
    /// Usage-intent flags describing a buffer's intended consumers
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        /// CPU will read the buffer
        const CPU_READ = 1 << 0;
        /// CPU will write the buffer
        const CPU_WRITE = 1 << 1;
        /// GPU will sample the buffer as a texture
        const GPU_TEXTURE = 1 << 2;
        /// GPU will render into the buffer
        const GPU_RENDER = 1 << 3;
        /// Buffer will be scanned out by the display controller
        const DISPLAY_SCANOUT = 1 << 4;
        /// Camera pipeline will write frames into the buffer
        const CAMERA_WRITE = 1 << 5;
        /// Video encoder will read the buffer
        const VIDEO_ENCODE = 1 << 6;
    }
}

/// Caller-visible pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Bgra8888,
    Rgb888,
    Rgb565,
    Raw16,
    Yv12,
    RgbaF16,
    /// Semi-planar YUV 4:2:0 (one luma plane, one interleaved CbCr plane)
    YCrCb420Sp,
    /// Generic flexible YCbCr 4:2:0; must be resolved against usage
    /// before it can be sized or allocated
    YCbCr420Flex,
}

/// Concrete on-device format, produced by [`PixelFormat::resolve`]
///
/// The flexible variant is absent by construction, so layout code
/// never has to re-check for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFormat {
    Rgba8888,
    Rgbx8888,
    Bgra8888,
    Rgb888,
    Rgb565,
    Raw16,
    Yv12,
    RgbaF16,
    YCrCb420Sp,
}

/// Derived per-format layout parameters, recomputed per request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// Bytes per pixel; for planar formats, bytes per luma sample
    pub bytes_per_pixel: usize,
    /// Minimum pixel alignment for plane strides; 1 means no
    /// requirement beyond tile alignment, and is always safe to feed
    /// to [`align`](crate::align)
    pub pixel_align: usize,
    /// Semi-planar YUV 4:2:0 layout
    pub planar: bool,
}

impl PixelFormat {
    /// Resolve this format against the caller's usage intent.
    ///
    /// The flexible format maps to [`ResolvedFormat::YCrCb420Sp`] when
    /// the camera pipeline writes the buffer; with no device-specific
    /// mapping for the given usage, the request is rejected.
    pub fn resolve(self, usage: BufferUsage) -> Result<ResolvedFormat> {
        match self {
            PixelFormat::Rgba8888 => Ok(ResolvedFormat::Rgba8888),
            PixelFormat::Rgbx8888 => Ok(ResolvedFormat::Rgbx8888),
            PixelFormat::Bgra8888 => Ok(ResolvedFormat::Bgra8888),
            PixelFormat::Rgb888 => Ok(ResolvedFormat::Rgb888),
            PixelFormat::Rgb565 => Ok(ResolvedFormat::Rgb565),
            PixelFormat::Raw16 => Ok(ResolvedFormat::Raw16),
            PixelFormat::Yv12 => Ok(ResolvedFormat::Yv12),
            PixelFormat::RgbaF16 => Ok(ResolvedFormat::RgbaF16),
            PixelFormat::YCrCb420Sp => Ok(ResolvedFormat::YCrCb420Sp),
            PixelFormat::YCbCr420Flex => {
                if usage.contains(BufferUsage::CAMERA_WRITE) {
                    Ok(ResolvedFormat::YCrCb420Sp)
                } else {
                    log::error!(
                        "gralloc: no concrete mapping for flexible YCbCr under usage {usage:?}"
                    );
                    Err(Error::InvalidArgument)
                }
            }
        }
    }

    /// Whether callers see this buffer through the flexible-YCbCr
    /// convention (stride reported as 0, plane strides out-of-band)
    pub fn is_flexible(self) -> bool {
        matches!(self, PixelFormat::YCbCr420Flex)
    }
}

impl ResolvedFormat {
    /// Layout parameters for this format.
    pub fn descriptor(self) -> FormatDescriptor {
        let (bytes_per_pixel, pixel_align, planar) = match self {
            ResolvedFormat::RgbaF16 => (8, 1, false),
            ResolvedFormat::Rgba8888 | ResolvedFormat::Rgbx8888 | ResolvedFormat::Bgra8888 => {
                (4, 1, false)
            }
            ResolvedFormat::Rgb888 => (3, 1, false),
            // YV12 is sized as a 16-bit packed format; consumers
            // recompute the same number, so this is load-bearing.
            ResolvedFormat::Rgb565 | ResolvedFormat::Raw16 | ResolvedFormat::Yv12 => (2, 1, false),
            ResolvedFormat::YCrCb420Sp => (1, 1, true),
        };
        FormatDescriptor {
            bytes_per_pixel,
            pixel_align,
            planar,
        }
    }
}
