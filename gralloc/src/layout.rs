//! Buffer layout computation
//!
//! The size/stride relationship computed here is the de facto wire
//! format of the buffer system: display, codec, and compositor all
//! recompute it independently from width/height/format and must agree
//! bit-for-bit. All multiplications are checked so an oversized
//! request fails instead of under-allocating.

use crate::format::FormatDescriptor;
use crate::{align, Error, Result, SIZE_SLACK, TILE_HEIGHT, TILE_WIDTH};

/// Per-plane geometry for semi-planar YUV 4:2:0 layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Luma row stride in bytes
    pub y_stride: usize,
    /// Interleaved chroma row stride in bytes
    pub c_stride: usize,
    /// Chroma plane height in rows (`height / 2`)
    pub c_height: usize,
    /// Byte offset of the chroma plane within the buffer
    pub c_offset: usize,
}

/// Computed allocation geometry for one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    /// Total allocation size in bytes, before page rounding
    pub size: usize,
    /// Row stride in pixels
    pub stride: usize,
    /// Plane geometry, present for planar formats only
    pub planes: Option<PlaneLayout>,
}

impl BufferLayout {
    /// Pixel payload size in bytes, excluding the trailing slack pad.
    ///
    /// Display memory is sized to exact frames, so slot fitting checks
    /// this rather than [`size`](Self::size): the slack is a safety
    /// margin for sampling consumers, and a scanout slot has no reader
    /// past the last row. Planar layouts carry no slack.
    pub fn frame_size(&self) -> usize {
        if self.planes.is_some() {
            self.size
        } else {
            self.size - SIZE_SLACK
        }
    }

    /// Compute the layout for a `width` x `height` buffer of the given
    /// format.
    ///
    /// Both dimensions must be nonzero; zero is rejected even though
    /// the arithmetic would produce a (useless) nonzero size.
    pub fn compute(width: u32, height: u32, desc: &FormatDescriptor) -> Result<BufferLayout> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument);
        }
        let width = width as usize;
        let height = height as usize;

        if desc.planar {
            Self::compute_planar(width, height, desc)
        } else {
            Self::compute_packed(width, height, desc)
        }
    }

    /// Packed formats: stride and height round up to the 2x2 tile, and
    /// a fixed slack trails the pixel data.
    fn compute_packed(width: usize, height: usize, desc: &FormatDescriptor) -> Result<BufferLayout> {
        let stride = align(width, TILE_WIDTH);
        let size = align(height, TILE_HEIGHT)
            .checked_mul(stride)
            .and_then(|rows| rows.checked_mul(desc.bytes_per_pixel))
            .and_then(|bytes| bytes.checked_add(SIZE_SLACK))
            .ok_or(Error::InvalidArgument)?;

        Ok(BufferLayout {
            size,
            stride,
            planes: None,
        })
    }

    /// Semi-planar YUV 4:2:0: full-resolution luma plane followed by
    /// one interleaved CbCr plane at half resolution in both axes. An
    /// odd height loses its last row from chroma (callers pass even
    /// dimensions).
    fn compute_planar(width: usize, height: usize, desc: &FormatDescriptor) -> Result<BufferLayout> {
        let y_stride = align(
            width
                .checked_mul(desc.bytes_per_pixel)
                .ok_or(Error::InvalidArgument)?,
            desc.pixel_align,
        );
        let c_stride = align(y_stride / 2, desc.pixel_align);
        let c_height = height / 2;

        let y_size = y_stride.checked_mul(height).ok_or(Error::InvalidArgument)?;
        let c_size = c_height
            .checked_mul(c_stride)
            .and_then(|plane| plane.checked_mul(2))
            .ok_or(Error::InvalidArgument)?;
        let size = y_size.checked_add(c_size).ok_or(Error::InvalidArgument)?;

        Ok(BufferLayout {
            size,
            stride: y_stride / desc.bytes_per_pixel,
            planes: Some(PlaneLayout {
                y_stride,
                c_stride,
                c_height,
                c_offset: y_size,
            }),
        })
    }
}
