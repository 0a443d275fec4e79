//! Buffer layout math
//!
//! Pure calculators over the format table: the uncompressed-view (ULA)
//! layout, the compressed layout (per-plane metadata and pixel-data sizes)
//! and the stride rules. Everything here is side-effect free; the lifecycle
//! manager combines the results with allocator and hardware state.

use crate::error::{DriverError, Result};
use crate::format::{BufferAttrs, MissingPlane, StdFormat, MAX_STRIDE};

/// All buffer region sizes round up to this
pub const SIZE_ALIGN: u64 = 4096;
/// Metadata pitch rounds up to this many tiles
pub const META_PITCH_ALIGN: u64 = 64;
/// Metadata lines round up to this many tile rows
pub const META_LINES_ALIGN: u64 = 16;
/// Device cache line, the unit of descriptor address fields
pub const CACHE_LINE: u64 = 64;

pub fn align(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}

/// Layout of the uncompressed view inside the reserved window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlaLayout {
    /// Total extent size, 4096-aligned
    pub total: u64,
    /// Bytes of the luma plane (0 for chroma-only images)
    pub y_plane_size: u64,
    /// Offset of the chroma plane from the extent base
    pub uv_start_offset: u64,
}

/// Per-plane sizes of the compressed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressedLayout {
    pub metadata_p0: u64,
    pub pixeldata_p0: u64,
    pub metadata_p1: u64,
    pub pixeldata_p1: u64,
    /// Compressed row stride in bytes, TP10 only
    pub tp10_stride: u64,
}

impl CompressedLayout {
    /// Smallest device mapping that can back this layout
    pub fn min_mapping_size(&self) -> u64 {
        self.metadata_p0 + self.pixeldata_p0 + self.metadata_p1 + self.pixeldata_p1
    }
}

/// Convert plane-0 pixels to bytes
pub fn pixel_to_bytes(format: StdFormat, width_p: u32, height_p: u32) -> (u32, u32) {
    let p = format.geometry().plane[0];
    (
        width_p * p.pixel_bytes / p.per_pixel,
        height_p * p.pixel_bytes / p.per_pixel,
    )
}

/// Row stride of the compressed image in bytes
pub fn compressed_stride(format: StdFormat, width: u32) -> u64 {
    let p = format.geometry().plane[0];
    align(width as u64, p.macro_tile.width as u64) * p.pixel_bytes as u64 / p.per_pixel as u64
}

/// Check a caller stride against the hardware rules.
///
/// TP10 programs its compressed stride separately, so any 64-byte-aligned
/// stride wide enough for a row is accepted. Every other format requires
/// the caller stride to equal the compressed stride exactly.
pub fn stride_is_valid(format: StdFormat, width: u32, stride: u32) -> bool {
    let (width_b, _) = pixel_to_bytes(format, width, 0);
    if stride < width_b || stride > MAX_STRIDE {
        return false;
    }
    if format == StdFormat::Tp10 {
        stride % 64 == 0
    } else {
        stride as u64 == compressed_stride(format, width)
    }
}

/// Metadata buffer size of one plane, 4096-aligned
pub fn metadata_plane_size(format: StdFormat, width: u32, height: u32, plane: usize) -> u64 {
    let p = format.geometry().plane[plane];
    let (width, height) = if plane == 1 {
        (width / 2, height / 2)
    } else {
        (width, height)
    };
    let pitch = align(
        (width as u64).div_ceil(p.tile.width as u64),
        META_PITCH_ALIGN,
    );
    let lines = align(
        (height as u64).div_ceil(p.tile.height as u64),
        META_LINES_ALIGN,
    );
    // One byte of metadata per tile.
    align(pitch * lines, SIZE_ALIGN)
}

/// Pixel-data buffer size of one plane, 4096-aligned
pub fn pixeldata_plane_size(format: StdFormat, width: u32, height: u32, plane: usize) -> u64 {
    let p = format.geometry().plane[plane];
    let (width, height) = if plane == 1 {
        (width / 2, height / 2)
    } else {
        (width, height)
    };
    let pitch = align(width as u64, p.macro_tile.width as u64);
    let lines = align(height as u64, p.macro_tile.height as u64);
    align(
        pitch * lines * p.pixel_bytes as u64 / p.per_pixel as u64,
        SIZE_ALIGN,
    )
}

/// Bytes one plane occupies in the uncompressed view
fn ula_plane_size(
    format: StdFormat,
    stride: u32,
    scanlines: u32,
    plane: usize,
    tile_pad: bool,
) -> u64 {
    let mut rows = if plane == 1 {
        (scanlines / 2) as u64
    } else {
        scanlines as u64
    };
    if tile_pad {
        let tile_height = format.geometry().plane[plane].tile.height as u64;
        rows = align(rows, tile_height);
    }
    stride as u64 * rows
}

/// Uncompressed-view layout for validated attributes.
///
/// When both planes are present the luma plane is not tile-padded; clients
/// lay out the chroma plane directly after it plus the planar padding.
/// Single-plane variants place the present plane at offset zero.
pub fn ula_layout(attrs: &BufferAttrs) -> Result<UlaLayout> {
    let std = attrs
        .format
        .std_format()
        .ok_or(DriverError::InvalidAttributes {
            reason: "linear images have no compressed layout",
        })?;

    let stride = attrs.stride;
    let scanlines = attrs.scanlines;
    let size;
    let y_plane_size;
    let uv_start_offset;

    if std.planes() == 1 {
        size = ula_plane_size(std, stride, scanlines, 0, true);
        uv_start_offset = size;
        y_plane_size = size;
    } else {
        match attrs.format.missing_plane() {
            MissingPlane::None => {
                let y = ula_plane_size(std, stride, scanlines, 0, false);
                y_plane_size = y;
                uv_start_offset = y + attrs.planar_padding as u64;
                size = uv_start_offset + ula_plane_size(std, stride, scanlines, 1, true);
            }
            MissingPlane::Chroma => {
                size = ula_plane_size(std, stride, scanlines, 0, true);
                uv_start_offset = size;
                y_plane_size = size;
            }
            MissingPlane::Luma => {
                size = ula_plane_size(std, stride, scanlines, 1, true);
                uv_start_offset = 0;
                y_plane_size = 0;
            }
        }
    }

    let total = align(size, SIZE_ALIGN);
    if total == 0 {
        return Err(DriverError::InvalidAttributes {
            reason: "zero-sized uncompressed view",
        });
    }
    Ok(UlaLayout {
        total,
        y_plane_size,
        uv_start_offset,
    })
}

/// Check that the chroma plane cannot overlap the luma plane's tiles.
///
/// Applies only when the format defines both planes. The chroma start must
/// be cache-line aligned and at or past the luma footprint rounded up to a
/// whole row of luma tiles.
pub fn validate_uv_alignment(attrs: &BufferAttrs, layout: &UlaLayout) -> Result<()> {
    let Some(std) = attrs.format.std_format() else {
        return Ok(());
    };
    if std.planes() != 2 {
        return Ok(());
    }

    if layout.uv_start_offset % CACHE_LINE != 0 {
        return Err(DriverError::InvalidAttributes {
            reason: "chroma plane start is not cache-line aligned",
        });
    }

    let y_tile_height = std.geometry().plane[0].tile.height as u64;
    let y_tile_row_bytes = y_tile_height * attrs.stride as u64;
    let y_footprint = align(layout.y_plane_size, y_tile_row_bytes);
    if layout.uv_start_offset < y_footprint {
        return Err(DriverError::InvalidAttributes {
            reason: "chroma plane overlaps the luma tile footprint",
        });
    }
    Ok(())
}

/// Compressed layout for validated attributes
pub fn compressed_layout(attrs: &BufferAttrs) -> Result<CompressedLayout> {
    let std = attrs
        .format
        .std_format()
        .ok_or(DriverError::InvalidAttributes {
            reason: "linear images have no compressed layout",
        })?;

    let missing = attrs.format.missing_plane();
    let mut layout = CompressedLayout::default();

    if missing != MissingPlane::Luma {
        layout.metadata_p0 = metadata_plane_size(std, attrs.width, attrs.height, 0);
        layout.pixeldata_p0 = pixeldata_plane_size(std, attrs.width, attrs.height, 0);
    }
    if std.planes() == 2 && missing != MissingPlane::Chroma {
        layout.metadata_p1 = metadata_plane_size(std, attrs.width, attrs.height, 1);
        layout.pixeldata_p1 = pixeldata_plane_size(std, attrs.width, attrs.height, 1);
    }
    if std == StdFormat::Tp10 {
        let stride_p = align(attrs.width as u64, 192);
        layout.tp10_stride = stride_p / 3 + stride_p;
    }
    Ok(layout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ImageFormat, TargetMask};

    fn attrs(format: ImageFormat, w: u32, h: u32, stride: u32, scanlines: u32) -> BufferAttrs {
        BufferAttrs {
            format,
            width: w,
            height: h,
            stride,
            scanlines,
            planar_padding: 0,
            targets: TargetMask::CPU,
            ..BufferAttrs::linear()
        }
    }

    #[test]
    fn test_align_rounds_up() {
        assert_eq!(align(0, 4096), 0);
        assert_eq!(align(1, 4096), 4096);
        assert_eq!(align(4096, 4096), 4096);
        assert_eq!(align(4097, 64), 4160);
    }

    #[test]
    fn test_nv12_ula_layout() {
        // Luma 64*64 unpadded, chroma 64*32 already a whole number of
        // 8-row tiles; total rounds to 4096.
        let a = attrs(ImageFormat::Nv12, 64, 64, 64, 64);
        let l = ula_layout(&a).unwrap();
        assert_eq!(l.y_plane_size, 64 * 64);
        assert_eq!(l.uv_start_offset, 64 * 64);
        assert_eq!(l.total, align(64 * 64 + 64 * 32, 4096));
        assert_eq!(l.total % 4096, 0);
    }

    #[test]
    fn test_planar_padding_shifts_chroma() {
        let mut a = attrs(ImageFormat::Nv12, 64, 64, 64, 64);
        a.planar_padding = 512;
        let l = ula_layout(&a).unwrap();
        assert_eq!(l.uv_start_offset, 64 * 64 + 512);
    }

    #[test]
    fn test_luma_only_pads_to_tile_height() {
        // NV12 luma tiles are 8 rows; 65 scanlines pad to 72.
        let a = attrs(ImageFormat::Nv12Luma, 64, 64, 64, 65);
        let l = ula_layout(&a).unwrap();
        assert_eq!(l.y_plane_size, 64 * 72);
        assert_eq!(l.uv_start_offset, l.y_plane_size);
    }

    #[test]
    fn test_chroma_only_rebases_to_zero() {
        let a = attrs(ImageFormat::Nv12Chroma, 64, 64, 64, 64);
        let l = ula_layout(&a).unwrap();
        assert_eq!(l.uv_start_offset, 0);
        assert_eq!(l.y_plane_size, 0);
        // 32 chroma rows, 8-row tiles, no padding needed.
        assert_eq!(l.total, 4096);
    }

    #[test]
    fn test_rgba_single_plane() {
        let a = attrs(ImageFormat::Rgba8888, 64, 64, 256, 64);
        let l = ula_layout(&a).unwrap();
        // Tile-padded (4-row tiles, 64 divides evenly).
        assert_eq!(l.y_plane_size, 256 * 64);
        assert_eq!(l.uv_start_offset, l.y_plane_size);
    }

    #[test]
    fn test_nv12_compressed_layout() {
        let a = attrs(ImageFormat::Nv12, 64, 64, 128, 64);
        let c = compressed_layout(&a).unwrap();
        // Luma: ceil(64/32)=2 tiles -> pitch 64; ceil(64/8)=8 rows -> 16.
        assert_eq!(c.metadata_p0, 4096);
        // Luma pixels: align(64,128)*align(64,32)*1 = 8192.
        assert_eq!(c.pixeldata_p0, 8192);
        // Chroma 32x32: pitch 64, lines 16 -> 1024 -> 4096.
        assert_eq!(c.metadata_p1, 4096);
        // align(32,64)*align(32,32)*2 = 4096.
        assert_eq!(c.pixeldata_p1, 4096);
        assert_eq!(c.tp10_stride, 0);
        assert_eq!(c.min_mapping_size(), 20480);
    }

    #[test]
    fn test_luma_only_zeroes_chroma_sizes() {
        let a = attrs(ImageFormat::Nv12Luma, 64, 64, 128, 64);
        let c = compressed_layout(&a).unwrap();
        assert_ne!(c.metadata_p0, 0);
        assert_eq!(c.metadata_p1, 0);
        assert_eq!(c.pixeldata_p1, 0);
    }

    #[test]
    fn test_chroma_only_zeroes_luma_sizes() {
        let a = attrs(ImageFormat::Nv12Chroma, 64, 64, 128, 64);
        let c = compressed_layout(&a).unwrap();
        assert_eq!(c.metadata_p0, 0);
        assert_eq!(c.pixeldata_p0, 0);
        assert_ne!(c.metadata_p1, 0);
    }

    #[test]
    fn test_tp10_compressed_stride() {
        let a = attrs(ImageFormat::Tp10, 100, 64, 192, 64);
        let c = compressed_layout(&a).unwrap();
        // align(100,192) = 192; 192/3 + 192 = 256.
        assert_eq!(c.tp10_stride, 256);
    }

    #[test]
    fn test_stride_rules() {
        // NV12: must equal the compressed stride.
        assert!(stride_is_valid(StdFormat::Nv12, 64, 128));
        assert!(!stride_is_valid(StdFormat::Nv12, 64, 64));
        assert!(!stride_is_valid(StdFormat::Nv12, 64, 256));
        // Below a row's bytes is always invalid.
        assert!(!stride_is_valid(StdFormat::Rgba, 64, 255));
        assert!(stride_is_valid(StdFormat::Rgba, 64, 256));
        // TP10: any 64-aligned stride covering the row.
        assert!(stride_is_valid(StdFormat::Tp10, 96, 128));
        assert!(stride_is_valid(StdFormat::Tp10, 96, 65536));
        assert!(!stride_is_valid(StdFormat::Tp10, 96, 130));
        assert!(!stride_is_valid(StdFormat::Tp10, 96, 65600));
    }

    #[test]
    fn test_pixel_to_bytes_ratio() {
        assert_eq!(pixel_to_bytes(StdFormat::Rgba, 64, 0).0, 256);
        assert_eq!(pixel_to_bytes(StdFormat::Nv12, 64, 0).0, 64);
        assert_eq!(pixel_to_bytes(StdFormat::P010, 64, 64), (128, 128));
        // 4 bytes per 3 pixels.
        assert_eq!(pixel_to_bytes(StdFormat::Tp10, 96, 0).0, 128);
    }

    #[test]
    fn test_uv_alignment_rejects_overlap() {
        // Luma footprint 64x64 rounds to 8-row tile rows of 64 bytes:
        // 4096 bytes. An uv start below that must fail.
        let a = attrs(ImageFormat::Nv12, 64, 63, 64, 63);
        let l = ula_layout(&a).unwrap();
        // y_plane_size = 64*63 = 4032, footprint aligns to 4096 and the
        // chroma starts at 4032.
        assert!(validate_uv_alignment(&a, &l).is_err());

        let a = attrs(ImageFormat::Nv12, 64, 64, 64, 64);
        let l = ula_layout(&a).unwrap();
        assert!(validate_uv_alignment(&a, &l).is_ok());
    }

    #[test]
    fn test_uv_alignment_requires_cache_line() {
        let mut a = attrs(ImageFormat::Nv12, 64, 64, 64, 64);
        a.planar_padding = 32;
        let l = ula_layout(&a).unwrap();
        assert!(validate_uv_alignment(&a, &l).is_err());
    }
}
