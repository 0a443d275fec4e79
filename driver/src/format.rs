//! Image formats, tile geometry and buffer attributes
//!
//! The geometry table mirrors the compression block's tiling: per plane a
//! pixel-byte ratio, the compression tile and the macro tile. All geometry
//! math that consumes the table lives in [`crate::geometry`].

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};
use crate::geometry;

pub const MAX_WIDTH: u32 = 10 * 1024;
pub const MAX_HEIGHT: u32 = 10 * 1024;
pub const MAX_STRIDE: u32 = 64 * 1024;
pub const MAX_PLANAR_PADDING: u32 = 4096;
pub const MAX_SCANLINE_DELTA: u32 = 32 * 1024;

/// Caller-visible image format.
///
/// The `*Luma`/`*Chroma` variants carry a single plane of the two-plane
/// format; the absent plane contributes no bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// No compression; geometry fields are ignored
    Linear,
    Rgba8888,
    Nv12,
    Nv12Luma,
    Nv12Chroma,
    Nv124r,
    Nv124rLuma,
    Nv124rChroma,
    Tp10,
    Tp10Luma,
    Tp10Chroma,
    P010,
    P010Luma,
    P010Chroma,
    P016,
    P016Luma,
    P016Chroma,
}

/// Which plane a single-plane variant leaves out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPlane {
    None,
    /// Luma-only variant: the chroma plane is absent
    Chroma,
    /// Chroma-only variant: the luma plane is absent
    Luma,
}

impl ImageFormat {
    pub fn is_linear(self) -> bool {
        self == ImageFormat::Linear
    }

    /// Underlying tiled format, `None` for linear
    pub fn std_format(self) -> Option<StdFormat> {
        use ImageFormat::*;
        match self {
            Linear => None,
            Rgba8888 => Some(StdFormat::Rgba),
            Nv12 | Nv12Luma | Nv12Chroma => Some(StdFormat::Nv12),
            Nv124r | Nv124rLuma | Nv124rChroma => Some(StdFormat::Nv124r),
            Tp10 | Tp10Luma | Tp10Chroma => Some(StdFormat::Tp10),
            P010 | P010Luma | P010Chroma => Some(StdFormat::P010),
            P016 | P016Luma | P016Chroma => Some(StdFormat::P016),
        }
    }

    pub fn missing_plane(self) -> MissingPlane {
        use ImageFormat::*;
        match self {
            Nv12Luma | Nv124rLuma | Tp10Luma | P010Luma | P016Luma => MissingPlane::Chroma,
            Nv12Chroma | Nv124rChroma | Tp10Chroma | P010Chroma | P016Chroma => MissingPlane::Luma,
            _ => MissingPlane::None,
        }
    }
}

/// Tiled formats the block understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdFormat {
    Rgba,
    Nv12,
    Nv124r,
    P010,
    Tp10,
    P016,
}

/// Tile dimensions in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileDim {
    pub width: u32,
    pub height: u32,
}

/// Per-plane tiling parameters.
///
/// `pixel_bytes / per_pixel` is the bytes-per-pixel ratio; TP10 packs
/// 3 pixels into 4 bytes so the ratio is fractional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneGeometry {
    pub pixel_bytes: u32,
    pub per_pixel: u32,
    pub tile: TileDim,
    pub macro_tile: TileDim,
}

/// Full tiling description of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatGeometry {
    pub planes: u32,
    pub plane: [PlaneGeometry; 2],
}

const fn plane(
    pixel_bytes: u32,
    per_pixel: u32,
    tw: u32,
    th: u32,
    mtw: u32,
    mth: u32,
) -> PlaneGeometry {
    PlaneGeometry {
        pixel_bytes,
        per_pixel,
        tile: TileDim {
            width: tw,
            height: th,
        },
        macro_tile: TileDim {
            width: mtw,
            height: mth,
        },
    }
}

static RGBA_GEOMETRY: FormatGeometry = FormatGeometry {
    planes: 1,
    plane: [plane(4, 1, 16, 4, 64, 16), plane(0, 1, 0, 0, 0, 0)],
};

static NV12_GEOMETRY: FormatGeometry = FormatGeometry {
    planes: 2,
    plane: [plane(1, 1, 32, 8, 128, 32), plane(2, 1, 16, 8, 64, 32)],
};

static NV124R_GEOMETRY: FormatGeometry = FormatGeometry {
    planes: 2,
    plane: [plane(1, 1, 64, 4, 256, 16), plane(2, 1, 32, 4, 128, 16)],
};

static P010_GEOMETRY: FormatGeometry = FormatGeometry {
    planes: 2,
    plane: [plane(2, 1, 32, 4, 128, 16), plane(4, 1, 16, 4, 64, 16)],
};

static TP10_GEOMETRY: FormatGeometry = FormatGeometry {
    planes: 2,
    plane: [plane(4, 3, 48, 4, 192, 16), plane(8, 3, 24, 4, 96, 16)],
};

impl StdFormat {
    pub fn geometry(self) -> &'static FormatGeometry {
        match self {
            StdFormat::Rgba => &RGBA_GEOMETRY,
            StdFormat::Nv12 => &NV12_GEOMETRY,
            StdFormat::Nv124r => &NV124R_GEOMETRY,
            // P016 shares P010 tiling
            StdFormat::P010 | StdFormat::P016 => &P010_GEOMETRY,
            StdFormat::Tp10 => &TP10_GEOMETRY,
        }
    }

    pub fn planes(self) -> u32 {
        self.geometry().planes
    }

    /// Format code programmed into the descriptor record
    pub fn hw_code(self) -> u16 {
        match self {
            StdFormat::Rgba => 0,
            StdFormat::Nv12 => 1,
            StdFormat::Nv124r => 2,
            StdFormat::P010 => 3,
            StdFormat::Tp10 => 4,
            StdFormat::P016 => 5,
        }
    }

    /// Required caller-stride alignment in bytes
    pub fn stride_alignment(self) -> u32 {
        match self {
            StdFormat::Tp10 => 64,
            StdFormat::Nv12 => 128,
            StdFormat::Rgba | StdFormat::Nv124r | StdFormat::P010 | StdFormat::P016 => 256,
        }
    }
}

/// Chroma subsampling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Subsample {
    Yuv420,
    Yuv422,
}

/// Compression mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    Lossless,
    Lossy,
}

bitflags! {
    /// Subsystems that will access the buffer
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TargetMask: u32 {
        const CPU = 1 << 0;
        const GPU = 1 << 1;
        const DISPLAY = 1 << 2;
        const VIDEO = 1 << 3;
    }
}

impl Serialize for TargetMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for TargetMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        Ok(TargetMask::from_bits_retain(u32::deserialize(deserializer)?))
    }
}

/// Caller-supplied buffer attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferAttrs {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Bytes per row of the uncompressed view
    pub stride: u32,
    /// Rows in the uncompressed view, `>= height`
    pub scanlines: u32,
    /// Bytes between the luma and chroma planes
    pub planar_padding: u32,
    pub subsample: Subsample,
    pub targets: TargetMask,
    pub batch_size: u32,
    pub compression: Compression,
}

impl BufferAttrs {
    /// Attributes of a buffer with no compressed view
    pub fn linear() -> Self {
        Self {
            format: ImageFormat::Linear,
            width: 0,
            height: 0,
            stride: 0,
            scanlines: 0,
            planar_padding: 0,
            subsample: Subsample::Yuv420,
            targets: TargetMask::CPU,
            batch_size: 1,
            compression: Compression::Lossless,
        }
    }

    /// Full validation. Linear short-circuits every geometry field.
    pub fn validate(&self) -> Result<()> {
        let Some(std) = self.format.std_format() else {
            return Ok(());
        };

        if self.width == 0 || self.height == 0 || self.stride == 0 || self.scanlines == 0 {
            return Err(DriverError::InvalidAttributes {
                reason: "zero width, height, stride or scanlines",
            });
        }
        if self.width > MAX_WIDTH {
            return Err(DriverError::InvalidAttributes {
                reason: "width too large",
            });
        }
        if self.height > MAX_HEIGHT {
            return Err(DriverError::InvalidAttributes {
                reason: "height too large",
            });
        }
        if self.stride > MAX_STRIDE {
            return Err(DriverError::InvalidAttributes {
                reason: "stride too large",
            });
        }
        if self.scanlines < self.height || self.scanlines > self.height + MAX_SCANLINE_DELTA {
            return Err(DriverError::InvalidAttributes {
                reason: "scanlines out of range",
            });
        }
        if self.planar_padding > MAX_PLANAR_PADDING {
            return Err(DriverError::InvalidAttributes {
                reason: "planar padding too large",
            });
        }
        if self.subsample != Subsample::Yuv420 {
            return Err(DriverError::InvalidAttributes {
                reason: "only 4:2:0 subsampling is supported",
            });
        }
        if self.targets != TargetMask::CPU {
            return Err(DriverError::InvalidAttributes {
                reason: "only the CPU target is supported",
            });
        }
        if self.batch_size != 1 {
            return Err(DriverError::InvalidAttributes {
                reason: "batch size must be 1",
            });
        }
        if self.compression != Compression::Lossless {
            return Err(DriverError::InvalidAttributes {
                reason: "only lossless compression is supported",
            });
        }
        if !geometry::stride_is_valid(std, self.width, self.stride) {
            return Err(DriverError::InvalidAttributes {
                reason: "stride does not match the compressed geometry",
            });
        }
        Ok(())
    }
}
