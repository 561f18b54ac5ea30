//! Pixel/vertex formats and image layouts.

use serde::{Deserialize, Serialize};

/// Pixel and vertex attribute formats.
///
/// Discriminants are ordered: every color (and vertex attribute) format sits
/// below [`Format::END_COLOR_FORMATS`], every depth/stencil format at or
/// above it. Render pass generation relies on that ordering to split
/// attachments into color and depth/stencil references.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum Format {
    /// No format.
    Undefined = 0,

    // Color formats
    /// 8-bit red channel, unsigned normalized.
    R8Unorm = 1,
    /// 8-bit RGBA channels, unsigned normalized.
    Rgba8Unorm = 2,
    /// 8-bit RGBA channels, sRGB.
    Rgba8Srgb = 3,
    /// 8-bit BGRA channels, unsigned normalized.
    #[default]
    Bgra8Unorm = 4,
    /// 8-bit BGRA channels, sRGB.
    Bgra8Srgb = 5,
    /// 16-bit RGBA channels, float.
    Rgba16Sfloat = 6,
    /// 32-bit red channel, float.
    R32Sfloat = 7,
    /// 32-bit RG channels, float.
    Rg32Sfloat = 8,
    /// 32-bit RGB channels, float. Used for vertex attributes.
    Rgb32Sfloat = 9,
    /// 32-bit RGBA channels, float.
    Rgba32Sfloat = 10,
    /// 32-bit red channel, unsigned integer.
    R32Uint = 11,

    // Depth/stencil formats
    /// 16-bit depth.
    D16Unorm = 64,
    /// 32-bit depth, float.
    D32Sfloat = 65,
    /// 24-bit depth with 8-bit stencil.
    D24UnormS8Uint = 66,
    /// 32-bit depth float with 8-bit stencil.
    D32SfloatS8Uint = 67,
}

impl Format {
    /// First discriminant that is not a color format.
    pub const END_COLOR_FORMATS: u32 = 64;

    /// Returns true if this format is used as a color attachment.
    pub fn is_color(self) -> bool {
        self != Self::Undefined && (self as u32) < Self::END_COLOR_FORMATS
    }

    /// Returns true if this is a depth or depth/stencil format.
    pub fn is_depth_stencil(self) -> bool {
        (self as u32) >= Self::END_COLOR_FORMATS
    }

    /// Returns true if this format has a stencil component.
    pub fn has_stencil(self) -> bool {
        matches!(self, Self::D24UnormS8Uint | Self::D32SfloatS8Uint)
    }

    /// Returns the size in bytes per pixel or vertex element.
    pub fn block_size(self) -> u32 {
        match self {
            Self::Undefined => 0,
            Self::R8Unorm => 1,
            Self::D16Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::R32Sfloat
            | Self::R32Uint
            | Self::D32Sfloat
            | Self::D24UnormS8Uint => 4,
            Self::Rgba16Sfloat | Self::Rg32Sfloat | Self::D32SfloatS8Uint => 8,
            Self::Rgb32Sfloat => 12,
            Self::Rgba32Sfloat => 16,
        }
    }
}

/// Layout an image is in when accessed by the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ImageLayout {
    /// Contents are undefined and may be discarded.
    #[default]
    Undefined,
    /// General purpose layout.
    General,
    /// Optimal for color attachment writes.
    ColorAttachment,
    /// Optimal for depth/stencil attachment access.
    DepthStencilAttachment,
    /// Optimal for sampling in shaders.
    ShaderReadOnly,
    /// Optimal as a transfer destination.
    TransferDst,
    /// Ready for presentation.
    PresentSrc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_depth_boundary() {
        for format in [
            Format::R8Unorm,
            Format::Rgba8Unorm,
            Format::Bgra8Srgb,
            Format::Rgba16Sfloat,
            Format::Rgb32Sfloat,
            Format::R32Uint,
        ] {
            assert!(format.is_color(), "{format:?} should be a color format");
            assert!(!format.is_depth_stencil());
        }
        for format in [
            Format::D16Unorm,
            Format::D32Sfloat,
            Format::D24UnormS8Uint,
            Format::D32SfloatS8Uint,
        ] {
            assert!(format.is_depth_stencil(), "{format:?} should be depth");
            assert!(!format.is_color());
        }
        assert!(!Format::Undefined.is_color());
        assert!(!Format::Undefined.is_depth_stencil());
    }

    #[test]
    fn test_stencil_formats() {
        assert!(Format::D24UnormS8Uint.has_stencil());
        assert!(!Format::D32Sfloat.has_stencil());
    }

    #[test]
    fn test_block_size() {
        assert_eq!(Format::Rgb32Sfloat.block_size(), 12);
        assert_eq!(Format::Bgra8Unorm.block_size(), 4);
    }
}
