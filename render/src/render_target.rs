//! Render targets registered in the render graph.

use crate::backend::{GpuBackend, TextureHandle};
use crate::error::GraphicsError;
use crate::types::{Extent2d, Format, TextureDescriptor, TextureUsage};

/// An image a render pass can attach: size, format and its backing view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderTarget {
    name: String,
    extent: Extent2d,
    format: Format,
    texture: TextureHandle,
    /// Swapchain images are owned by the swapchain, not by the target.
    owned: bool,
}

impl RenderTarget {
    /// Create a target backed by a new texture.
    pub fn create(
        backend: &dyn GpuBackend,
        name: impl Into<String>,
        extent: Extent2d,
        format: Format,
    ) -> Result<Self, GraphicsError> {
        let name = name.into();
        let descriptor = TextureDescriptor::new_2d(
            extent.width,
            extent.height,
            format,
            TextureUsage::RENDER_ATTACHMENT,
        )
        .with_label(name.clone());
        let texture = backend.create_texture(&descriptor)?;
        Ok(Self {
            name,
            extent,
            format,
            texture,
            owned: true,
        })
    }

    /// Wrap a presentable swapchain image.
    pub fn from_swapchain_image(
        name: impl Into<String>,
        extent: Extent2d,
        format: Format,
        texture: TextureHandle,
    ) -> Self {
        Self {
            name: name.into(),
            extent,
            format,
            texture,
            owned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn format(&self) -> Format {
        self.format
    }

    /// View used as a framebuffer attachment.
    pub fn view(&self) -> TextureHandle {
        self.texture
    }

    /// Release the backing texture if this target owns it.
    pub fn destroy(self, backend: &dyn GpuBackend) {
        if self.owned {
            backend.destroy_texture(self.texture);
        }
    }
}

/// Check that every target shares the extent of the first one.
///
/// Returns the common extent, or `None` for an empty set.
pub fn common_extent<'a>(
    targets: impl IntoIterator<Item = &'a RenderTarget>,
) -> Result<Option<Extent2d>, GraphicsError> {
    let mut expected: Option<Extent2d> = None;
    for target in targets {
        match expected {
            None => expected = Some(target.extent),
            Some(extent) if extent != target.extent => {
                return Err(GraphicsError::AttachmentExtentMismatch {
                    expected: extent,
                    found: target.extent,
                });
            }
            Some(_) => {}
        }
    }
    Ok(expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::dummy::ObjectKind;

    #[test]
    fn test_owned_target_destroys_texture() {
        let backend = DummyBackend::new();
        let target =
            RenderTarget::create(&backend, "depth", Extent2d::new(64, 32), Format::D32Sfloat)
                .unwrap();
        assert_eq!(target.width(), 64);
        assert_eq!(target.height(), 32);
        assert_eq!(backend.live_count(ObjectKind::Texture), 1);
        target.destroy(&backend);
        assert_eq!(backend.live_count(ObjectKind::Texture), 0);
    }

    #[test]
    fn test_swapchain_target_is_not_destroyed() {
        let backend = DummyBackend::new();
        let texture = backend
            .create_texture(&TextureDescriptor::new_2d(
                8,
                8,
                Format::Bgra8Unorm,
                TextureUsage::RENDER_ATTACHMENT,
            ))
            .unwrap();
        let target = RenderTarget::from_swapchain_image(
            "color",
            Extent2d::new(8, 8),
            Format::Bgra8Unorm,
            texture,
        );
        target.destroy(&backend);
        assert!(backend.is_alive(texture.0));
    }

    #[test]
    fn test_common_extent() {
        let a = RenderTarget::from_swapchain_image(
            "a",
            Extent2d::new(800, 600),
            Format::Bgra8Unorm,
            TextureHandle(1),
        );
        let b = RenderTarget::from_swapchain_image(
            "b",
            Extent2d::new(800, 600),
            Format::D32Sfloat,
            TextureHandle(2),
        );
        let c = RenderTarget::from_swapchain_image(
            "c",
            Extent2d::new(400, 600),
            Format::D32Sfloat,
            TextureHandle(3),
        );

        assert_eq!(
            common_extent([&a, &b]).unwrap(),
            Some(Extent2d::new(800, 600))
        );
        assert_eq!(
            common_extent([&a, &c]).unwrap_err(),
            GraphicsError::AttachmentExtentMismatch {
                expected: Extent2d::new(800, 600),
                found: Extent2d::new(400, 600),
            }
        );
        assert_eq!(common_extent(std::iter::empty()).unwrap(), None);
    }
}
