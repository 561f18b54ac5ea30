//! GPU backend abstraction layer.
//!
//! The render system never talks to a graphics API directly. Everything goes
//! through the [`GpuBackend`] trait, which exposes explicit-API concepts
//! (render passes, pipelines, command buffers, fences, semaphores) over small
//! copyable handles.
//!
//! # Available Backends
//!
//! - `dummy` (always available): records commands and tracks objects without
//!   touching a GPU. Used by the tests and benches.
//! - `vulkan-backend`: native Vulkan backend using ash
//!
//! # Handles
//!
//! Every GPU object is referred to by a `u64` newtype. `0` is the null handle
//! for every type; backends never hand it out.

pub mod descriptors;
pub mod dummy;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::config::RendererConfig;
use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, Extent2d, SamplerDescriptor, ScissorRect, ShaderStage, ShaderStages,
    TextureDescriptor, Viewport,
};

pub use descriptors::*;
pub use dummy::{DummyBackend, RecordedCommand};

macro_rules! define_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
            pub struct $name(pub u64);

            impl $name {
                /// The null handle.
                pub const NULL: Self = Self(0);

                /// Returns true if this is the null handle.
                pub fn is_null(self) -> bool {
                    self.0 == 0
                }

                /// Raw backend value.
                pub fn raw(self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

define_handle!(
    /// Presentable image chain bound to the window surface.
    SwapchainHandle,
    /// 2D image together with its default view.
    TextureHandle,
    /// GPU buffer.
    BufferHandle,
    /// Texture sampler.
    SamplerHandle,
    /// Compiled shader module.
    ShaderModuleHandle,
    /// Render pass object.
    RenderPassHandle,
    /// Pipeline layout (descriptor set layouts and push constant ranges).
    PipelineLayoutHandle,
    /// Graphics pipeline.
    PipelineHandle,
    /// Framebuffer binding attachment views to a render pass.
    FramebufferHandle,
    /// Descriptor set layout.
    DescriptorSetLayoutHandle,
    /// Descriptor pool.
    DescriptorPoolHandle,
    /// Descriptor set.
    DescriptorSetHandle,
    /// Command pool.
    CommandPoolHandle,
    /// Primary command buffer.
    CommandBufferHandle,
    /// CPU-GPU synchronization primitive.
    FenceHandle,
    /// GPU-GPU synchronization primitive.
    SemaphoreHandle,
);

/// Anything a native surface can be created for.
pub trait WindowTarget: HasWindowHandle + HasDisplayHandle {}

impl<T: HasWindowHandle + HasDisplayHandle + ?Sized> WindowTarget for T {}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods take `&self`; implementations use interior mutability for
/// their object tables. Destroy methods ignore null handles.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    // --- Surface / swapchain ---------------------------------------------

    /// Current extent of the presentation surface. Zero while minimized.
    fn surface_extent(&self) -> Result<Extent2d, GraphicsError>;

    /// Hint the backend about a new window size.
    fn resize_surface(&self, _extent: Extent2d) {}

    /// Create a swapchain, optionally replacing `old`.
    ///
    /// The old swapchain stays alive and must be destroyed by the caller.
    fn create_swapchain(
        &self,
        descriptor: &SwapchainDescriptor,
        old: Option<SwapchainHandle>,
    ) -> Result<SwapchainHandle, GraphicsError>;

    /// Views of the presentable images, owned by the swapchain.
    fn swapchain_images(&self, swapchain: SwapchainHandle)
    -> Result<Vec<TextureHandle>, GraphicsError>;

    /// Acquire the next presentable image, signaling `signal` when it is ready.
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
    ) -> Result<AcquireResult, GraphicsError>;

    /// Queue `image_index` for presentation once `wait` is signaled.
    fn present(
        &self,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentResult, GraphicsError>;

    /// Destroy a swapchain and the views of its images.
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Block until the device has finished all submitted work.
    fn wait_idle(&self) -> Result<(), GraphicsError>;

    // --- Resources -------------------------------------------------------

    /// Create a texture and its default view.
    fn create_texture(&self, descriptor: &TextureDescriptor)
    -> Result<TextureHandle, GraphicsError>;

    fn destroy_texture(&self, texture: TextureHandle);

    /// Create a buffer resource.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError>;

    /// Write data into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create a sampler resource.
    fn create_sampler(&self, descriptor: &SamplerDescriptor)
    -> Result<SamplerHandle, GraphicsError>;

    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Create a shader module from SPIR-V words.
    fn create_shader_module(
        &self,
        spirv: &[u32],
        stage: ShaderStage,
    ) -> Result<ShaderModuleHandle, GraphicsError>;

    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    // --- Pipeline objects ------------------------------------------------

    fn create_render_pass(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> Result<RenderPassHandle, GraphicsError>;

    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutHandle, GraphicsError>;

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    fn create_graphics_pipeline(
        &self,
        descriptor: &GraphicsPipelineDescriptor,
    ) -> Result<PipelineHandle, GraphicsError>;

    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    fn create_framebuffer(
        &self,
        descriptor: &FramebufferDescriptor,
    ) -> Result<FramebufferHandle, GraphicsError>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorSetLayoutBinding],
    ) -> Result<DescriptorSetLayoutHandle, GraphicsError>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    fn create_descriptor_pool(
        &self,
        descriptor: &DescriptorPoolDescriptor,
    ) -> Result<DescriptorPoolHandle, GraphicsError>;

    /// Return every set allocated from `pool` to it.
    fn reset_descriptor_pool(&self, pool: DescriptorPoolHandle) -> Result<(), GraphicsError>;

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    fn allocate_descriptor_set(
        &self,
        pool: DescriptorPoolHandle,
        layout: DescriptorSetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError>;

    fn write_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorImageWrite],
    ) -> Result<(), GraphicsError>;

    // --- Commands --------------------------------------------------------

    fn create_command_pool(&self) -> Result<CommandPoolHandle, GraphicsError>;

    /// Reset a pool, returning all of its command buffers to the initial state.
    fn reset_command_pool(&self, pool: CommandPoolHandle) -> Result<(), GraphicsError>;

    fn destroy_command_pool(&self, pool: CommandPoolHandle);

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
    ) -> Result<CommandBufferHandle, GraphicsError>;

    fn free_command_buffer(&self, pool: CommandPoolHandle, command_buffer: CommandBufferHandle);

    /// Start recording. `one_time` marks a buffer submitted exactly once.
    fn begin_command_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        one_time: bool,
    ) -> Result<(), GraphicsError>;

    fn end_command_buffer(&self, command_buffer: CommandBufferHandle) -> Result<(), GraphicsError>;

    fn cmd_begin_render_pass(&self, command_buffer: CommandBufferHandle, info: &RenderPassBeginInfo);

    fn cmd_end_render_pass(&self, command_buffer: CommandBufferHandle);

    fn cmd_bind_pipeline(&self, command_buffer: CommandBufferHandle, pipeline: PipelineHandle);

    fn cmd_set_viewport(&self, command_buffer: CommandBufferHandle, viewport: &Viewport);

    fn cmd_set_scissor(&self, command_buffer: CommandBufferHandle, scissor: &ScissorRect);

    fn cmd_push_constants(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );

    fn cmd_bind_vertex_buffers(
        &self,
        command_buffer: CommandBufferHandle,
        first_binding: u32,
        buffers: &[(BufferHandle, u64)],
    );

    /// Bind a buffer of `u32` indices.
    fn cmd_bind_index_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        buffer: BufferHandle,
        offset: u64,
    );

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        set: DescriptorSetHandle,
    );

    fn cmd_draw_indexed(
        &self,
        command_buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    fn cmd_copy_buffer(
        &self,
        command_buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopyRegion],
    );

    fn cmd_buffer_barrier(&self, command_buffer: CommandBufferHandle, barrier: &BufferBarrier);

    /// Submit command buffers to the graphics queue.
    fn submit(&self, info: &SubmitInfo) -> Result<(), GraphicsError>;

    // --- Synchronization -------------------------------------------------

    /// Create a fence for CPU-GPU synchronization.
    fn create_fence(&self, signaled: bool) -> Result<FenceHandle, GraphicsError>;

    /// Wait for a fence to be signaled.
    fn wait_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError>;

    fn reset_fence(&self, fence: FenceHandle) -> Result<(), GraphicsError>;

    /// Check if a fence is signaled (non-blocking).
    fn is_fence_signaled(&self, fence: FenceHandle) -> Result<bool, GraphicsError>;

    fn destroy_fence(&self, fence: FenceHandle);

    fn create_semaphore(&self) -> Result<SemaphoreHandle, GraphicsError>;

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);
}

/// Selects and creates the appropriate backend based on available features.
///
/// With the `vulkan-backend` feature and a window, a Vulkan backend is tried
/// first. Any failure falls back to the dummy backend.
pub fn create_backend(
    config: &RendererConfig,
    window: Option<&dyn WindowTarget>,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    #[cfg(feature = "vulkan-backend")]
    {
        if let Some(window) = window {
            match vulkan::VulkanBackend::new(window, config) {
                Ok(backend) => {
                    log::info!("Using Vulkan backend (ash)");
                    return Ok(Arc::new(backend));
                }
                Err(e) => {
                    log::warn!("Failed to create Vulkan backend: {}", e);
                }
            }
        }
    }
    #[cfg(not(feature = "vulkan-backend"))]
    let _ = window;

    log::info!("Using dummy backend");
    Ok(Arc::new(DummyBackend::with_extent(config.initial_extent)))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles() {
        assert!(FenceHandle::NULL.is_null());
        assert!(FenceHandle::default().is_null());
        assert!(!BufferHandle(7).is_null());
        assert_eq!(BufferHandle(7).raw(), 7);
    }

    #[test]
    fn test_create_backend_without_window_falls_back() {
        let backend = create_backend(&RendererConfig::default(), None).unwrap();
        assert_eq!(backend.name(), "Dummy");
    }
}
