//! Swapchain and per-image render targets.
//!
//! The [`Swapchain`] owns the presentable images, registers one color and
//! one depth render target per image in the render graph, and keeps one
//! acquire semaphore per frame slot.
//!
//! # Recreation
//!
//! The swapchain is either [`Clean`](SwapchainState::Clean) or
//! [`Dirty`](SwapchainState::Dirty). [`Swapchain::mark_dirty`] is the only
//! way to dirty it from outside; the flag is consulted at the next
//! acquisition. An out-of-date acquisition, or a dirty swapchain, triggers
//! recreation:
//!
//! 1. pump window events until the surface has a non-zero extent
//! 2. wait for the device to go idle
//! 3. drop the graph's pass resources and render targets, advance its
//!    generation so stale PSOs are destroyed
//! 4. recreate the swapchain, its render targets and semaphores
//!
//! The caller then skips the frame ([`AcquireOutcome::Recreated`]).

use crate::backend::{
    AcquireResult, GpuBackend, PresentResult, SemaphoreHandle, SwapchainDescriptor,
    SwapchainHandle, TextureHandle,
};
use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::graph::RenderGraph;
use crate::render_target::RenderTarget;
use crate::types::{Extent2d, Format};

/// Name of the color render target of swapchain image `index`.
pub fn color_target_name(index: u32) -> String {
    format!("$.scene_color_{index}")
}

/// Name of the depth render target of swapchain image `index`.
pub fn depth_target_name(index: u32) -> String {
    format!("$.scene_depth_{index}")
}

/// Whether the swapchain still matches the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SwapchainState {
    #[default]
    Clean,
    /// Must be recreated before the next acquisition.
    Dirty,
}

/// Result of requesting a presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Image `index` is acquired and can be rendered to.
    Ready(u32),
    /// The swapchain was rebuilt; skip this frame.
    Recreated,
}

/// Pumps window events while the render system waits for the window to
/// become visible again.
pub trait SurfaceEventPump {
    fn pump_events(&mut self);
}

/// Event pump for surfaces without an event loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPump;

impl SurfaceEventPump for NoopEventPump {
    fn pump_events(&mut self) {
        std::thread::yield_now();
    }
}

/// Presentable images of the window surface.
#[derive(Debug)]
pub struct Swapchain {
    handle: SwapchainHandle,
    descriptor: SwapchainDescriptor,
    depth_format: Format,
    images: Vec<TextureHandle>,
    acquire_semaphores: Vec<SemaphoreHandle>,
    state: SwapchainState,
    current_image: Option<u32>,
}

impl Swapchain {
    /// Create the swapchain, its render targets and semaphores.
    pub fn initialize(ctx: &RenderContext, graph: &mut RenderGraph) -> Result<Self, GraphicsError> {
        let config = ctx.config();
        let mut extent = ctx.surface_extent()?;
        if extent.is_zero_sized() {
            extent = config.initial_extent;
        }

        let mut swapchain = Self {
            handle: SwapchainHandle::NULL,
            descriptor: SwapchainDescriptor {
                extent,
                image_count: config.swapchain_image_count,
                format: config.color_format,
                present_mode: config.present_mode,
            },
            depth_format: config.depth_format,
            images: Vec::new(),
            acquire_semaphores: Vec::new(),
            state: SwapchainState::Clean,
            current_image: None,
        };
        if let Err(e) = swapchain.create_resources(ctx.backend(), graph, None) {
            swapchain.destroy(ctx.backend(), graph);
            return Err(GraphicsError::InitializationFailed(format!(
                "swapchain creation failed: {e}"
            )));
        }
        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            swapchain.image_count(),
            swapchain.descriptor.format
        );
        Ok(swapchain)
    }

    fn create_resources(
        &mut self,
        backend: &dyn GpuBackend,
        graph: &mut RenderGraph,
        old: Option<SwapchainHandle>,
    ) -> Result<(), GraphicsError> {
        let handle = backend.create_swapchain(&self.descriptor, old)?;
        if let Some(old) = old {
            backend.destroy_swapchain(old);
        }
        self.handle = handle;

        self.images = backend.swapchain_images(handle)?;
        if self.images.len() != self.descriptor.image_count as usize {
            return Err(GraphicsError::ResourceCreationFailed(format!(
                "swapchain returned {} images, expected {}",
                self.images.len(),
                self.descriptor.image_count
            )));
        }

        let extent = self.descriptor.extent;
        for (index, image) in self.images.iter().enumerate() {
            let index = index as u32;
            graph.register_render_target(
                backend,
                RenderTarget::from_swapchain_image(
                    color_target_name(index),
                    extent,
                    self.descriptor.format,
                    *image,
                ),
            );
            graph.register_render_target(
                backend,
                RenderTarget::create(backend, depth_target_name(index), extent, self.depth_format)?,
            );
        }

        for _ in 0..self.images.len() {
            self.acquire_semaphores.push(backend.create_semaphore()?);
        }
        Ok(())
    }

    /// Acquire the next presentable image for frame slot `frame`.
    ///
    /// Recreates the swapchain first if it is dirty, or when the acquisition
    /// reports it out of date.
    pub fn request_new_presentable_image(
        &mut self,
        ctx: &RenderContext,
        graph: &mut RenderGraph,
        frame: usize,
        pump: &mut dyn SurfaceEventPump,
    ) -> Result<AcquireOutcome, GraphicsError> {
        if self.state == SwapchainState::Dirty {
            self.recreate(ctx, graph, pump)?;
            return Ok(AcquireOutcome::Recreated);
        }

        let semaphore = self.acquire_semaphore(frame)?;
        let result = match ctx.backend().acquire_next_image(self.handle, semaphore) {
            Err(GraphicsError::SurfaceOutdated) => Ok(AcquireResult::OutOfDate),
            other => other,
        }?;

        match result {
            AcquireResult::Acquired { index, suboptimal } => {
                if suboptimal {
                    log::debug!("Swapchain is suboptimal, recreating after this frame");
                    self.mark_dirty();
                }
                self.current_image = Some(index);
                Ok(AcquireOutcome::Ready(index))
            }
            AcquireResult::OutOfDate => {
                log::warn!("Swapchain out of date, recreating");
                self.recreate(ctx, graph, pump)?;
                Ok(AcquireOutcome::Recreated)
            }
        }
    }

    /// Rebuild the swapchain for the current surface extent.
    pub fn recreate(
        &mut self,
        ctx: &RenderContext,
        graph: &mut RenderGraph,
        pump: &mut dyn SurfaceEventPump,
    ) -> Result<(), GraphicsError> {
        let backend = ctx.backend();

        let mut extent = backend.surface_extent()?;
        while extent.is_zero_sized() {
            pump.pump_events();
            extent = backend.surface_extent()?;
        }

        backend.wait_idle()?;

        graph.release_pass_resources(backend);
        graph.release_render_targets(backend);
        graph.advance_generation(backend);
        self.destroy_semaphores(backend);

        self.descriptor.extent = extent;
        self.current_image = None;
        let old = std::mem::take(&mut self.handle);
        self.create_resources(backend, graph, Some(old).filter(|h| !h.is_null()))?;
        self.state = SwapchainState::Clean;

        log::info!(
            "Recreated swapchain: {}x{} (generation {})",
            extent.width,
            extent.height,
            graph.generation()
        );
        Ok(())
    }

    /// Present `image_index` once `wait` is signaled.
    ///
    /// An out-of-date or suboptimal result marks the swapchain dirty.
    pub fn present(
        &mut self,
        backend: &dyn GpuBackend,
        image_index: u32,
        wait: SemaphoreHandle,
    ) -> Result<PresentResult, GraphicsError> {
        let result = match backend.present(self.handle, image_index, wait) {
            Err(GraphicsError::SurfaceOutdated) => Ok(PresentResult::OutOfDate),
            other => other,
        }?;
        if result != PresentResult::Presented {
            log::debug!("Present returned {:?}, marking swapchain dirty", result);
            self.mark_dirty();
        }
        self.current_image = None;
        Ok(result)
    }

    /// Request recreation at the next acquisition.
    pub fn mark_dirty(&mut self) {
        self.state = SwapchainState::Dirty;
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        self.state == SwapchainState::Dirty
    }

    pub fn handle(&self) -> SwapchainHandle {
        self.handle
    }

    pub fn extent(&self) -> Extent2d {
        self.descriptor.extent
    }

    pub fn format(&self) -> Format {
        self.descriptor.format
    }

    pub fn depth_format(&self) -> Format {
        self.depth_format
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> u32 {
        self.descriptor.image_count
    }

    /// Views of the presentable images.
    pub fn images(&self) -> &[TextureHandle] {
        &self.images
    }

    /// Image acquired and not yet presented.
    pub fn current_image(&self) -> Option<u32> {
        self.current_image
    }

    /// Semaphore signaled when the image acquired for `frame` is ready.
    pub fn acquire_semaphore(&self, frame: usize) -> Result<SemaphoreHandle, GraphicsError> {
        self.acquire_semaphores.get(frame).copied().ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("no acquire semaphore for frame {frame}"))
        })
    }

    fn destroy_semaphores(&mut self, backend: &dyn GpuBackend) {
        for semaphore in self.acquire_semaphores.drain(..) {
            backend.destroy_semaphore(semaphore);
        }
    }

    /// Destroy the swapchain, its semaphores and its render targets.
    pub fn destroy(&mut self, backend: &dyn GpuBackend, graph: &mut RenderGraph) {
        self.destroy_semaphores(backend);
        graph.release_render_targets(backend);
        backend.destroy_swapchain(std::mem::take(&mut self.handle));
        self.images.clear();
        self.current_image = None;
    }
}
