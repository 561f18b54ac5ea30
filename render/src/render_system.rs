//! The per-frame driver.
//!
//! [`RenderSystem`] owns the render context, the swapchain, the render graph,
//! one [`FrameResources`] per swapchain image and the geometry store. Every
//! call to [`RenderSystem::process`] renders one frame:
//!
//! 1. wait on the frame's in-flight fence
//! 2. acquire the next presentable image; if the swapchain had to be rebuilt
//!    the frame is skipped
//! 3. build and execute a [`GraphBuilder`]: reset the fence and command
//!    pool, record queued uploads and the built-in passes, submit, present
//! 4. advance the frame index
//!
//! A frame whose submission did not happen gets a fresh signaled fence and
//! the swapchain is rebuilt on the next acquisition.
//!
//! Resizes are recorded by [`RenderSystem::handle_resize`] and applied at the
//! start of the next `process`.

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::command::SubmitCommandParams;
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::error::GraphicsError;
use crate::frame::FrameResources;
use crate::geometry::{GeometryHandle, GeometryStore, PrimitiveRange, StagedGeometry, stage_mesh};
use crate::graph::RenderGraph;
use crate::graph_builder::{
    CommandPoolTarget, ExecutionContext, ExecutionReport, FailurePolicy, GraphBuilder,
};
use crate::passes::{FloorGridPassDesc, OpaquePassDesc, PassBuildContext, PassDescription};
use crate::profiling::{frame_mark, profile_scope};
use crate::scene::{MeshPrimitive, SceneView};
use crate::swapchain::{AcquireOutcome, SurfaceEventPump, Swapchain};
use crate::types::{Extent2d, PipelineStages};

/// Everything [`RenderSystem::initialize`] needs.
pub struct InitializationParams {
    pub config: RendererConfig,
    pub backend: Arc<dyn GpuBackend>,
    /// Pumps window events while the window is minimized.
    pub surface_pump: Box<dyn SurfaceEventPump>,
}

/// Drives the frame loop.
pub struct RenderSystem {
    ctx: RenderContext,
    swapchain: Swapchain,
    graph: RenderGraph,
    frames: Vec<FrameResources>,
    geometry: GeometryStore,
    pump: Box<dyn SurfaceEventPump>,
    pending_uploads: Vec<(GeometryHandle, StagedGeometry)>,
    frame_index: usize,
    needs_recreation: bool,
    surface_invalid: bool,
    last_report: ExecutionReport,
    shut_down: bool,
}

impl RenderSystem {
    /// Create the swapchain and per-frame resources.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any GPU object
    /// cannot be created. Nothing created so far is leaked.
    pub fn initialize(params: InitializationParams) -> Result<Self, GraphicsError> {
        profile_scope!("RenderSystem::initialize");

        params.config.validate()?;
        let ctx = RenderContext::new(params.backend, params.config);
        let mut graph = RenderGraph::new();
        let swapchain = Swapchain::initialize(&ctx, &mut graph)?;
        let frames = (0..swapchain.image_count())
            .map(|_| FrameResources::new())
            .collect();

        let mut system = Self {
            ctx,
            swapchain,
            graph,
            frames,
            geometry: GeometryStore::new(),
            pump: params.surface_pump,
            pending_uploads: Vec::new(),
            frame_index: 0,
            needs_recreation: false,
            surface_invalid: false,
            last_report: ExecutionReport::default(),
            shut_down: false,
        };

        let mut builder = GraphBuilder::new(FailurePolicy::AbortOnFailure);
        for slot in 0..system.frames.len() {
            let pool = CommandPoolTarget::Frame(slot);
            builder
                .allocate_surface(slot)
                .allocate_fence(slot, true)
                .allocate_command_pool(pool.clone())
                .allocate_command_buffer(pool);
        }
        let report = system.run(builder, None);
        if let Some(failure) = report.failures().next() {
            let message = format!("{} failed: {:?}", failure.label, failure.result);
            system.shutdown();
            return Err(GraphicsError::InitializationFailed(message));
        }

        log::info!(
            "Render system initialized: backend {}, {} frames in flight",
            system.ctx.backend().name(),
            system.frames.len()
        );
        Ok(system)
    }

    fn run(&mut self, builder: GraphBuilder, image_index: Option<u32>) -> ExecutionReport {
        let mut cx = ExecutionContext {
            ctx: &self.ctx,
            graph: &mut self.graph,
            swapchain: &mut self.swapchain,
            frames: &mut self.frames,
            geometry: &mut self.geometry,
            pump: self.pump.as_mut(),
            image_index,
        };
        builder.execute(&mut cx)
    }

    /// Render one frame of `scene`.
    ///
    /// Returns `Ok(false)` when the frame was skipped because the swapchain
    /// was rebuilt; the frame index does not advance then.
    pub fn process(&mut self, scene: &SceneView) -> Result<bool, GraphicsError> {
        profile_scope!("RenderSystem::process");

        if std::mem::take(&mut self.needs_recreation) {
            self.swapchain.mark_dirty();
        }

        let slot = self.frame_index;
        self.frames[slot].wait(self.ctx.backend())?;

        let outcome = self.swapchain.request_new_presentable_image(
            &self.ctx,
            &mut self.graph,
            slot,
            self.pump.as_mut(),
        )?;
        let image_index = match outcome {
            AcquireOutcome::Ready(index) => index,
            AcquireOutcome::Recreated => {
                self.surface_invalid = false;
                return Ok(false);
            }
        };
        self.frames[slot].surface.image_index = Some(image_index);

        let fence = self.frames[slot].in_flight.handle();
        let builder = self.build_frame(scene, slot, image_index)?;
        let report = self.run(builder, Some(image_index));

        if !report.signals_fence(fence) {
            self.recover_unsubmitted_frame(slot)?;
        }
        self.last_report = report;

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        frame_mark!();
        Ok(true)
    }

    /// Nothing will signal the frame's fence, its acquire semaphore was
    /// never waited on and its image may still be acquired. Re-arm the fence
    /// and have the next acquisition rebuild the swapchain.
    fn recover_unsubmitted_frame(&mut self, slot: usize) -> Result<(), GraphicsError> {
        log::warn!("Frame {} was not submitted, re-arming its fence", slot);
        self.ctx.backend().wait_idle()?;
        let frame = &mut self.frames[slot];
        frame.in_flight.destroy();
        frame.in_flight.allocate(self.ctx.backend_arc(), true)?;
        frame.surface.image_index = None;
        self.swapchain.mark_dirty();
        Ok(())
    }

    fn build_frame(
        &mut self,
        scene: &SceneView,
        slot: usize,
        image_index: u32,
    ) -> Result<GraphBuilder, GraphicsError> {
        let config = self.ctx.config();
        let pool = CommandPoolTarget::Frame(slot);
        let frame = &self.frames[slot];
        let submit = SubmitCommandParams {
            wait: Some(self.swapchain.acquire_semaphore(slot)?),
            wait_stage: PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            signal: Some(frame.render_finished.handle()),
            fence: Some(frame.in_flight.handle()),
        };

        let mut builder = GraphBuilder::new(config.failure_policy);
        builder
            .reset_fence(slot)
            .reset_command_pool(pool.clone())
            .allocate_command_buffer(pool.clone())
            .enable_command_buffer_recording(pool.clone());

        for (geometry, data) in self.pending_uploads.drain(..) {
            builder.upload_geometry(data, geometry, pool.clone(), slot);
        }

        let pass_ctx = PassBuildContext {
            scene,
            image_index,
            color_format: self.swapchain.format(),
            depth_format: self.swapchain.depth_format(),
            extent: self.swapchain.extent(),
        };
        if config.enable_floor_grid {
            queue_pass(&mut builder, &OpaquePassDesc::default(), &pass_ctx, &pool);
            queue_pass(&mut builder, &FloorGridPassDesc::default(), &pass_ctx, &pool);
        } else {
            queue_pass(&mut builder, &OpaquePassDesc::presenting(), &pass_ctx, &pool);
        }

        builder
            .disable_command_buffer_recording(pool.clone())
            .submit_commands(pool, submit)
            .present(slot);
        Ok(builder)
    }

    /// Record a new surface size. The swapchain is rebuilt at the start of
    /// the next [`Self::process`].
    pub fn handle_resize(&mut self, width: u32, height: u32) {
        let extent = Extent2d::new(width, height);
        self.ctx.backend().resize_surface(extent);
        self.needs_recreation = true;
        if extent.is_zero_sized() {
            log::debug!("Surface minimized");
            self.surface_invalid = true;
        }
    }

    /// Stage a mesh for upload with the next frame.
    ///
    /// The returned handle resolves once that frame's buffer actions ran;
    /// meshes referencing it are skipped until then.
    pub fn queue_mesh_upload(
        &mut self,
        primitives: &[MeshPrimitive],
    ) -> Result<(GeometryHandle, Vec<PrimitiveRange>), GraphicsError> {
        let staged = stage_mesh(primitives)?;
        let ranges = staged.ranges.clone();
        let handle = self.geometry.reserve();
        self.pending_uploads.push((handle, staged));
        Ok((handle, ranges))
    }

    /// Upload a mesh right away, blocking until the copy finished.
    pub fn upload_mesh(
        &mut self,
        primitives: &[MeshPrimitive],
    ) -> Result<(GeometryHandle, Vec<PrimitiveRange>), GraphicsError> {
        let staged = stage_mesh(primitives)?;
        let buffer = self.ctx.upload_indexed_geometry(&staged)?;
        Ok((self.geometry.insert(buffer), staged.ranges))
    }

    /// Wait for the GPU and destroy every GPU object. Called on drop.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let backend = self.ctx.backend();
        if let Err(e) = backend.wait_idle() {
            log::warn!("wait_idle failed during shutdown: {}", e);
        }
        self.pending_uploads.clear();
        self.swapchain.destroy(backend, &mut self.graph);
        self.graph.destroy(backend);
        for frame in &mut self.frames {
            frame.destroy(backend);
        }
        self.geometry.destroy(backend);
        log::info!("Render system shut down");
    }

    /// Frame slot the next [`Self::process`] uses.
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    pub fn image_count(&self) -> u32 {
        self.swapchain.image_count()
    }

    pub fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    pub fn render_graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn context(&self) -> &RenderContext {
        &self.ctx
    }

    pub fn geometry(&self) -> &GeometryStore {
        &self.geometry
    }

    pub fn frames(&self) -> &[FrameResources] {
        &self.frames
    }

    /// A resize to a zero extent was seen and the swapchain not yet rebuilt.
    pub fn is_surface_invalid(&self) -> bool {
        self.surface_invalid
    }

    /// Per-action outcomes of the last processed frame.
    pub fn last_report(&self) -> &ExecutionReport {
        &self.last_report
    }
}

impl Drop for RenderSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn queue_pass<D: PassDescription>(
    builder: &mut GraphBuilder,
    desc: &D,
    ctx: &PassBuildContext<'_>,
    pool: &CommandPoolTarget,
) {
    if let Err(e) = builder.make_pass(desc, ctx, pool.clone()) {
        log::warn!("Skipping pass '{}': {}", desc.name(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::swapchain::NoopEventPump;

    fn system() -> RenderSystem {
        RenderSystem::initialize(InitializationParams {
            config: RendererConfig::default(),
            backend: Arc::new(DummyBackend::new()),
            surface_pump: Box::new(NoopEventPump),
        })
        .unwrap()
    }

    #[test]
    fn test_frame_index_alternates() {
        let mut system = system();
        let scene = SceneView::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(system.frame_index());
            assert!(system.process(&scene).unwrap());
        }
        assert_eq!(seen, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_resize_skips_one_frame() {
        let mut system = system();
        let scene = SceneView::default();
        system.process(&scene).unwrap();

        system.handle_resize(800, 600);
        assert!(!system.process(&scene).unwrap());
        assert_eq!(system.frame_index(), 1);
        assert_eq!(system.swapchain().extent(), Extent2d::new(800, 600));
        assert!(system.process(&scene).unwrap());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = RendererConfig::default();
        config.swapchain_image_count = 3;
        let result = RenderSystem::initialize(InitializationParams {
            config,
            backend: Arc::new(DummyBackend::new()),
            surface_pump: Box::new(NoopEventPump),
        });
        assert!(result.is_err());
    }
}
