//! Common utilities for render integration tests.
//!
//! This module provides shared test infrastructure: the backend enumeration
//! used by `rstest` cases and a [`TestContext`] bundling everything a graph
//! builder needs to execute.

#![allow(dead_code)]

use std::sync::Arc;

use redlilium_render::backend::dummy::ObjectKind;
use redlilium_render::{
    CommandPoolTarget, DummyBackend, ExecutionContext, ExecutionReport, FrameResources,
    GeometryHandle, GeometryStore, GpuBackend, GraphBuilder, MeshPrimitive, NoopEventPump,
    RenderContext, RenderGraph, RendererConfig, Swapchain, Vertex, stage_mesh,
};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends the integration tests run against.
///
/// The tests assert on live object counts and recorded commands, which only
/// the dummy backend exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Dummy backend (no actual GPU operations).
    Dummy,
}

impl Backend {
    /// Check if this backend is currently available.
    pub fn is_available(&self) -> bool {
        match self {
            // Dummy backend is always available
            Backend::Dummy => true,
        }
    }

    /// Get the backend name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Dummy => "dummy",
        }
    }
}

/// Install the test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// Render context, graph, swapchain and frames, as a render system would
/// own them.
pub struct TestContext {
    /// The backend being tested.
    pub backend: Backend,
    /// Observable backend, for assertions.
    pub dummy: Arc<DummyBackend>,
    pub ctx: RenderContext,
    pub graph: RenderGraph,
    pub swapchain: Swapchain,
    pub frames: Vec<FrameResources>,
    pub geometry: GeometryStore,
    pump: NoopEventPump,
}

impl TestContext {
    /// Create a new test context for the given backend.
    ///
    /// Returns `None` if the backend is not available.
    pub fn new(backend: Backend) -> Option<Self> {
        Self::with_config(backend, RendererConfig::default())
    }

    pub fn with_config(backend: Backend, config: RendererConfig) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }

        let dummy = Arc::new(DummyBackend::with_extent(config.initial_extent));
        let ctx = RenderContext::new(dummy.clone(), config);
        let mut graph = RenderGraph::new();
        let swapchain = Swapchain::initialize(&ctx, &mut graph).ok()?;
        let frames = (0..swapchain.image_count())
            .map(|_| FrameResources::new())
            .collect();

        Some(Self {
            backend,
            dummy,
            ctx,
            graph,
            swapchain,
            frames,
            geometry: GeometryStore::new(),
            pump: NoopEventPump,
        })
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.ctx.backend()
    }

    /// A builder using the configured failure policy.
    pub fn builder(&self) -> GraphBuilder {
        GraphBuilder::new(self.ctx.config().failure_policy)
    }

    /// Execute `builder` with passes rendering into `image_index`.
    pub fn execute(&mut self, builder: GraphBuilder, image_index: Option<u32>) -> ExecutionReport {
        let mut cx = ExecutionContext {
            ctx: &self.ctx,
            graph: &mut self.graph,
            swapchain: &mut self.swapchain,
            frames: &mut self.frames,
            geometry: &mut self.geometry,
            pump: &mut self.pump,
            image_index,
        };
        builder.execute(&mut cx)
    }

    /// Allocate the fence, event, command pool and command buffer of every
    /// frame slot.
    pub fn allocate_frames(&mut self) {
        let mut builder = self.builder();
        for slot in 0..self.frames.len() {
            builder
                .allocate_surface(slot)
                .allocate_fence(slot, true)
                .allocate_command_pool(CommandPoolTarget::Frame(slot))
                .allocate_command_buffer(CommandPoolTarget::Frame(slot));
        }
        let report = self.execute(builder, None);
        assert!(report.is_success(), "{:?}", report);
    }

    /// Upload a mesh immediately and return its handle.
    pub fn upload(&mut self, primitives: &[MeshPrimitive]) -> GeometryHandle {
        let staged = stage_mesh(primitives).expect("Failed to stage mesh");
        let buffer = self
            .ctx
            .upload_indexed_geometry(&staged)
            .expect("Failed to upload mesh");
        self.geometry.insert(buffer)
    }

    pub fn live(&self, kind: ObjectKind) -> usize {
        self.dummy.live_count(kind)
    }

    /// Tear everything down.
    pub fn destroy(mut self) {
        let backend = self.ctx.backend();
        self.swapchain.destroy(backend, &mut self.graph);
        self.graph.destroy(backend);
        for frame in &mut self.frames {
            frame.destroy(backend);
        }
        self.geometry.destroy(backend);
    }
}

/// A single triangle in the XY plane.
pub fn triangle() -> MeshPrimitive {
    let normal = [0.0, 0.0, 1.0];
    MeshPrimitive::new(
        vec![
            Vertex::new([0.0, 0.5, 0.0], normal),
            Vertex::new([-0.5, -0.5, 0.0], normal),
            Vertex::new([0.5, -0.5, 0.0], normal),
        ],
        vec![0, 1, 2],
    )
}
