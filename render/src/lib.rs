//! # RedLilium Render
//!
//! Per-frame GPU work orchestration for RedLilium.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`RenderSystem`] - The frame loop: fence wait, acquire, record, submit, present
//! - [`Swapchain`] - Presentable images, per-image render targets, recreation
//! - [`RenderGraph`] - Cache of pipeline state, framebuffers, command pools and
//!   render targets, scoped to the swapchain's lifetime
//! - [`GraphBuilder`] - One-shot ordered list of GPU actions
//! - [`RenderPassGenerator`] / [`RenderPassExecutor`] - Declarative pass
//!   description to cached pipeline to recorded draws
//! - [`GpuBackend`] - API-neutral backend trait, with Vulkan and Dummy (for
//!   testing) implementations
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_render::{InitializationParams, NoopEventPump, RenderSystem, RendererConfig};
//!
//! let config = RendererConfig::load("render.toml")?;
//! let backend = redlilium_render::backend::create_backend(&config, Some(&window))?;
//! let mut system = RenderSystem::initialize(InitializationParams {
//!     config,
//!     backend,
//!     surface_pump: Box::new(NoopEventPump),
//! })?;
//!
//! let (mesh, primitives) = system.queue_mesh_upload(&[MeshPrimitive::quad(10.0)])?;
//! scene.meshes.push(MeshNode::new(mesh, primitives));
//! loop {
//!     system.process(&scene)?;
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod frame;
pub mod geometry;
pub mod graph;
pub mod graph_builder;
pub mod pass;
pub mod passes;
pub mod profiling;
pub mod render_system;
pub mod render_target;
pub mod scene;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{DummyBackend, GpuBackend, create_backend};
pub use command::{CommandBuffer, CommandPool, SubmitCommandParams};
pub use config::RendererConfig;
pub use context::RenderContext;
pub use error::GraphicsError;
pub use frame::FrameResources;
pub use geometry::{GeometryHandle, GeometryStore, PrimitiveRange, StagedGeometry, stage_mesh};
pub use graph::{PipelineKey, PipelineStateObject, PsoHandle, RenderGraph};
pub use graph_builder::{
    CommandPoolTarget, ExecutionContext, ExecutionReport, FailurePolicy, GraphAction,
    GraphBuilder,
};
pub use pass::{GpuStructWriter, RenderPassExecutor, RenderPassGenerator};
pub use passes::{FloorGridPassDesc, OpaquePassDesc, PassBuildContext, PassDescription};
pub use render_system::{InitializationParams, RenderSystem};
pub use render_target::RenderTarget;
pub use scene::{Camera, DirectionalLight, MeshNode, MeshPasses, MeshPrimitive, SceneView, Vertex};
pub use swapchain::{AcquireOutcome, NoopEventPump, SurfaceEventPump, Swapchain, SwapchainState};
pub use sync::{Event, Fence, FenceStatus};
pub use types::{Extent2d, Format};

/// Render library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
