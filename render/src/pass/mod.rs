//! Declarative render passes.
//!
//! A pass is described by a [`RenderPassGenerator`]: rasterization state,
//! shaders, attachments bound to named render targets, push constant blocks,
//! vertex input groups, sampled textures and the primitives to draw.
//!
//! - [`RenderPassGenerator::generate`] turns the description into a
//!   [`PipelineStateObject`](crate::graph::PipelineStateObject) cached in the
//!   render graph under a structural [`PipelineKey`](crate::graph::PipelineKey).
//! - [`RenderPassExecutor::execute`] records the pass: it builds the
//!   framebuffer on first use, begins the render pass, and issues one indexed
//!   draw per primitive.
//! - [`GpuStructWriter`] packs push constant data with shader-side padding.

mod config;
mod executor;
mod generator;
mod writer;

pub use config::{
    AttachmentConfig, BlendConfig, PassSignature, PrimitiveDraw, PushConstantConfig,
    RasterizationConfig, SamplerBindingConfig, ShaderConfig, VertexAttributeConfig,
    VertexGroupConfig,
};
pub use executor::{PassStats, PassTarget, RenderPassExecutor};
pub use generator::{DEFAULT_FRAGMENT_ENTRY, DEFAULT_VERTEX_ENTRY, RenderPassGenerator};
pub use writer::GpuStructWriter;
