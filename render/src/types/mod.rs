//! Common types and descriptors for GPU objects.
//!
//! This module contains format enums, usage flags, fixed-function state enums
//! and descriptor structs used throughout the render system.

mod buffer;
mod common;
mod format;
mod pipeline;
mod sampler;
mod texture;

pub use buffer::{BufferDescriptor, BufferUsage, MemoryLocation};
pub use common::{ClearValue, Extent2d, ScissorRect, Viewport};
pub use format::{Format, ImageLayout};
pub use pipeline::{
    AccessFlags, BlendFactor, BlendOp, ColorWriteMask, CompareOp, CullMode, LoadOp,
    PipelineStages, PolygonMode, PrimitiveTopology, ShaderStage, ShaderStages, StoreOp,
    VertexInputRate, WindingOrder,
};
pub use sampler::{AddressMode, FilterMode, SamplerDescriptor};
pub use texture::{TextureDescriptor, TextureUsage};
