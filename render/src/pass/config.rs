//! Declarative render pass configuration.

use std::path::PathBuf;

use crate::backend::{DepthBiasState, TextureHandle};
use crate::geometry::GeometryHandle;
use crate::types::{
    BlendFactor, BlendOp, CompareOp, CullMode, Format, ImageLayout, LoadOp, SamplerDescriptor,
    ShaderStage, ShaderStages, StoreOp, WindingOrder,
};

/// Rasterizer and depth-test options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizationConfig {
    pub cull_mode: CullMode,
    pub winding_order: WindingOrder,
    pub depth_bias: DepthBiasState,
    pub depth_compare: CompareOp,
}

impl Default for RasterizationConfig {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            winding_order: WindingOrder::Clockwise,
            depth_bias: DepthBiasState::default(),
            depth_compare: CompareOp::Less,
        }
    }
}

/// One shader stage of the pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderConfig {
    pub stage: ShaderStage,
    /// WGSL file, relative paths resolve against the shader directory.
    pub path: PathBuf,
    pub entry_point: String,
}

/// Blend state of a color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendConfig {
    pub enable: bool,
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl BlendConfig {
    /// Standard "over" alpha blending.
    pub fn alpha_blending() -> Self {
        Self {
            enable: true,
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            enable: false,
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }
}

/// One attachment of the pass, bound to a named render target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachmentConfig {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
    pub blend: BlendConfig,
    /// Name of the render target registered in the render graph.
    pub render_target: String,
}

impl AttachmentConfig {
    /// Attachment with the given format and target, loading and storing
    /// nothing.
    pub fn new(format: Format, render_target: impl Into<String>) -> Self {
        Self {
            format,
            load_op: LoadOp::DontCare,
            store_op: StoreOp::DontCare,
            stencil_load_op: LoadOp::DontCare,
            stencil_store_op: StoreOp::DontCare,
            initial_layout: ImageLayout::Undefined,
            final_layout: ImageLayout::Undefined,
            blend: BlendConfig::default(),
            render_target: render_target.into(),
        }
    }

    pub fn with_ops(mut self, load_op: LoadOp, store_op: StoreOp) -> Self {
        self.load_op = load_op;
        self.store_op = store_op;
        self
    }

    pub fn with_stencil_ops(mut self, load_op: LoadOp, store_op: StoreOp) -> Self {
        self.stencil_load_op = load_op;
        self.stencil_store_op = store_op;
        self
    }

    pub fn with_layouts(mut self, initial: ImageLayout, final_layout: ImageLayout) -> Self {
        self.initial_layout = initial;
        self.final_layout = final_layout;
        self
    }

    pub fn with_blend(mut self, blend: BlendConfig) -> Self {
        self.blend = blend;
        self
    }

    /// Returns true if the format is a color format.
    pub fn is_color(&self) -> bool {
        self.format.is_color()
    }
}

/// Push constant block of one stage with one data blob per primitive.
///
/// Primitive `i` pushes `data[i]`, or `data[0]` when the list is shorter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantConfig {
    pub stage: ShaderStage,
    pub size: u32,
    pub data: Vec<Vec<u8>>,
}

impl PushConstantConfig {
    /// Data pushed for primitive `index`.
    pub fn data_for(&self, index: usize) -> Option<&[u8]> {
        self.data
            .get(index)
            .or_else(|| self.data.first())
            .map(Vec::as_slice)
    }
}

/// A vertex attribute read from a vertex group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeConfig {
    pub location: u32,
    pub offset: u32,
    pub format: Format,
}

/// A vertex buffer binding and the attributes it feeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexGroupConfig {
    pub binding: u32,
    pub stride: u32,
    pub attributes: Vec<VertexAttributeConfig>,
}

impl VertexGroupConfig {
    /// Interleaved position + normal, both `Rgb32Sfloat`.
    pub fn position_normal(binding: u32) -> Self {
        Self {
            binding,
            stride: 24,
            attributes: vec![
                VertexAttributeConfig {
                    location: 0,
                    offset: 0,
                    format: Format::Rgb32Sfloat,
                },
                VertexAttributeConfig {
                    location: 1,
                    offset: 12,
                    format: Format::Rgb32Sfloat,
                },
            ],
        }
    }
}

/// A texture sampled through a combined image/sampler binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerBindingConfig {
    pub binding: u32,
    pub stages: ShaderStages,
    pub texture: TextureHandle,
    pub sampler: SamplerDescriptor,
}

/// One indexed draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveDraw {
    /// Buffer holding the indices and vertices. Unresolved handles are skipped.
    pub geometry: GeometryHandle,
    /// Byte offset of the vertex stream, one per vertex group.
    pub vertex_offsets: Vec<u64>,
    /// Byte offset of the `u32` indices.
    pub index_offset: u64,
    pub index_count: u32,
}

/// Part of the configuration that identifies a pipeline.
///
/// Primitives and push constant data change every frame and are left out;
/// push constant sizes shape the pipeline layout and are kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PassSignature {
    pub name: String,
    pub rasterization: RasterizationConfig,
    pub shaders: Vec<ShaderConfig>,
    pub attachments: Vec<AttachmentConfig>,
    pub push_constants: Vec<(ShaderStage, u32)>,
    pub vertex_groups: Vec<VertexGroupConfig>,
    pub samplers: Vec<SamplerBindingConfig>,
}
