//! API-neutral descriptions of GPU objects passed to a [`GpuBackend`](super::GpuBackend).

use crate::types::{
    AccessFlags, BlendFactor, BlendOp, ClearValue, ColorWriteMask, CompareOp, CullMode, Extent2d,
    Format, ImageLayout, LoadOp, PipelineStages, PolygonMode, PrimitiveTopology, ShaderStage,
    ShaderStages, StoreOp, VertexInputRate, WindingOrder,
};

use super::{
    BufferHandle, CommandBufferHandle, DescriptorSetLayoutHandle, FenceHandle, PipelineLayoutHandle,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, ShaderModuleHandle, TextureHandle,
};

// ============================================================================
// Swapchain
// ============================================================================

/// Presentation mode preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentMode {
    /// Vertical sync, always supported.
    #[default]
    Fifo,
    /// Triple-buffered low latency, falls back to FIFO when unsupported.
    Mailbox,
    /// No vertical sync, falls back to FIFO when unsupported.
    Immediate,
}

/// Descriptor for creating a swapchain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapchainDescriptor {
    /// Surface extent the images are created with.
    pub extent: Extent2d,
    /// Number of presentable images.
    pub image_count: u32,
    /// Color format of the presentable images.
    pub format: Format,
    /// Preferred present mode.
    pub present_mode: PresentMode,
}

/// Result of acquiring a presentable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireResult {
    /// An image was acquired.
    Acquired {
        /// Index of the acquired image.
        index: u32,
        /// The swapchain still works but no longer matches the surface.
        suboptimal: bool,
    },
    /// The swapchain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Result of presenting an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentResult {
    /// The image was queued for presentation.
    Presented,
    /// Presented, but the swapchain no longer matches the surface.
    Suboptimal,
    /// The swapchain must be recreated.
    OutOfDate,
}

// ============================================================================
// Render pass
// ============================================================================

/// Description of one render pass attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentDescription {
    pub format: Format,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
    pub stencil_load_op: LoadOp,
    pub stencil_store_op: StoreOp,
    pub initial_layout: ImageLayout,
    pub final_layout: ImageLayout,
}

/// Reference from the subpass to an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentReference {
    /// Index into [`RenderPassDescriptor::attachments`].
    pub attachment: u32,
    /// Layout the attachment is in during the subpass.
    pub layout: ImageLayout,
}

/// Dependency from outside the render pass into its single subpass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubpassDependency {
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// Descriptor for a render pass with a single subpass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderPassDescriptor {
    pub attachments: Vec<AttachmentDescription>,
    pub color_references: Vec<AttachmentReference>,
    pub depth_reference: Option<AttachmentReference>,
    pub dependency: SubpassDependency,
}

/// Parameters for beginning a render pass instance.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPassBeginInfo {
    pub render_pass: RenderPassHandle,
    pub framebuffer: super::FramebufferHandle,
    pub extent: Extent2d,
    /// One clear value per attachment, in attachment order.
    pub clear_values: Vec<ClearValue>,
}

/// Descriptor for a framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDescriptor {
    pub render_pass: RenderPassHandle,
    /// Attachment views, in render pass attachment order.
    pub attachments: Vec<TextureHandle>,
    pub extent: Extent2d,
}

// ============================================================================
// Pipeline
// ============================================================================

/// A push constant range of a pipeline layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStages,
    pub offset: u32,
    pub size: u32,
}

/// Descriptor for a pipeline layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PipelineLayoutDescriptor {
    pub set_layouts: Vec<DescriptorSetLayoutHandle>,
    pub push_constant_ranges: Vec<PushConstantRange>,
}

/// One shader stage of a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineShaderStage {
    pub stage: ShaderStage,
    pub module: ShaderModuleHandle,
    pub entry_point: String,
}

/// A vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexBindingDescription {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: VertexInputRate,
}

/// A vertex attribute read from a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttributeDescription {
    pub location: u32,
    pub binding: u32,
    pub format: Format,
    pub offset: u32,
}

/// Depth bias state. Stored as raw `f32` bits so the state stays hashable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthBiasState {
    pub enable: bool,
    pub constant_factor_bits: u32,
    pub slope_factor_bits: u32,
    pub clamp_bits: u32,
}

impl DepthBiasState {
    /// Create a depth bias state from float factors.
    pub fn new(constant_factor: f32, slope_factor: f32, clamp: f32) -> Self {
        Self {
            enable: constant_factor != 0.0 || slope_factor != 0.0,
            constant_factor_bits: constant_factor.to_bits(),
            slope_factor_bits: slope_factor.to_bits(),
            clamp_bits: clamp.to_bits(),
        }
    }

    pub fn constant_factor(&self) -> f32 {
        f32::from_bits(self.constant_factor_bits)
    }

    pub fn slope_factor(&self) -> f32 {
        f32::from_bits(self.slope_factor_bits)
    }

    pub fn clamp(&self) -> f32 {
        f32::from_bits(self.clamp_bits)
    }
}

/// Blend state of one color attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_factor: BlendFactor,
    pub dst_color_factor: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha_factor: BlendFactor,
    pub dst_alpha_factor: BlendFactor,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

/// Pipeline state that is set while recording instead of baked in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DynamicState {
    Viewport,
    Scissor,
}

/// Descriptor for a graphics pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GraphicsPipelineDescriptor {
    pub layout: PipelineLayoutHandle,
    pub render_pass: RenderPassHandle,
    pub subpass: u32,
    pub stages: Vec<PipelineShaderStage>,
    pub vertex_bindings: Vec<VertexBindingDescription>,
    pub vertex_attributes: Vec<VertexAttributeDescription>,
    pub topology: PrimitiveTopology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub front_face: WindingOrder,
    /// Line width as raw `f32` bits.
    pub line_width_bits: u32,
    pub depth_bias: DepthBiasState,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareOp,
    pub color_blend: Vec<ColorBlendAttachment>,
    pub dynamic_states: Vec<DynamicState>,
}

impl GraphicsPipelineDescriptor {
    pub fn line_width(&self) -> f32 {
        f32::from_bits(self.line_width_bits)
    }
}

// ============================================================================
// Descriptor sets
// ============================================================================

/// A combined image/sampler binding in a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub stages: ShaderStages,
}

/// Descriptor for a descriptor pool holding combined image/samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorPoolDescriptor {
    pub max_sets: u32,
    pub combined_image_samplers: u32,
}

/// Write of one combined image/sampler into a descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorImageWrite {
    pub binding: u32,
    pub texture: TextureHandle,
    pub sampler: SamplerHandle,
    pub layout: ImageLayout,
}

// ============================================================================
// Commands
// ============================================================================

/// Region copied between two buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferCopyRegion {
    pub src_offset: u64,
    pub dst_offset: u64,
    pub size: u64,
}

/// Memory barrier on a buffer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferBarrier {
    pub buffer: BufferHandle,
    pub src_stages: PipelineStages,
    pub dst_stages: PipelineStages,
    pub src_access: AccessFlags,
    pub dst_access: AccessFlags,
}

/// One queue submission.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubmitInfo {
    pub command_buffers: Vec<CommandBufferHandle>,
    /// Semaphores waited on, paired with the stage that waits.
    pub wait_semaphores: Vec<(SemaphoreHandle, PipelineStages)>,
    pub signal_semaphores: Vec<SemaphoreHandle>,
    /// Fence signaled once the submission completes.
    pub fence: Option<FenceHandle>,
}
